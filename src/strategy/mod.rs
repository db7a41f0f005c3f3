//! Replay strategies
//!
//! A strategy is a complete replay pipeline: seed accounts, read operations,
//! run them through the settlement engine, and write final balances (and
//! optionally every response) as CSV. Strategies are selected at runtime.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cli::StrategyType;
use crate::config::EngineConfig;
use crate::core::{MemoryStore, ProcessingResult, SettlementEngine};
use crate::io::csv_format::{write_balances_csv, write_responses_csv};
use crate::io::sync_reader::read_accounts;

pub mod concurrent;
pub mod sequential;

pub use concurrent::{BatchConfig, ConcurrentStrategy};
pub use sequential::SequentialStrategy;

/// Files a replay reads and writes
#[derive(Debug, Clone)]
pub struct ReplayPaths {
    /// Account seed file (`code,currency,balance`)
    pub accounts: PathBuf,
    /// Operation file
    pub operations: PathBuf,
    /// Where to write per-operation responses, if anywhere
    pub responses: Option<PathBuf>,
}

/// Replay pipeline
pub trait ProcessingStrategy: Send + Sync {
    /// Replay `paths.operations` and write final balances to `output`
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the replay ran to the end; rejected operations and
    ///   malformed rows do not fail it
    /// * `Err(String)` on a fatal error (missing file, runtime or output failure)
    fn process(&self, paths: &ReplayPaths, output: &mut dyn Write) -> Result<(), String>;
}

/// Create a replay strategy
///
/// # Arguments
///
/// * `strategy_type` - Which pipeline to run
/// * `batch` - Batch settings for the concurrent pipeline (ignored by sequential)
/// * `engine` - Engine configuration shared by both pipelines
pub fn create_strategy(
    strategy_type: StrategyType,
    batch: Option<BatchConfig>,
    engine: EngineConfig,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sequential => Box::new(SequentialStrategy::new(engine)),
        StrategyType::Concurrent => {
            Box::new(ConcurrentStrategy::new(batch.unwrap_or_default(), engine))
        }
    }
}

/// Build an in-memory store from the account seed file
fn seed_store(path: &Path) -> Result<MemoryStore, String> {
    let seeds = read_accounts(path).map_err(|e| e.to_string())?;
    let store = MemoryStore::new();

    for seed in seeds {
        if let Err(e) = store.open_account(&seed.code, &seed.currency, seed.balance) {
            warn!(account = %seed.code, error = %e, "Skipping account seed");
        }
    }

    Ok(store)
}

/// Write final balances and, when requested, the response log
async fn write_outputs(
    engine: &SettlementEngine<MemoryStore>,
    results: &[ProcessingResult],
    paths: &ReplayPaths,
    output: &mut dyn Write,
) -> Result<(), String> {
    let accounts = engine.store().accounts().await;
    write_balances_csv(&accounts, engine.normalizer(), output)?;

    if let Some(path) = &paths.responses {
        let file = File::create(path)
            .map_err(|e| format!("Failed to create '{}': {}", path.display(), e))?;
        let mut writer = BufWriter::new(file);
        write_responses_csv(results, &mut writer)?;
        writer
            .flush()
            .map_err(|e| format!("Failed to flush '{}': {}", path.display(), e))?;
    }

    let rejected = results.iter().filter(|r| !r.response.is_success()).count();
    info!(
        operations = results.len(),
        rejected,
        accounts = accounts.len(),
        "Replay finished"
    );

    Ok(())
}
