//! Sequential replay strategy
//!
//! Streams the operation file with [`OperationReader`] and applies every
//! operation in file order on a current-thread runtime. Output is the
//! reference result the concurrent strategy must reproduce.

use std::io::Write;

use tracing::warn;

use super::{seed_store, write_outputs, ProcessingStrategy, ReplayPaths};
use crate::config::EngineConfig;
use crate::core::{ProcessingResult, SettlementEngine};
use crate::io::sync_reader::OperationReader;

/// Single-task replay in file order
#[derive(Debug, Clone, Default)]
pub struct SequentialStrategy {
    engine: EngineConfig,
}

impl SequentialStrategy {
    pub fn new(engine: EngineConfig) -> Self {
        Self { engine }
    }
}

impl ProcessingStrategy for SequentialStrategy {
    fn process(&self, paths: &ReplayPaths, output: &mut dyn Write) -> Result<(), String> {
        let store = seed_store(&paths.accounts)?;
        let reader = OperationReader::new(&paths.operations).map_err(|e| e.to_string())?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(async {
            let engine = SettlementEngine::new(store, self.engine.clone());
            let mut results = Vec::new();

            for item in reader {
                let item = match item {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(error = %e, "Skipping operation row");
                        continue;
                    }
                };

                let response = engine.execute(item.operation).await;
                results.push(ProcessingResult {
                    line: item.line,
                    response,
                });
            }

            write_outputs(&engine, &results, paths, output).await
        })
    }
}
