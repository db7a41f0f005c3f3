//! Concurrent batch replay strategy
//!
//! Reads operations in batches and hands each batch to the
//! [`BatchProcessor`], which partitions it by account and applies the
//! partitions on a multi-threaded runtime.
//!
//! # Ordering
//!
//! - Batches are processed one after another, so an account whose operations
//!   span several batches still sees them in file order
//! - Within a batch, each account's operations run in order on one task
//! - Different accounts run in parallel
//!
//! Final balances therefore match the sequential strategy for any input.

use std::io::Write;

use tracing::{debug, warn};

use super::{seed_store, write_outputs, ProcessingStrategy, ReplayPaths};
use crate::config::EngineConfig;
use crate::core::{BatchProcessor, SettlementEngine};
use crate::io::async_reader::AsyncOperationReader;

/// Configuration for batch processing
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Number of operations per batch
    pub batch_size: usize,
    /// Number of runtime worker threads
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_batches: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a BatchConfig; zero values fall back to the defaults
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                "Invalid batch_size ({}), using default ({})",
                batch_size, default.batch_size
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_batches = if max_concurrent_batches == 0 {
            warn!(
                "Invalid max_concurrent_batches ({}), using default ({})",
                max_concurrent_batches, default.max_concurrent_batches
            );
            default.max_concurrent_batches
        } else {
            max_concurrent_batches
        };

        Self {
            batch_size,
            max_concurrent_batches,
        }
    }
}

/// Batch replay, accounts in parallel
#[derive(Debug, Clone)]
pub struct ConcurrentStrategy {
    config: BatchConfig,
    engine: EngineConfig,
}

impl ConcurrentStrategy {
    /// # Arguments
    ///
    /// * `config` - Batch size and worker thread count
    /// * `engine` - Settlement engine configuration
    pub fn new(config: BatchConfig, engine: EngineConfig) -> Self {
        Self { config, engine }
    }
}

impl ProcessingStrategy for ConcurrentStrategy {
    /// Replay in batches on a multi-threaded runtime
    ///
    /// Fatal errors (missing files, runtime creation, output) are returned
    /// immediately. Malformed rows are logged by the reader and skipped.
    fn process(&self, paths: &ReplayPaths, output: &mut dyn Write) -> Result<(), String> {
        let store = seed_store(&paths.accounts)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_batches)
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(async {
            let engine = SettlementEngine::new(store, self.engine.clone());
            let processor = BatchProcessor::new(engine.clone());

            let file = tokio::fs::File::open(&paths.operations).await.map_err(|e| {
                format!(
                    "Failed to open file '{}': {}",
                    paths.operations.display(),
                    e
                )
            })?;
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncOperationReader::new(compat_file);

            let mut results = Vec::new();
            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                debug!(size = batch.len(), "Processing batch");
                // Finish this batch before reading the next so per-account order holds across batches
                results.extend(processor.process_batch(batch).await);
            }

            write_outputs(&engine, &results, paths, output).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_config_zero_falls_back() {
        let config = BatchConfig::new(0, 0);
        let default = BatchConfig::default();

        assert_eq!(config.batch_size, default.batch_size);
        assert_eq!(config.max_concurrent_batches, default.max_concurrent_batches);
    }

    #[test]
    fn test_batch_config_keeps_custom_values() {
        let config = BatchConfig::new(50, 3);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_concurrent_batches, 3);
    }
}
