//! Batch processing with account-based partitioning
//!
//! This module provides the `BatchProcessor`, which replays a batch of
//! operations concurrently across accounts while keeping each account's
//! operations in file order.
//!
//! # Design
//!
//! A batch is partitioned by account code. Each partition runs on its own
//! tokio task and applies its operations one after another; partitions for
//! different accounts run in parallel. Account locks in the store still
//! serialise any two units of work for the same account, so partitioning only
//! decides ordering, not correctness.
//!
//! ```text
//! batch ──► partition_by_account ──► task(alice): op1, op4, op5
//!                                └─► task(bob):   op2, op3
//! ```

use std::collections::HashMap;

use tracing::error;

use super::engine::SettlementEngine;
use super::store::WalletStore;
use crate::types::{Operation, OperationResponse};

/// One operation read from the replay file
#[derive(Debug, Clone)]
pub struct ReplayItem {
    /// Line number in the source file
    pub line: u64,
    pub operation: Operation,
}

/// Outcome of one replayed operation
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub line: u64,
    pub response: OperationResponse,
}

/// Batch processor with account-based partitioning
#[derive(Debug, Clone)]
pub struct BatchProcessor<S> {
    engine: SettlementEngine<S>,
}

impl<S> BatchProcessor<S>
where
    S: WalletStore + Clone + 'static,
{
    pub fn new(engine: SettlementEngine<S>) -> Self {
        Self { engine }
    }

    /// Split a batch into per-account sub-batches, keeping file order within each
    pub fn partition_by_account(batch: Vec<ReplayItem>) -> HashMap<String, Vec<ReplayItem>> {
        let mut partitions: HashMap<String, Vec<ReplayItem>> = HashMap::new();

        for item in batch {
            partitions
                .entry(item.operation.account_code().trim().to_string())
                .or_default()
                .push(item);
        }

        partitions
    }

    /// Apply one account's operations in order
    pub async fn process_account(&self, items: Vec<ReplayItem>) -> Vec<ProcessingResult> {
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let response = self.engine.execute(item.operation).await;
            results.push(ProcessingResult {
                line: item.line,
                response,
            });
        }

        results
    }

    /// Apply a batch, accounts in parallel
    ///
    /// # Returns
    ///
    /// One result per operation, sorted by line number
    pub async fn process_batch(&self, batch: Vec<ReplayItem>) -> Vec<ProcessingResult> {
        let partitions = Self::partition_by_account(batch);

        let mut tasks = Vec::with_capacity(partitions.len());
        for (_account, items) in partitions {
            let processor = self.clone();
            tasks.push(tokio::spawn(async move {
                processor.process_account(items).await
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(account_results) => results.extend(account_results),
                Err(e) => error!("Partition task failed: {}", e),
            }
        }

        results.sort_by_key(|r| r.line);
        results
    }
}
