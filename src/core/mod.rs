//! Core business logic module
//!
//! This module contains the settlement components:
//! - `currency` - Display/internal unit conversion and rounding
//! - `store` - Unit-of-work traits the engine runs against
//! - `memory_store` - In-memory store with per-account locks
//! - `group` - Aggregated bet group view and rollback candidate selection
//! - `engine` - Settlement Engine orchestrating every operation
//! - `batch_processor` - Concurrent replay partitioned by account

pub mod batch_processor;
pub mod currency;
pub mod engine;
pub mod group;
pub mod memory_store;
pub mod store;

pub use batch_processor::{BatchProcessor, ProcessingResult, ReplayItem};
pub use currency::CurrencyNormalizer;
pub use engine::SettlementEngine;
pub use group::BetGroup;
pub use memory_store::{MemoryStore, MemoryUnit};
pub use store::{UnitOfWork, WalletStore};
