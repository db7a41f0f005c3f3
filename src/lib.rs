//! Wallet Settlement Engine Library
//! # Overview
//!
//! Settlement core of a multi-provider gambling wallet. Every inbound provider
//! operation runs as one unit of work under an exclusive account lock and moves
//! the account balance and the bet's lifecycle state together, or not at all.
//!
//! # Architecture
//!
//! - [`types`] - Accounts, bet records, canonical operations, error codes
//! - [`config`] - YAML configuration for product types and currency scaling
//! - [`logging`] - Tracing subscriber setup
//! - [`core`] - Business logic components:
//!   - [`core::engine`] - Settlement Engine executing each operation
//!   - [`core::group`] - Aggregated bet groups and rollback candidate selection
//!   - [`core::currency`] - Display/internal unit normalization
//!   - [`core::store`] - Unit-of-work store traits
//!   - [`core::memory_store`] - In-memory store with per-account locks
//! - [`io`] - CSV replay files
//! - [`strategy`] - Sequential and concurrent replay pipelines
//! - [`cli`] - Replay CLI arguments
//!
//! # Operations
//!
//! - **Deduct**: place or raise a stake
//! - **Settle**: apply an outcome and credit any payout
//! - **Cancel**: void a bet, one leg, or a whole group and refund
//! - **Rollback**: revert a settled or void bet to running and reverse its effect
//! - **Bonus / Cancel Bonus**: promotional credit and its reversal
//! - **Balance**: read the current balance
//!
//! # Bet lifecycle
//!
//! ```text
//!   Running ──settle──► Settled ──rollback──► Running
//!      │                   │
//!      └──cancel──► Void ◄─┘ cancel
//!                    │
//!                    └──rollback──► Running
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod strategy;
pub mod types;

pub use config::{AppConfig, EngineConfig, LogConfig};
pub use core::{CurrencyNormalizer, MemoryStore, SettlementEngine, UnitOfWork, WalletStore};
pub use types::{
    Account, BetRecord, BetStatus, ErrorCode, Operation, OperationResponse, SettlementError,
    StoreError,
};
