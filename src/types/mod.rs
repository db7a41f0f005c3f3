//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Player account state
//! - `bet`: Bet records, their status machine and guarded updates
//! - `operation`: Canonical operation requests and responses
//! - `error`: Error types and wire result codes

pub mod account;
pub mod bet;
pub mod error;
pub mod operation;

pub use account::{Account, AccountId};
pub use bet::{
    BetAction, BetGuard, BetId, BetKey, BetRecord, BetStatus, BetUpdate, Metadata, NewBet,
    TransitionRejection,
};
pub use error::{ErrorCode, ReplayError, SettlementError, StoreError};
pub use operation::{
    BalanceRequest, BonusRequest, CancelBonusRequest, CancelRequest, DeductRequest, Operation,
    OperationResponse, ProductType, ResultType, RollbackRequest, SettleRequest,
};
