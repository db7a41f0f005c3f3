//! Error types for the wallet settlement engine
//!
//! This module defines all error types that can occur while settling bets and
//! while replaying operation files.
//!
//! # Error Categories
//!
//! - **Validation**: missing identifiers, non-positive amounts. Rejected before
//!   any lock is taken.
//! - **Not found**: unknown account, unknown transfer code.
//! - **Insufficient funds**: balance guard failure, nothing is mutated.
//! - **Idempotent duplicates**: the operation was already applied.
//! - **Illegal transitions**: the bet status cannot accept the action.
//! - **Transient**: storage failures. The whole unit of work is rolled back and
//!   the caller may retry with the same transfer code.
//! - **Replay**: file and CSV errors of the replay CLI.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use super::bet::BetStatus;

/// Closed wire enumeration of result codes returned to providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    AccountNotFound,
    InvalidRequest,
    InsufficientBalance,
    BetNotFound,
    Transient,
    NotTransitionable,
    Validation,
    AlreadySettled,
    AlreadyCancelled,
    AlreadyRolledBack,
    NotRollbackEligible,
    Duplicate,
}

impl ErrorCode {
    /// Integer value sent on the wire
    pub fn as_i32(&self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::AccountNotFound => 1,
            ErrorCode::InvalidRequest => 3,
            ErrorCode::InsufficientBalance => 5,
            ErrorCode::BetNotFound => 6,
            ErrorCode::Transient => 7,
            ErrorCode::NotTransitionable => 8,
            ErrorCode::Validation => 422,
            ErrorCode::AlreadySettled => 2001,
            ErrorCode::AlreadyCancelled => 2002,
            ErrorCode::AlreadyRolledBack => 2003,
            ErrorCode::NotRollbackEligible => 2004,
            ErrorCode::Duplicate => 5003,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Storage failures reported by a [`crate::core::store::UnitOfWork`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Unique constraint on a natural key was violated
    #[error("Unique constraint violated for {key}")]
    UniqueViolation {
        /// The conflicting key
        key: String,
    },

    /// A write was attempted before an account was locked
    #[error("No account is locked in this unit of work")]
    NoAccountLocked,

    /// A unit of work tried to lock a second account
    #[error("Unit of work already holds the lock on account {code}")]
    AccountAlreadyLocked {
        /// Account code already locked
        code: String,
    },

    /// Backend failure (connection lost, timeout, ...)
    #[error("Store backend failure: {message}")]
    Backend {
        /// Description of the failure
        message: String,
    },
}

/// Main error type of the settlement engine
///
/// Each variant maps to exactly one [`ErrorCode`] through
/// [`SettlementError::code`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    /// Missing or malformed request field
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// Request is well formed but cannot be applied as asked
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong
        message: String,
    },

    /// Unknown account code
    #[error("Account {account} not found")]
    AccountNotFound {
        /// Account code
        account: String,
    },

    /// Unknown transfer code or leg
    #[error("Bet {transfer}{} not found for account {account}", leg.as_ref().map(|l| format!(" leg {}", l)).unwrap_or_default())]
    BetNotFound {
        /// Account code
        account: String,
        /// Transfer code
        transfer: String,
        /// Leg id (if any)
        leg: Option<String>,
    },

    /// Stake exceeds the balance
    #[error("Insufficient balance for account {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Account code
        account: String,
        /// Balance in internal units
        available: Decimal,
        /// Requested debit in internal units
        requested: Decimal,
    },

    /// The transfer was already applied
    #[error("Transfer {transfer} for account {account} was already processed")]
    Duplicate {
        /// Account code
        account: String,
        /// Transfer code
        transfer: String,
    },

    /// An incremental deduct tried to lower a running stake
    #[error("Stake for transfer {transfer} cannot decrease from {current} to {requested}")]
    StakeDecrease {
        /// Transfer code
        transfer: String,
        /// Stored stake in internal units
        current: Decimal,
        /// Requested stake in internal units
        requested: Decimal,
    },

    /// The bet already carries an outcome
    #[error("Transfer {transfer} is already settled")]
    AlreadySettled {
        /// Transfer code
        transfer: String,
    },

    /// The bet was already cancelled
    #[error("Transfer {transfer} is already cancelled")]
    AlreadyCancelled {
        /// Transfer code
        transfer: String,
    },

    /// The bet was already rolled back once
    #[error("Transfer {transfer} is already rolled back")]
    AlreadyRolledBack {
        /// Transfer code
        transfer: String,
    },

    /// No leg of the group can be rolled back
    #[error("Only settled or cancelled legs with a payout can be rolled back (transfer {transfer})")]
    NotRollbackEligible {
        /// Transfer code
        transfer: String,
    },

    /// The bet status cannot accept the action
    #[error("Transfer {transfer} in status {status} cannot be {action}")]
    NotTransitionable {
        /// Transfer code
        transfer: String,
        /// Current status
        status: BetStatus,
        /// Attempted action, past tense
        action: &'static str,
    },

    /// Balance arithmetic left the representable range
    #[error("Arithmetic overflow in {operation} for account {account}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// Account code
        account: String,
    },

    /// Storage failure; the unit of work was rolled back
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SettlementError {
    /// Wire code of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SettlementError::Validation { .. } => ErrorCode::Validation,
            SettlementError::InvalidRequest { .. } | SettlementError::StakeDecrease { .. } => {
                ErrorCode::InvalidRequest
            }
            SettlementError::AccountNotFound { .. } => ErrorCode::AccountNotFound,
            SettlementError::BetNotFound { .. } => ErrorCode::BetNotFound,
            SettlementError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            SettlementError::Duplicate { .. } => ErrorCode::Duplicate,
            SettlementError::AlreadySettled { .. } => ErrorCode::AlreadySettled,
            SettlementError::AlreadyCancelled { .. } => ErrorCode::AlreadyCancelled,
            SettlementError::AlreadyRolledBack { .. } => ErrorCode::AlreadyRolledBack,
            SettlementError::NotRollbackEligible { .. } => ErrorCode::NotRollbackEligible,
            SettlementError::NotTransitionable { .. } => ErrorCode::NotTransitionable,
            SettlementError::ArithmeticOverflow { .. } | SettlementError::Store(_) => {
                ErrorCode::Transient
            }
        }
    }

    /// Whether the caller should retry with the same transfer code
    pub fn is_transient(&self) -> bool {
        self.code() == ErrorCode::Transient
    }
}

// Helper functions for creating common errors

impl SettlementError {
    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        SettlementError::Validation {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        SettlementError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an AccountNotFound error
    pub fn account_not_found(account: &str) -> Self {
        SettlementError::AccountNotFound {
            account: account.to_string(),
        }
    }

    /// Create a BetNotFound error
    pub fn bet_not_found(account: &str, transfer: &str, leg: Option<&str>) -> Self {
        SettlementError::BetNotFound {
            account: account.to_string(),
            transfer: transfer.to_string(),
            leg: leg.map(str::to_string),
        }
    }

    /// Create an InsufficientBalance error
    pub fn insufficient_balance(account: &str, available: Decimal, requested: Decimal) -> Self {
        SettlementError::InsufficientBalance {
            account: account.to_string(),
            available,
            requested,
        }
    }

    /// Create a Duplicate error
    pub fn duplicate(account: &str, transfer: &str) -> Self {
        SettlementError::Duplicate {
            account: account.to_string(),
            transfer: transfer.to_string(),
        }
    }

    /// Create a StakeDecrease error
    pub fn stake_decrease(transfer: &str, current: Decimal, requested: Decimal) -> Self {
        SettlementError::StakeDecrease {
            transfer: transfer.to_string(),
            current,
            requested,
        }
    }

    /// Create an AlreadySettled error
    pub fn already_settled(transfer: &str) -> Self {
        SettlementError::AlreadySettled {
            transfer: transfer.to_string(),
        }
    }

    /// Create an AlreadyCancelled error
    pub fn already_cancelled(transfer: &str) -> Self {
        SettlementError::AlreadyCancelled {
            transfer: transfer.to_string(),
        }
    }

    /// Create an AlreadyRolledBack error
    pub fn already_rolled_back(transfer: &str) -> Self {
        SettlementError::AlreadyRolledBack {
            transfer: transfer.to_string(),
        }
    }

    /// Create a NotRollbackEligible error
    pub fn not_rollback_eligible(transfer: &str) -> Self {
        SettlementError::NotRollbackEligible {
            transfer: transfer.to_string(),
        }
    }

    /// Create a NotTransitionable error
    pub fn not_transitionable(transfer: &str, status: BetStatus, action: &'static str) -> Self {
        SettlementError::NotTransitionable {
            transfer: transfer.to_string(),
            status,
            action,
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, account: &str) -> Self {
        SettlementError::ArithmeticOverflow {
            operation: operation.to_string(),
            account: account.to_string(),
        }
    }
}

/// Errors of the replay CLI
///
/// Fatal errors stop the replay; parse errors on single rows are logged and the
/// row is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    /// File not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found
        path: String,
    },

    /// I/O error while reading or writing files
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Parse {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },

    /// Row parsed but does not describe a valid operation
    #[error("Invalid record at line {line}: {message}")]
    InvalidRecord {
        /// Line number of the record
        line: u64,
        /// What was wrong
        message: String,
    },
}

impl From<std::io::Error> for ReplayError {
    fn from(error: std::io::Error) -> Self {
        ReplayError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for ReplayError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        ReplayError::Parse {
            line,
            message: error.to_string(),
        }
    }
}

impl From<csv_async::Error> for ReplayError {
    fn from(error: csv_async::Error) -> Self {
        ReplayError::Parse {
            line: None,
            message: error.to_string(),
        }
    }
}

impl ReplayError {
    /// Create an InvalidRecord error
    pub fn invalid_record(line: u64, message: impl Into<String>) -> Self {
        ReplayError::InvalidRecord {
            line,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::account_not_found(
        SettlementError::account_not_found("alice"),
        "Account alice not found"
    )]
    #[case::bet_not_found_single(
        SettlementError::bet_not_found("alice", "T1", None),
        "Bet T1 not found for account alice"
    )]
    #[case::bet_not_found_leg(
        SettlementError::bet_not_found("alice", "T1", Some("L2")),
        "Bet T1 leg L2 not found for account alice"
    )]
    #[case::insufficient_balance(
        SettlementError::insufficient_balance("alice", Decimal::new(50, 0), Decimal::new(100, 0)),
        "Insufficient balance for account alice: available 50, requested 100"
    )]
    #[case::not_transitionable(
        SettlementError::not_transitionable("T1", BetStatus::Running, "rolled back"),
        "Transfer T1 in status Running cannot be rolled back"
    )]
    #[case::store(
        SettlementError::from(StoreError::Backend { message: "connection reset".to_string() }),
        "Store backend failure: connection reset"
    )]
    fn test_error_display(#[case] error: SettlementError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::validation(SettlementError::validation("x"), 422)]
    #[case::invalid_request(SettlementError::invalid_request("x"), 3)]
    #[case::stake_decrease(SettlementError::stake_decrease("T1", Decimal::TEN, Decimal::ONE), 3)]
    #[case::account_not_found(SettlementError::account_not_found("a"), 1)]
    #[case::bet_not_found(SettlementError::bet_not_found("a", "T1", None), 6)]
    #[case::insufficient(SettlementError::insufficient_balance("a", Decimal::ZERO, Decimal::ONE), 5)]
    #[case::duplicate(SettlementError::duplicate("a", "T1"), 5003)]
    #[case::already_settled(SettlementError::already_settled("T1"), 2001)]
    #[case::already_cancelled(SettlementError::already_cancelled("T1"), 2002)]
    #[case::already_rolled_back(SettlementError::already_rolled_back("T1"), 2003)]
    #[case::not_eligible(SettlementError::not_rollback_eligible("T1"), 2004)]
    #[case::not_transitionable(
        SettlementError::not_transitionable("T1", BetStatus::Void, "settled"),
        8
    )]
    #[case::overflow(SettlementError::arithmetic_overflow("credit", "a"), 7)]
    #[case::store(SettlementError::Store(StoreError::NoAccountLocked), 7)]
    fn test_error_codes(#[case] error: SettlementError, #[case] code: i32) {
        assert_eq!(error.code().as_i32(), code);
    }

    #[test]
    fn test_store_errors_are_transient() {
        let err: SettlementError = StoreError::UniqueViolation {
            key: "alice/T1".to_string(),
        }
        .into();

        assert!(err.is_transient());
        assert!(!SettlementError::duplicate("alice", "T1").is_transient());
    }

    #[test]
    fn test_replay_parse_error_display() {
        let err = ReplayError::Parse {
            line: Some(4),
            message: "bad amount".to_string(),
        };
        assert_eq!(err.to_string(), "CSV parse error at line 4: bad amount");
    }
}
