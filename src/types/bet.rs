//! Bet transaction record types
//!
//! This module defines the bet status state machine, the natural key that
//! enforces idempotency, the stored record, and the guard/update pair that
//! the store uses for status-guarded conditional writes.
//!
//! # State Machine
//!
//! ```text
//!            settle              cancel
//!  Running ─────────► Settled ─────────► Void
//!     │  ▲               │                 │
//!     │  └── rollback ───┘                 │
//!     │  ▲                                 │
//!     │  └──────────── rollback ───────────┘
//!     └──────────────── cancel ───────────►
//! ```
//!
//! All transitions are decided by [`BetStatus::transition`]; handlers never
//! compare statuses themselves to decide whether an action is legal.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::operation::ProductType;

/// Store-assigned bet identifier, monotonic in creation order
pub type BetId = u64;

/// Free-form audit metadata attached to a bet record
pub type Metadata = Map<String, Value>;

/// Lifecycle status of a bet transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetStatus {
    /// Stake deducted, outcome pending
    Running,

    /// Outcome applied to the balance
    Settled,

    /// Bet cancelled and its net effect refunded
    Void,
}

/// Actions that move a bet between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetAction {
    Settle,
    Cancel,
    Rollback,
}

/// Why a transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    /// The bet already carries an outcome
    AlreadySettled,

    /// The bet was already cancelled
    AlreadyCancelled,

    /// The bet is in a status the action cannot leave from
    NotTransitionable,
}

impl BetStatus {
    /// Apply `action` to this status using the central transition table
    ///
    /// | from    | settle           | cancel           | rollback          |
    /// |---------|------------------|------------------|-------------------|
    /// | Running | Settled          | Void             | NotTransitionable |
    /// | Settled | AlreadySettled   | Void             | Running           |
    /// | Void    | AlreadyCancelled | AlreadyCancelled | Running           |
    pub fn transition(self, action: BetAction) -> Result<BetStatus, TransitionRejection> {
        use BetAction::*;
        use BetStatus::*;

        match (self, action) {
            (Running, Settle) => Ok(Settled),
            (Settled, Settle) => Err(TransitionRejection::AlreadySettled),
            (Void, Settle) => Err(TransitionRejection::AlreadyCancelled),
            (Running | Settled, Cancel) => Ok(Void),
            (Void, Cancel) => Err(TransitionRejection::AlreadyCancelled),
            (Settled | Void, Rollback) => Ok(Running),
            (Running, Rollback) => Err(TransitionRejection::NotTransitionable),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Running => "Running",
            BetStatus::Settled => "Settled",
            BetStatus::Void => "Void",
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a bet record
///
/// Single-bet providers key by `(transfer_code, account_code)`; aggregated
/// providers add the leg identity. The store enforces uniqueness on the
/// whole key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BetKey {
    pub transfer_code: String,
    pub account_code: String,
    pub leg_id: Option<String>,
}

impl BetKey {
    /// Key of a single atomic bet
    pub fn single(transfer_code: impl Into<String>, account_code: impl Into<String>) -> Self {
        BetKey {
            transfer_code: transfer_code.into(),
            account_code: account_code.into(),
            leg_id: None,
        }
    }

    /// Key of one leg of an aggregated bet group
    pub fn leg(
        transfer_code: impl Into<String>,
        account_code: impl Into<String>,
        leg_id: impl Into<String>,
    ) -> Self {
        BetKey {
            transfer_code: transfer_code.into(),
            account_code: account_code.into(),
            leg_id: Some(leg_id.into()),
        }
    }
}

impl fmt::Display for BetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.leg_id {
            Some(leg) => write!(f, "{}/{}#{}", self.account_code, self.transfer_code, leg),
            None => write!(f, "{}/{}", self.account_code, self.transfer_code),
        }
    }
}

/// Stored bet transaction record
///
/// Records are never deleted; every mutation is an in-place guarded update.
/// Monetary fields are in internal units of `currency`.
#[derive(Debug, Clone, PartialEq)]
pub struct BetRecord {
    /// Creation id, ascending in insertion order
    pub id: BetId,
    pub key: BetKey,
    pub stake: Decimal,
    pub win_loss: Decimal,
    pub status: BetStatus,

    /// One-shot rollback flag, independent from `status`
    pub rolled_back: bool,
    pub cash_out: bool,
    pub currency: String,
    pub product_type: ProductType,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BetRecord {
    /// Whether this record is a promotional credit modelled as a pseudo-bet
    pub fn is_bonus(&self) -> bool {
        (self.stake.is_zero() && self.win_loss > Decimal::ZERO)
            || self.metadata.get("bonus") == Some(&Value::Bool(true))
    }
}

/// Insert payload for a new bet record; the store assigns id and timestamps
#[derive(Debug, Clone)]
pub struct NewBet {
    pub key: BetKey,
    pub stake: Decimal,
    pub win_loss: Decimal,
    pub status: BetStatus,
    pub currency: String,
    pub product_type: ProductType,
    pub metadata: Metadata,
}

/// Predicate of a status-guarded conditional update
///
/// The store applies an update only when the current row still satisfies
/// the guard, and reports zero rows affected otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetGuard {
    statuses: Vec<BetStatus>,
    not_rolled_back: bool,
}

impl BetGuard {
    /// Require the record to still be in `status`
    pub fn status(status: BetStatus) -> Self {
        BetGuard {
            statuses: vec![status],
            not_rolled_back: false,
        }
    }

    /// Require the record to be in one of `statuses`
    pub fn any_of(statuses: &[BetStatus]) -> Self {
        BetGuard {
            statuses: statuses.to_vec(),
            not_rolled_back: false,
        }
    }

    /// Additionally require the rollback flag to be unset
    pub fn not_rolled_back(mut self) -> Self {
        self.not_rolled_back = true;
        self
    }

    pub fn admits(&self, bet: &BetRecord) -> bool {
        self.statuses.contains(&bet.status) && !(self.not_rolled_back && bet.rolled_back)
    }
}

/// Column changes for a guarded update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BetUpdate {
    pub status: Option<BetStatus>,
    pub stake: Option<Decimal>,
    pub win_loss: Option<Decimal>,
    pub rolled_back: Option<bool>,
    pub cash_out: Option<bool>,
    pub product_type: Option<ProductType>,
    pub metadata: Option<Metadata>,
}

impl BetUpdate {
    pub fn status(status: BetStatus) -> Self {
        BetUpdate {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn stake(stake: Decimal) -> Self {
        BetUpdate {
            stake: Some(stake),
            ..Default::default()
        }
    }

    pub fn with_win_loss(mut self, win_loss: Decimal) -> Self {
        self.win_loss = Some(win_loss);
        self
    }

    pub fn with_rolled_back(mut self, rolled_back: bool) -> Self {
        self.rolled_back = Some(rolled_back);
        self
    }

    pub fn with_cash_out(mut self, cash_out: bool) -> Self {
        self.cash_out = Some(cash_out);
        self
    }

    pub fn with_product_type(mut self, product_type: ProductType) -> Self {
        self.product_type = Some(product_type);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Write the set columns into `bet`
    pub fn apply(&self, bet: &mut BetRecord) {
        if let Some(status) = self.status {
            bet.status = status;
        }
        if let Some(stake) = self.stake {
            bet.stake = stake;
        }
        if let Some(win_loss) = self.win_loss {
            bet.win_loss = win_loss;
        }
        if let Some(rolled_back) = self.rolled_back {
            bet.rolled_back = rolled_back;
        }
        if let Some(cash_out) = self.cash_out {
            bet.cash_out = cash_out;
        }
        if let Some(product_type) = self.product_type {
            bet.product_type = product_type;
        }
        if let Some(metadata) = &self.metadata {
            bet.metadata = metadata.clone();
        }
    }
}
