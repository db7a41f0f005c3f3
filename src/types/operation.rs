//! Canonical operation requests and responses
//!
//! Provider adapters translate their own payload dialects into these types
//! before anything reaches the settlement engine. All monetary fields are in
//! the provider's display units; the engine converts them internally.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bet::Metadata;
use super::error::{ErrorCode, SettlementError};

/// Provider product type
///
/// Decides whether a transfer is keyed per leg (aggregated) and whether
/// repeated deducts may raise the stake (incremental). Which values mean what
/// is configured in [`crate::config::EngineConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductType(pub i32);

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome reported by a single-bet settle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Win,
    Lose,
    Draw,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Win => "win",
            ResultType::Lose => "lose",
            ResultType::Draw => "draw",
        }
    }
}

/// Place or raise a stake
#[derive(Debug, Clone, Default)]
pub struct DeductRequest {
    pub account_code: String,
    pub transfer_code: String,
    pub leg_id: Option<String>,
    pub amount: Decimal,
    pub product_type: ProductType,
    /// Optional commission stake echoed back as the bet amount
    pub commission_stake: Option<Decimal>,
    pub metadata: Metadata,
}

/// Apply an outcome
#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub account_code: String,
    pub transfer_code: String,
    pub leg_id: Option<String>,
    pub win_loss: Decimal,
    pub result_type: ResultType,
    pub cash_out: bool,
    pub product_type: ProductType,
    pub result_time: Option<String>,
    pub game_result: Option<String>,
    pub metadata: Metadata,
}

/// Cancel one bet, one leg, or a whole aggregated group
#[derive(Debug, Clone, Default)]
pub struct CancelRequest {
    pub account_code: String,
    pub transfer_code: String,
    pub leg_id: Option<String>,
    pub cancel_all: bool,
    pub product_type: ProductType,
}

/// Revert a settled or cancelled bet to running
#[derive(Debug, Clone, Default)]
pub struct RollbackRequest {
    pub account_code: String,
    pub transfer_code: String,
    pub leg_id: Option<String>,
    pub product_type: ProductType,
}

/// Promotional credit modelled as a pseudo-bet
#[derive(Debug, Clone, Default)]
pub struct BonusRequest {
    pub account_code: String,
    pub transfer_code: String,
    pub amount: Decimal,
    pub provider: Option<String>,
    pub game_provider_promotion: bool,
    pub metadata: Metadata,
}

/// Reverse a previously credited bonus
#[derive(Debug, Clone, Default)]
pub struct CancelBonusRequest {
    pub account_code: String,
    pub transfer_code: String,
}

/// Read the current balance
#[derive(Debug, Clone, Default)]
pub struct BalanceRequest {
    pub account_code: String,
}

/// One inbound operation, in canonical form
#[derive(Debug, Clone)]
pub enum Operation {
    Deduct(DeductRequest),
    Settle(SettleRequest),
    Cancel(CancelRequest),
    Rollback(RollbackRequest),
    Bonus(BonusRequest),
    CancelBonus(CancelBonusRequest),
    Balance(BalanceRequest),
}

impl Operation {
    /// Short lowercase name used in logs and replay output
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Deduct(_) => "deduct",
            Operation::Settle(_) => "settle",
            Operation::Cancel(_) => "cancel",
            Operation::Rollback(_) => "rollback",
            Operation::Bonus(_) => "bonus",
            Operation::CancelBonus(_) => "cancel_bonus",
            Operation::Balance(_) => "balance",
        }
    }

    pub fn account_code(&self) -> &str {
        match self {
            Operation::Deduct(r) => &r.account_code,
            Operation::Settle(r) => &r.account_code,
            Operation::Cancel(r) => &r.account_code,
            Operation::Rollback(r) => &r.account_code,
            Operation::Bonus(r) => &r.account_code,
            Operation::CancelBonus(r) => &r.account_code,
            Operation::Balance(r) => &r.account_code,
        }
    }

    /// Transfer code, empty for balance reads
    pub fn transfer_code(&self) -> &str {
        match self {
            Operation::Deduct(r) => &r.transfer_code,
            Operation::Settle(r) => &r.transfer_code,
            Operation::Cancel(r) => &r.transfer_code,
            Operation::Rollback(r) => &r.transfer_code,
            Operation::Bonus(r) => &r.transfer_code,
            Operation::CancelBonus(r) => &r.transfer_code,
            Operation::Balance(_) => "",
        }
    }

    /// Trim identifiers and drop blank leg ids
    pub fn normalize(&mut self) {
        fn trim(s: &mut String) {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
        fn trim_leg(leg: &mut Option<String>) {
            *leg = leg
                .take()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
        }

        match self {
            Operation::Deduct(r) => {
                trim(&mut r.account_code);
                trim(&mut r.transfer_code);
                trim_leg(&mut r.leg_id);
            }
            Operation::Settle(r) => {
                trim(&mut r.account_code);
                trim(&mut r.transfer_code);
                trim_leg(&mut r.leg_id);
            }
            Operation::Cancel(r) => {
                trim(&mut r.account_code);
                trim(&mut r.transfer_code);
                trim_leg(&mut r.leg_id);
            }
            Operation::Rollback(r) => {
                trim(&mut r.account_code);
                trim(&mut r.transfer_code);
                trim_leg(&mut r.leg_id);
            }
            Operation::Bonus(r) => {
                trim(&mut r.account_code);
                trim(&mut r.transfer_code);
            }
            Operation::CancelBonus(r) => {
                trim(&mut r.account_code);
                trim(&mut r.transfer_code);
            }
            Operation::Balance(r) => trim(&mut r.account_code),
        }
    }

    /// Reject missing identifiers and non-positive amounts
    ///
    /// Runs before any lock is taken.
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.account_code().is_empty() {
            return Err(SettlementError::validation("account code is required"));
        }
        if !matches!(self, Operation::Balance(_)) && self.transfer_code().is_empty() {
            return Err(SettlementError::validation("transfer code is required"));
        }

        match self {
            Operation::Deduct(r) if r.amount <= Decimal::ZERO => Err(
                SettlementError::validation(format!("deduct amount must be positive, got {}", r.amount)),
            ),
            Operation::Bonus(r) if r.amount <= Decimal::ZERO => Err(SettlementError::validation(
                format!("bonus amount must be positive, got {}", r.amount),
            )),
            Operation::Deduct(r) if r.commission_stake.is_some_and(|c| c < Decimal::ZERO) => Err(
                SettlementError::validation("commission stake must not be negative"),
            ),
            _ => Ok(()),
        }
    }
}

/// Result of one operation, in display units
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub operation: &'static str,
    pub error_code: ErrorCode,
    pub message: String,
    pub account_code: String,
    pub transfer_code: String,
    pub currency: Option<String>,

    /// Current balance in display units, absent when unknown
    pub balance: Option<Decimal>,

    /// Echoed stake or commission stake for deducts
    pub bet_amount: Option<Decimal>,
}

impl OperationResponse {
    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success
    }
}
