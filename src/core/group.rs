//! Aggregated bet group view
//!
//! Some providers fan one transfer code out into several legs that are
//! settled, cancelled and rolled back independently. A [`BetGroup`] is a
//! read-only view over those legs, taken while the account is locked, that
//! decides *what* should change. The engine then applies the returned plan
//! leg by leg under status guards.
//!
//! # Rollback candidate selection
//!
//! ```text
//! any Void leg, and no leg carries a payout ──► restore every Void leg
//!                     │ otherwise
//!                     ▼
//! explicit leg, eligible ──► that leg
//!                     │ otherwise (or leg unknown)
//!                     ▼
//! oldest eligible Void leg ──► oldest eligible Settled leg ──► reject
//! ```
//!
//! A leg is eligible when it is `Void` or `Settled`, has a non-zero win/loss
//! and has not been rolled back before.

use rust_decimal::Decimal;

use super::currency::is_nonzero;
use crate::types::{BetAction, BetId, BetRecord, BetStatus, SettlementError, TransitionRejection};

/// One leg transition decided by a plan
#[derive(Debug, Clone, PartialEq)]
pub struct LegChange {
    pub id: BetId,
    pub leg_id: String,
    pub from: BetStatus,
    pub to: BetStatus,
    /// Balance delta in internal units
    pub delta: Decimal,
}

/// Leg transitions plus their summed balance delta
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupPlan {
    pub changes: Vec<LegChange>,
    pub total: Decimal,
}

impl GroupPlan {
    fn push(&mut self, leg: &BetRecord, to: BetStatus, delta: Decimal) {
        self.total += delta;
        self.changes.push(LegChange {
            id: leg.id,
            leg_id: leg.key.leg_id.clone().unwrap_or_default(),
            from: leg.status,
            to,
            delta,
        });
    }
}

/// Refund owed when cancelling a bet in `status`
///
/// A running bet gets its stake back; a settled bet gets the stake back minus
/// what settlement already paid out, which may be negative.
pub fn cancel_refund(status: BetStatus, stake: Decimal, win_loss: Decimal) -> Decimal {
    match status {
        BetStatus::Running => stake,
        BetStatus::Settled => stake - win_loss,
        BetStatus::Void => Decimal::ZERO,
    }
}

/// Balance delta of rolling a bet back from `from` to running
///
/// Rolling back a settled bet takes back the payout; rolling back a cancelled
/// bet takes back the stake. The two are not symmetric for a bet that was
/// settled and then cancelled.
pub fn rollback_delta(from: BetStatus, stake: Decimal, win_loss: Decimal) -> Decimal {
    match from {
        BetStatus::Settled => -win_loss,
        BetStatus::Void => -stake,
        BetStatus::Running => Decimal::ZERO,
    }
}

/// Map a refused transition to the error reported to the provider
pub fn rejection_error(
    rejection: TransitionRejection,
    transfer: &str,
    status: BetStatus,
    action: &'static str,
) -> SettlementError {
    match rejection {
        TransitionRejection::AlreadySettled => SettlementError::already_settled(transfer),
        TransitionRejection::AlreadyCancelled => SettlementError::already_cancelled(transfer),
        TransitionRejection::NotTransitionable => {
            SettlementError::not_transitionable(transfer, status, action)
        }
    }
}

/// Legs of one aggregated transfer for one account, ascending by creation id
#[derive(Debug, Clone)]
pub struct BetGroup {
    transfer_code: String,
    account_code: String,
    legs: Vec<BetRecord>,
}

impl BetGroup {
    pub fn new(
        transfer_code: impl Into<String>,
        account_code: impl Into<String>,
        mut legs: Vec<BetRecord>,
    ) -> Self {
        legs.sort_by_key(|leg| leg.id);
        Self {
            transfer_code: transfer_code.into(),
            account_code: account_code.into(),
            legs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn legs(&self) -> &[BetRecord] {
        &self.legs
    }

    pub fn leg(&self, leg_id: &str) -> Option<&BetRecord> {
        self.legs
            .iter()
            .find(|leg| leg.key.leg_id.as_deref() == Some(leg_id))
    }

    fn not_found(&self, leg_id: Option<&str>) -> SettlementError {
        SettlementError::bet_not_found(&self.account_code, &self.transfer_code, leg_id)
    }

    fn is_eligible(leg: &BetRecord) -> bool {
        matches!(leg.status, BetStatus::Void | BetStatus::Settled)
            && is_nonzero(leg.win_loss)
            && !leg.rolled_back
    }

    /// Choose the leg a settle applies to
    ///
    /// Only one settle is accepted per group: once any leg is settled every
    /// further settle is rejected as already settled.
    pub fn settle_target(&self, leg_id: Option<&str>) -> Result<&BetRecord, SettlementError> {
        if self.legs.is_empty() {
            return Err(self.not_found(leg_id));
        }
        if self.legs.iter().any(|l| l.status == BetStatus::Settled) {
            return Err(SettlementError::already_settled(&self.transfer_code));
        }

        match leg_id {
            Some(id) => {
                let leg = self.leg(id).ok_or_else(|| self.not_found(Some(id)))?;
                leg.status
                    .transition(BetAction::Settle)
                    .map(|_| leg)
                    .map_err(|r| rejection_error(r, &self.transfer_code, leg.status, "settled"))
            }
            None => {
                if let Some(leg) = self.legs.iter().find(|l| l.status == BetStatus::Running) {
                    Ok(leg)
                } else if self.legs.iter().all(|l| l.status == BetStatus::Void) {
                    Err(SettlementError::already_cancelled(&self.transfer_code))
                } else {
                    Err(self.not_found(None))
                }
            }
        }
    }

    /// Plan a cancel of one leg or of the whole group
    ///
    /// With `cancel_all` every leg is cancelled; a leg that is already void or
    /// was rolled back aborts the whole cancel. Without it, `leg_id` names the
    /// single leg, which must still be running.
    pub fn cancel_plan(
        &self,
        leg_id: Option<&str>,
        cancel_all: bool,
    ) -> Result<GroupPlan, SettlementError> {
        let mut plan = GroupPlan::default();

        if cancel_all {
            if self.legs.is_empty() {
                return Err(self.not_found(None));
            }
            for leg in &self.legs {
                if leg.status == BetStatus::Running && leg.rolled_back {
                    return Err(SettlementError::already_rolled_back(&self.transfer_code));
                }
                let to = leg.status.transition(BetAction::Cancel).map_err(|r| {
                    rejection_error(r, &self.transfer_code, leg.status, "cancelled")
                })?;
                plan.push(leg, to, cancel_refund(leg.status, leg.stake, leg.win_loss));
            }
            return Ok(plan);
        }

        let Some(id) = leg_id else {
            return Err(SettlementError::invalid_request(
                "cancelling a single leg requires a leg id",
            ));
        };
        let leg = self.leg(id).ok_or_else(|| self.not_found(Some(id)))?;
        match leg.status {
            BetStatus::Running => {
                plan.push(leg, BetStatus::Void, cancel_refund(leg.status, leg.stake, leg.win_loss));
                Ok(plan)
            }
            BetStatus::Settled => Err(SettlementError::already_settled(&self.transfer_code)),
            BetStatus::Void => Err(SettlementError::already_cancelled(&self.transfer_code)),
        }
    }

    /// Plan a rollback, choosing the leg(s) to restore to running
    pub fn rollback_plan(&self, leg_id: Option<&str>) -> Result<GroupPlan, SettlementError> {
        if self.legs.is_empty() {
            return Err(self.not_found(leg_id));
        }

        let mut plan = GroupPlan::default();

        let any_void = self.legs.iter().any(|l| l.status == BetStatus::Void);
        let any_payout = self.legs.iter().any(|l| is_nonzero(l.win_loss));
        if any_void && !any_payout {
            for leg in self
                .legs
                .iter()
                .filter(|l| l.status == BetStatus::Void && !l.rolled_back)
            {
                plan.push(leg, BetStatus::Running, rollback_delta(leg.status, leg.stake, leg.win_loss));
            }
            if plan.changes.is_empty() {
                return Err(SettlementError::already_rolled_back(&self.transfer_code));
            }
            return Ok(plan);
        }

        if let Some(leg) = leg_id.and_then(|id| self.leg(id)) {
            if !Self::is_eligible(leg) {
                return Err(self.rejected_leg(leg));
            }
            plan.push(leg, BetStatus::Running, rollback_delta(leg.status, leg.stake, leg.win_loss));
            return Ok(plan);
        }

        let candidate = self
            .legs
            .iter()
            .find(|l| l.status == BetStatus::Void && Self::is_eligible(l))
            .or_else(|| {
                self.legs
                    .iter()
                    .find(|l| l.status == BetStatus::Settled && Self::is_eligible(l))
            });

        match candidate {
            Some(leg) => {
                plan.push(leg, BetStatus::Running, rollback_delta(leg.status, leg.stake, leg.win_loss));
                Ok(plan)
            }
            None => {
                let already = self.legs.iter().any(|l| {
                    l.rolled_back || (l.status == BetStatus::Running && is_nonzero(l.win_loss))
                });
                if already {
                    Err(SettlementError::already_rolled_back(&self.transfer_code))
                } else {
                    Err(SettlementError::not_rollback_eligible(&self.transfer_code))
                }
            }
        }
    }

    fn rejected_leg(&self, leg: &BetRecord) -> SettlementError {
        if leg.rolled_back || (leg.status == BetStatus::Running && is_nonzero(leg.win_loss)) {
            SettlementError::already_rolled_back(&self.transfer_code)
        } else {
            SettlementError::not_rollback_eligible(&self.transfer_code)
        }
    }
}
