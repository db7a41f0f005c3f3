//! Settlement Engine
//!
//! This module provides the `SettlementEngine`, which applies one canonical
//! [`Operation`] as one unit of work against a [`WalletStore`].
//!
//! # Unit of work
//!
//! Every operation follows the same skeleton:
//!
//! ```text
//! validate ─► begin ─► lock account ─► normalise balance
//!                                           │
//!           ┌───────────────────────────────┘
//!           ▼
//!   idempotency probe ─► status-guarded record update ─► balance delta ─► commit
//! ```
//!
//! Any error drops the unit, which discards every write it made. Business
//! rejections report the balance as it was before the operation; storage
//! failures report no balance at all.
//!
//! # Thread Safety
//!
//! The engine is cheap to clone and can be shared across tasks. It holds no
//! mutable state of its own; serialisation per account is provided by the
//! store's account lock.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::currency::{approx_eq, exceeds, CurrencyNormalizer};
use super::group::{cancel_refund, rejection_error, rollback_delta, BetGroup};
use super::store::{UnitOfWork, WalletStore};
use crate::config::EngineConfig;
use crate::types::{
    Account, BalanceRequest, BetAction, BetGuard, BetKey, BetRecord, BetStatus, BetUpdate,
    BonusRequest, CancelBonusRequest, CancelRequest, DeductRequest, ErrorCode, Metadata, NewBet,
    Operation, OperationResponse, ResultType, RollbackRequest, SettleRequest, SettlementError,
    StoreError,
};

/// Result of a successful operation body: the echoed bet amount, if any
type Applied = Result<Option<Decimal>, SettlementError>;

/// Orchestrates the wallet operations against a store
#[derive(Debug, Clone)]
pub struct SettlementEngine<S> {
    store: S,
    config: Arc<EngineConfig>,
    normalizer: CurrencyNormalizer,
}

impl<S: WalletStore> SettlementEngine<S> {
    /// Create a new SettlementEngine
    ///
    /// # Arguments
    ///
    /// * `store` - Store handing out units of work
    /// * `config` - Engine configuration; invalid values are replaced by defaults
    pub fn new(store: S, config: EngineConfig) -> Self {
        let config = config.validated();
        let normalizer = CurrencyNormalizer::new(&config);
        Self {
            store,
            config: Arc::new(config),
            normalizer,
        }
    }

    /// Store the engine opens its units of work on
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Currency normalizer built from the engine configuration
    pub fn normalizer(&self) -> &CurrencyNormalizer {
        &self.normalizer
    }

    /// Apply one operation
    ///
    /// Never fails: every outcome, including storage failures, is reported
    /// through the response's error code.
    pub async fn execute(&self, mut operation: Operation) -> OperationResponse {
        operation.normalize();
        let span = info_span!(
            "operation",
            op = operation.name(),
            account = %operation.account_code(),
            transfer = %operation.transfer_code(),
        );
        self.run(operation).instrument(span).await
    }

    pub async fn deduct(&self, request: DeductRequest) -> OperationResponse {
        self.execute(Operation::Deduct(request)).await
    }

    pub async fn settle(&self, request: SettleRequest) -> OperationResponse {
        self.execute(Operation::Settle(request)).await
    }

    pub async fn cancel(&self, request: CancelRequest) -> OperationResponse {
        self.execute(Operation::Cancel(request)).await
    }

    pub async fn rollback(&self, request: RollbackRequest) -> OperationResponse {
        self.execute(Operation::Rollback(request)).await
    }

    pub async fn credit_bonus(&self, request: BonusRequest) -> OperationResponse {
        self.execute(Operation::Bonus(request)).await
    }

    pub async fn cancel_bonus(&self, request: CancelBonusRequest) -> OperationResponse {
        self.execute(Operation::CancelBonus(request)).await
    }

    pub async fn balance(&self, request: BalanceRequest) -> OperationResponse {
        self.execute(Operation::Balance(request)).await
    }

    async fn run(&self, operation: Operation) -> OperationResponse {
        if let Err(err) = operation.validate() {
            debug!(error = %err, "rejected before locking");
            return self.respond(&operation, None, Err(err));
        }

        let mut unit = match self.store.begin().await {
            Ok(unit) => unit,
            Err(err) => {
                error!(error = %err, "failed to open unit of work");
                return self.respond(&operation, None, Err(err.into()));
            }
        };

        let mut account = match unit.lock_account(operation.account_code()).await {
            Ok(Some(account)) if account.active => account,
            Ok(_) => {
                let err = SettlementError::account_not_found(operation.account_code());
                debug!(error = %err, "rejected");
                return self.respond(&operation, None, Err(err));
            }
            Err(err) => {
                error!(error = %err, "failed to lock account");
                return self.respond(&operation, None, Err(err.into()));
            }
        };
        let opening = account.clone();

        let result = match self.normalize_balance(&mut unit, &mut account).await {
            Ok(()) => self.dispatch(&mut unit, &mut account, &operation).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(bet_amount) => match unit.commit().await {
                Ok(()) => self.respond(&operation, Some(&account), Ok(bet_amount)),
                Err(err) => {
                    error!(error = %err, "commit failed");
                    self.respond(&operation, None, Err(err.into()))
                }
            },
            Err(err) => {
                // Dropping the unit discards its writes
                drop(unit);
                if err.is_transient() {
                    error!(error = %err, "unit of work rolled back");
                } else {
                    debug!(code = err.code().as_i32(), error = %err, "rejected");
                }
                self.respond(&operation, Some(&opening), Err(err))
            }
        }
    }

    async fn dispatch(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        operation: &Operation,
    ) -> Applied {
        match operation {
            Operation::Deduct(req) => self.apply_deduct(unit, account, req).await,
            Operation::Settle(req) => self.apply_settle(unit, account, req).await,
            Operation::Cancel(req) => self.apply_cancel(unit, account, req).await,
            Operation::Rollback(req) => self.apply_rollback(unit, account, req).await,
            Operation::Bonus(req) => self.apply_bonus(unit, account, req).await,
            Operation::CancelBonus(req) => {
                let key = BetKey::single(&req.transfer_code, &account.code);
                let bet = unit.find_bet(&key).await?.ok_or_else(|| {
                    SettlementError::bet_not_found(&account.code, &req.transfer_code, None)
                })?;
                self.reverse_bonus(unit, account, bet).await
            }
            Operation::Balance(_) => Ok(None),
        }
    }

    fn respond(
        &self,
        operation: &Operation,
        account: Option<&Account>,
        result: Applied,
    ) -> OperationResponse {
        let (error_code, message, bet_amount, account) = match result {
            Ok(bet_amount) => (ErrorCode::Success, "OK".to_string(), bet_amount, account),
            Err(err) => {
                let account = if err.is_transient() { None } else { account };
                (err.code(), err.to_string(), None, account)
            }
        };

        OperationResponse {
            operation: operation.name(),
            error_code,
            message,
            account_code: operation.account_code().to_string(),
            transfer_code: operation.transfer_code().to_string(),
            currency: account.map(|a| a.currency.clone()),
            balance: account.map(|a| self.normalizer.to_display(&a.currency, a.balance)),
            bet_amount,
        }
    }

    /// Re-round a locked balance and persist it if rounding changed it
    async fn normalize_balance(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
    ) -> Result<(), SettlementError> {
        let normalized = self.normalizer.round_internal(&account.currency, account.balance);
        if normalized != account.balance {
            debug!(from = %account.balance, to = %normalized, "normalised stored balance");
            unit.update_balance(normalized).await?;
            account.balance = normalized;
        }
        Ok(())
    }

    /// Add `delta` to the locked balance and persist it
    async fn apply_delta(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        delta: Decimal,
        operation: &str,
    ) -> Result<(), SettlementError> {
        if delta.is_zero() {
            return Ok(());
        }
        let next = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| SettlementError::arithmetic_overflow(operation, &account.code))?;
        let next = self.normalizer.round_internal(&account.currency, next);
        unit.update_balance(next).await?;
        account.balance = next;
        Ok(())
    }

    fn to_internal(
        &self,
        account: &Account,
        amount: Decimal,
        operation: &str,
    ) -> Result<Decimal, SettlementError> {
        self.normalizer
            .to_internal(&account.currency, amount)
            .ok_or_else(|| SettlementError::arithmetic_overflow(operation, &account.code))
    }

    fn ensure_funds(account: &Account, needed: Decimal) -> Result<(), SettlementError> {
        if exceeds(needed, account.balance) {
            Err(SettlementError::insufficient_balance(
                &account.code,
                account.balance,
                needed,
            ))
        } else {
            Ok(())
        }
    }

    fn bet_key(
        &self,
        aggregated: bool,
        transfer_code: &str,
        account: &Account,
        leg_id: Option<&str>,
    ) -> Result<BetKey, SettlementError> {
        match (aggregated, leg_id) {
            (true, Some(leg)) => Ok(BetKey::leg(transfer_code, &account.code, leg)),
            (true, None) => Err(SettlementError::invalid_request(
                "aggregated transfers require a leg id",
            )),
            (false, _) => Ok(BetKey::single(transfer_code, &account.code)),
        }
    }

    /// Explain a guarded update that affected no rows
    ///
    /// Reads the record again and reports the terminal state another writer
    /// moved it to. Never retries.
    async fn guard_lost(
        &self,
        unit: &mut S::Unit,
        key: &BetKey,
        action: &'static str,
    ) -> SettlementError {
        warn!(bet = %key, action, "status guard affected no rows");
        match unit.find_bet(key).await {
            Ok(Some(bet)) => match bet.status {
                BetStatus::Settled => SettlementError::already_settled(&key.transfer_code),
                BetStatus::Void => SettlementError::already_cancelled(&key.transfer_code),
                BetStatus::Running if bet.rolled_back => {
                    SettlementError::already_rolled_back(&key.transfer_code)
                }
                BetStatus::Running => {
                    SettlementError::not_transitionable(&key.transfer_code, bet.status, action)
                }
            },
            Ok(None) => SettlementError::bet_not_found(
                &key.account_code,
                &key.transfer_code,
                key.leg_id.as_deref(),
            ),
            Err(err) => err.into(),
        }
    }

    async fn guarded(
        &self,
        unit: &mut S::Unit,
        bet: &BetRecord,
        guard: BetGuard,
        update: BetUpdate,
        action: &'static str,
    ) -> Result<(), SettlementError> {
        if unit.update_bet_guarded(bet.id, &guard, update).await? == 0 {
            return Err(self.guard_lost(unit, &bet.key, action).await);
        }
        Ok(())
    }

    async fn apply_deduct(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        req: &DeductRequest,
    ) -> Applied {
        let aggregated = self.config.is_aggregated(req.product_type);
        let key = self.bet_key(aggregated, &req.transfer_code, account, req.leg_id.as_deref())?;
        let stake = self.to_internal(account, req.amount, "deduct")?;
        let echoed = req
            .commission_stake
            .filter(|c| *c > Decimal::ZERO)
            .unwrap_or(req.amount);

        let Some(existing) = unit.find_bet(&key).await? else {
            Self::ensure_funds(account, stake)?;

            let mut metadata = req.metadata.clone();
            if let Some(commission) = req.commission_stake.filter(|c| *c > Decimal::ZERO) {
                metadata.insert(
                    "commissionStake".to_string(),
                    Value::String(commission.to_string()),
                );
            }

            let new_bet = NewBet {
                key,
                stake,
                win_loss: Decimal::ZERO,
                status: BetStatus::Running,
                currency: account.currency.clone(),
                product_type: req.product_type,
                metadata,
            };
            match unit.insert_bet(new_bet).await {
                Ok(_) => {}
                Err(StoreError::UniqueViolation { .. }) => {
                    return Err(SettlementError::duplicate(&account.code, &req.transfer_code))
                }
                Err(err) => return Err(err.into()),
            }

            let delta = -stake;
            self.apply_delta(unit, account, delta, "deduct").await?;
            info!(delta = %delta, balance = %account.balance, "stake deducted");
            return Ok(Some(echoed));
        };

        if existing.status != BetStatus::Running || !self.config.is_incremental(req.product_type) {
            return Err(SettlementError::duplicate(&account.code, &req.transfer_code));
        }
        if approx_eq(stake, existing.stake) {
            debug!(stake = %stake, "repeated deduct with unchanged stake");
            return Ok(Some(echoed));
        }
        if stake < existing.stake {
            return Err(SettlementError::stake_decrease(
                &req.transfer_code,
                existing.stake,
                stake,
            ));
        }

        let difference = stake - existing.stake;
        Self::ensure_funds(account, difference)?;
        self.guarded(
            unit,
            &existing,
            BetGuard::status(BetStatus::Running),
            BetUpdate::stake(stake).with_product_type(req.product_type),
            "raised",
        )
        .await?;
        let delta = -difference;
        self.apply_delta(unit, account, delta, "deduct").await?;
        info!(
            delta = %delta,
            stake = %stake,
            balance = %account.balance,
            "stake raised"
        );
        Ok(Some(echoed))
    }

    async fn apply_settle(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        req: &SettleRequest,
    ) -> Applied {
        let win_loss = self.to_internal(account, req.win_loss, "settle")?;

        if self.config.is_aggregated(req.product_type) {
            let legs = unit.find_group(&req.transfer_code, &account.code).await?;
            let group = BetGroup::new(&req.transfer_code, &account.code, legs);
            let target = group.settle_target(req.leg_id.as_deref())?.clone();

            self.guarded(
                unit,
                &target,
                BetGuard::status(BetStatus::Running),
                BetUpdate::status(BetStatus::Settled)
                    .with_win_loss(win_loss)
                    .with_rolled_back(false)
                    .with_cash_out(req.cash_out),
                "settled",
            )
            .await?;

            // A losing leg takes its win/loss back out; rollback and cancel reverse the same amount
            if win_loss < Decimal::ZERO {
                Self::ensure_funds(account, -win_loss)?;
            }
            let credit = win_loss;
            self.apply_delta(unit, account, credit, "settle").await?;
            info!(
                leg = target.key.leg_id.as_deref().unwrap_or_default(),
                delta = %credit,
                balance = %account.balance,
                "leg settled"
            );
            return Ok(None);
        }

        let key = BetKey::single(&req.transfer_code, &account.code);
        let bet = unit
            .find_bet(&key)
            .await?
            .ok_or_else(|| SettlementError::bet_not_found(&account.code, &req.transfer_code, None))?;
        bet.status
            .transition(BetAction::Settle)
            .map_err(|r| rejection_error(r, &req.transfer_code, bet.status, "settled"))?;

        let credit = if req.cash_out {
            win_loss
        } else {
            match req.result_type {
                ResultType::Win => win_loss,
                ResultType::Lose => Decimal::ZERO,
                ResultType::Draw => bet.stake,
            }
        };

        let metadata = self.settlement_metadata(&bet, req);
        self.guarded(
            unit,
            &bet,
            BetGuard::status(BetStatus::Running),
            BetUpdate::status(BetStatus::Settled)
                .with_win_loss(win_loss)
                .with_rolled_back(false)
                .with_cash_out(req.cash_out)
                .with_metadata(metadata),
            "settled",
        )
        .await?;

        if credit > Decimal::ZERO {
            self.apply_delta(unit, account, credit, "settle").await?;
        }
        info!(
            result = req.result_type.as_str(),
            cash_out = req.cash_out,
            delta = %credit,
            balance = %account.balance,
            "bet settled"
        );
        Ok(None)
    }

    fn settlement_metadata(&self, bet: &BetRecord, req: &SettleRequest) -> Metadata {
        let mut metadata = bet.metadata.clone();
        metadata.extend(req.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        metadata.insert(
            "settledAt".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        metadata.insert(
            "resultType".to_string(),
            Value::String(req.result_type.as_str().to_string()),
        );
        if let Some(time) = &req.result_time {
            metadata.insert("resultTime".to_string(), Value::String(normalize_time(time)));
        }
        if let Some(game_result) = &req.game_result {
            metadata.insert("gameResult".to_string(), Value::String(game_result.clone()));
        }
        metadata
    }

    async fn apply_cancel(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        req: &CancelRequest,
    ) -> Applied {
        if self.config.is_aggregated(req.product_type) {
            let legs = unit.find_group(&req.transfer_code, &account.code).await?;
            let group = BetGroup::new(&req.transfer_code, &account.code, legs);

            if group.is_empty() {
                // Promotions may be booked as a single pseudo-bet under the same transfer
                let key = BetKey::single(&req.transfer_code, &account.code);
                return match unit.find_bet(&key).await? {
                    Some(bet) => self.reverse_bonus(unit, account, bet).await,
                    None => Err(SettlementError::bet_not_found(
                        &account.code,
                        &req.transfer_code,
                        req.leg_id.as_deref(),
                    )),
                };
            }

            let plan = group.cancel_plan(req.leg_id.as_deref(), req.cancel_all)?;
            for change in &plan.changes {
                let Some(leg) = group.legs().iter().find(|l| l.id == change.id) else {
                    continue;
                };
                self.guarded(
                    unit,
                    leg,
                    BetGuard::status(change.from),
                    BetUpdate::status(change.to),
                    "cancelled",
                )
                .await?;
            }

            self.apply_delta(unit, account, plan.total, "cancel").await?;
            info!(
                legs = plan.changes.len(),
                cancel_all = req.cancel_all,
                delta = %plan.total,
                balance = %account.balance,
                "legs cancelled"
            );
            return Ok(None);
        }

        let key = BetKey::single(&req.transfer_code, &account.code);
        let bet = unit
            .find_bet(&key)
            .await?
            .ok_or_else(|| SettlementError::bet_not_found(&account.code, &req.transfer_code, None))?;
        let to = bet
            .status
            .transition(BetAction::Cancel)
            .map_err(|r| rejection_error(r, &req.transfer_code, bet.status, "cancelled"))?;
        let refund = cancel_refund(bet.status, bet.stake, bet.win_loss);

        self.guarded(
            unit,
            &bet,
            BetGuard::status(bet.status),
            BetUpdate::status(to),
            "cancelled",
        )
        .await?;
        self.apply_delta(unit, account, refund, "cancel").await?;
        info!(
            from = %bet.status,
            delta = %refund,
            balance = %account.balance,
            "bet cancelled"
        );
        Ok(None)
    }

    async fn apply_rollback(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        req: &RollbackRequest,
    ) -> Applied {
        let restore = BetUpdate::status(BetStatus::Running)
            .with_rolled_back(true)
            .with_cash_out(false);

        if self.config.is_aggregated(req.product_type) {
            let legs = unit.find_group(&req.transfer_code, &account.code).await?;
            let group = BetGroup::new(&req.transfer_code, &account.code, legs);
            let plan = group.rollback_plan(req.leg_id.as_deref())?;

            for change in &plan.changes {
                let Some(leg) = group.legs().iter().find(|l| l.id == change.id) else {
                    continue;
                };
                self.guarded(
                    unit,
                    leg,
                    BetGuard::status(change.from).not_rolled_back(),
                    restore.clone(),
                    "rolled back",
                )
                .await?;
            }

            // Re-debiting a cancelled stake may take the balance below zero
            self.apply_delta(unit, account, plan.total, "rollback").await?;
            info!(
                legs = ?plan.changes.iter().map(|c| c.leg_id.as_str()).collect::<Vec<_>>(),
                delta = %plan.total,
                balance = %account.balance,
                "legs rolled back"
            );
            return Ok(None);
        }

        let key = BetKey::single(&req.transfer_code, &account.code);
        let bet = unit
            .find_bet(&key)
            .await?
            .ok_or_else(|| SettlementError::bet_not_found(&account.code, &req.transfer_code, None))?;
        if bet.rolled_back {
            return Err(SettlementError::already_rolled_back(&req.transfer_code));
        }
        bet.status
            .transition(BetAction::Rollback)
            .map_err(|r| rejection_error(r, &req.transfer_code, bet.status, "rolled back"))?;
        let delta = rollback_delta(bet.status, bet.stake, bet.win_loss);

        self.guarded(
            unit,
            &bet,
            BetGuard::status(bet.status).not_rolled_back(),
            restore,
            "rolled back",
        )
        .await?;
        self.apply_delta(unit, account, delta, "rollback").await?;
        info!(
            from = %bet.status,
            delta = %delta,
            balance = %account.balance,
            "bet rolled back"
        );
        Ok(None)
    }

    async fn apply_bonus(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        req: &BonusRequest,
    ) -> Applied {
        let key = BetKey::single(&req.transfer_code, &account.code);
        if unit.find_bet(&key).await?.is_some() {
            return Err(SettlementError::duplicate(&account.code, &req.transfer_code));
        }
        let credit = self.to_internal(account, req.amount, "bonus")?;

        let mut metadata = req.metadata.clone();
        metadata.insert("bonus".to_string(), Value::Bool(true));
        metadata.insert(
            "creditedAt".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        metadata.insert(
            "isGameProviderPromotion".to_string(),
            Value::Bool(req.game_provider_promotion),
        );
        if let Some(provider) = &req.provider {
            metadata.insert("bonusProvider".to_string(), Value::String(provider.clone()));
        }

        let new_bet = NewBet {
            key,
            stake: Decimal::ZERO,
            win_loss: credit,
            status: BetStatus::Settled,
            currency: account.currency.clone(),
            product_type: Default::default(),
            metadata,
        };
        match unit.insert_bet(new_bet).await {
            Ok(_) => {}
            Err(StoreError::UniqueViolation { .. }) => {
                return Err(SettlementError::duplicate(&account.code, &req.transfer_code))
            }
            Err(err) => return Err(err.into()),
        }

        self.apply_delta(unit, account, credit, "bonus").await?;
        info!(delta = %credit, balance = %account.balance, "bonus credited");
        Ok(None)
    }

    /// Take back a credited bonus and void its pseudo-bet
    ///
    /// Records that are not bonuses are reported as not found.
    async fn reverse_bonus(
        &self,
        unit: &mut S::Unit,
        account: &mut Account,
        bet: BetRecord,
    ) -> Applied {
        let transfer = bet.key.transfer_code.clone();
        if !bet.is_bonus() {
            return Err(SettlementError::bet_not_found(&account.code, &transfer, None));
        }
        match bet.status {
            BetStatus::Settled => {}
            BetStatus::Void => return Err(SettlementError::already_cancelled(&transfer)),
            BetStatus::Running => {
                return Err(SettlementError::not_transitionable(
                    &transfer,
                    bet.status,
                    "cancelled",
                ))
            }
        }

        self.guarded(
            unit,
            &bet,
            BetGuard::status(BetStatus::Settled),
            BetUpdate::status(BetStatus::Void),
            "cancelled",
        )
        .await?;
        let delta = -bet.win_loss;
        self.apply_delta(unit, account, delta, "cancel bonus").await?;
        info!(delta = %delta, balance = %account.balance, "bonus reversed");
        Ok(None)
    }
}

/// Normalise a provider timestamp to RFC 3339, leaving unknown formats as-is
fn normalize_time(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true);
        }
    }
    raw.to_string()
}
