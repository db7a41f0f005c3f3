//! All-or-nothing behaviour under storage failures
//!
//! `FlakyStore` wraps the in-memory store and fails one chosen call inside
//! the unit of work, or lets another writer settle a bet just before the
//! engine's guarded update. Whatever the engine wrote before the failure must be
//! discarded, the response must carry the transient code, and the account
//! lock must be released for the next operation.

use std::str::FromStr;

use async_trait::async_trait;
use rstest::rstest;
use rust_decimal::Decimal;
use wallet_settlement_engine::config::EngineConfig;
use wallet_settlement_engine::core::{MemoryStore, MemoryUnit, SettlementEngine};
use wallet_settlement_engine::types::{
    Account, BetGuard, BetId, BetKey, BetRecord, BetStatus, BetUpdate, CancelRequest,
    DeductRequest, ErrorCode, Metadata, NewBet, Operation, ProductType, ResultType,
    SettleRequest, StoreError,
};
use wallet_settlement_engine::{UnitOfWork, WalletStore};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fault {
    Begin,
    /// Fail the n-th balance write (1-based)
    BalanceWrite(usize),
    /// Fail the n-th guarded bet update (1-based)
    GuardedUpdate(usize),
    Insert,
    Commit,
    /// Another writer settles the bet just before each guarded update
    SettledConcurrently,
}

#[derive(Debug, Clone)]
struct FlakyStore {
    inner: MemoryStore,
    fault: Fault,
}

struct FlakyUnit {
    inner: MemoryUnit,
    fault: Fault,
    balance_writes: usize,
    guarded_updates: usize,
}

fn injected() -> StoreError {
    StoreError::Backend {
        message: "injected fault".to_string(),
    }
}

#[async_trait]
impl WalletStore for FlakyStore {
    type Unit = FlakyUnit;

    async fn begin(&self) -> Result<FlakyUnit, StoreError> {
        if self.fault == Fault::Begin {
            return Err(injected());
        }
        Ok(FlakyUnit {
            inner: self.inner.begin().await?,
            fault: self.fault,
            balance_writes: 0,
            guarded_updates: 0,
        })
    }
}

#[async_trait]
impl UnitOfWork for FlakyUnit {
    async fn lock_account(&mut self, code: &str) -> Result<Option<Account>, StoreError> {
        self.inner.lock_account(code).await
    }

    async fn find_bet(&mut self, key: &BetKey) -> Result<Option<BetRecord>, StoreError> {
        self.inner.find_bet(key).await
    }

    async fn find_group(
        &mut self,
        transfer_code: &str,
        account_code: &str,
    ) -> Result<Vec<BetRecord>, StoreError> {
        self.inner.find_group(transfer_code, account_code).await
    }

    async fn insert_bet(&mut self, bet: NewBet) -> Result<BetRecord, StoreError> {
        if self.fault == Fault::Insert {
            return Err(injected());
        }
        self.inner.insert_bet(bet).await
    }

    async fn update_bet_guarded(
        &mut self,
        id: BetId,
        guard: &BetGuard,
        update: BetUpdate,
    ) -> Result<u64, StoreError> {
        self.guarded_updates += 1;
        if self.fault == Fault::GuardedUpdate(self.guarded_updates) {
            return Err(injected());
        }
        if self.fault == Fault::SettledConcurrently {
            self.inner
                .update_bet_guarded(
                    id,
                    &BetGuard::status(BetStatus::Running),
                    BetUpdate::status(BetStatus::Settled),
                )
                .await?;
        }
        self.inner.update_bet_guarded(id, guard, update).await
    }

    async fn update_balance(&mut self, balance: Decimal) -> Result<(), StoreError> {
        self.balance_writes += 1;
        if self.fault == Fault::BalanceWrite(self.balance_writes) {
            return Err(injected());
        }
        self.inner.update_balance(balance).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.fault == Fault::Commit {
            return Err(injected());
        }
        self.inner.commit().await
    }
}

const AGGREGATED: ProductType = ProductType(9);

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A clean engine and a flaky one over the same data
fn engines(fault: Fault) -> (SettlementEngine<MemoryStore>, SettlementEngine<FlakyStore>) {
    let store = MemoryStore::new();
    store.open_account("alice", "USD", dec("1000")).unwrap();
    let flaky = FlakyStore {
        inner: store.clone(),
        fault,
    };
    (
        SettlementEngine::new(store, EngineConfig::default()),
        SettlementEngine::new(flaky, EngineConfig::default()),
    )
}

fn deduct(transfer: &str, leg: Option<&str>, amount: &str, product_type: ProductType) -> Operation {
    Operation::Deduct(DeductRequest {
        account_code: "alice".to_string(),
        transfer_code: transfer.to_string(),
        leg_id: leg.map(str::to_string),
        amount: dec(amount),
        product_type,
        ..Default::default()
    })
}

fn settle_win(transfer: &str, win_loss: &str) -> Operation {
    Operation::Settle(SettleRequest {
        account_code: "alice".to_string(),
        transfer_code: transfer.to_string(),
        leg_id: None,
        win_loss: dec(win_loss),
        result_type: ResultType::Win,
        cash_out: false,
        product_type: ProductType(1),
        result_time: None,
        game_result: None,
        metadata: Metadata::new(),
    })
}

async fn balance(engine: &SettlementEngine<MemoryStore>) -> Decimal {
    engine.store().account("alice").await.unwrap().balance
}

#[rstest]
#[case::begin(Fault::Begin)]
#[case::insert(Fault::Insert)]
#[case::balance_write(Fault::BalanceWrite(1))]
#[case::commit(Fault::Commit)]
#[tokio::test]
async fn failed_deduct_leaves_nothing_behind(#[case] fault: Fault) {
    let (clean, flaky) = engines(fault);

    let resp = flaky.execute(deduct("A", None, "100", ProductType(1))).await;

    assert_eq!(resp.error_code, ErrorCode::Transient);
    assert_eq!(resp.error_code.as_i32(), 7);
    assert_eq!(resp.balance, None);
    assert_eq!(balance(&clean).await, dec("1000"));
    assert!(clean.store().bets("alice").await.is_empty());

    // Lock released and key still free
    let resp = clean.execute(deduct("A", None, "100", ProductType(1))).await;
    assert!(resp.is_success());
    assert_eq!(balance(&clean).await, dec("900"));
}

#[tokio::test]
async fn failed_payout_credit_keeps_bet_running() {
    let (clean, flaky) = engines(Fault::BalanceWrite(1));
    clean.execute(deduct("A", None, "100", ProductType(1))).await;

    let resp = flaky.execute(settle_win("A", "250")).await;

    assert_eq!(resp.error_code, ErrorCode::Transient);
    assert_eq!(balance(&clean).await, dec("900"));
    assert_eq!(clean.store().bets("alice").await[0].status, BetStatus::Running);

    assert!(clean.execute(settle_win("A", "250")).await.is_success());
    assert_eq!(balance(&clean).await, dec("1150"));
}

#[tokio::test]
async fn failed_group_cancel_restores_every_leg() {
    let (clean, flaky) = engines(Fault::GuardedUpdate(2));
    clean.execute(deduct("W", Some("L1"), "50", AGGREGATED)).await;
    clean.execute(deduct("W", Some("L2"), "30", AGGREGATED)).await;
    assert_eq!(balance(&clean).await, dec("920"));

    let cancel_all = Operation::Cancel(CancelRequest {
        account_code: "alice".to_string(),
        transfer_code: "W".to_string(),
        leg_id: None,
        cancel_all: true,
        product_type: AGGREGATED,
    });
    let resp = flaky.execute(cancel_all.clone()).await;

    assert_eq!(resp.error_code, ErrorCode::Transient);
    let bets = clean.store().bets("alice").await;
    assert!(bets.iter().all(|b| b.status == BetStatus::Running));
    assert_eq!(balance(&clean).await, dec("920"));

    assert!(clean.execute(cancel_all).await.is_success());
    assert_eq!(balance(&clean).await, dec("1000"));
}

#[tokio::test]
async fn raise_loses_to_concurrent_settle() {
    let (clean, racing) = engines(Fault::SettledConcurrently);
    clean.execute(deduct("W", Some("L1"), "50", AGGREGATED)).await;
    assert_eq!(balance(&clean).await, dec("950"));

    let resp = racing.execute(deduct("W", Some("L1"), "80", AGGREGATED)).await;

    assert_eq!(resp.error_code, ErrorCode::AlreadySettled);
    assert_eq!(resp.balance, Some(dec("950")));
    assert_eq!(balance(&clean).await, dec("950"));
    let bets = clean.store().bets("alice").await;
    assert_eq!(bets[0].stake, dec("50"));
}
