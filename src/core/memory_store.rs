//! In-memory reference implementation of the wallet store
//!
//! # Design
//!
//! Each account owns a `Ledger` (the account row plus its bet records) behind a
//! `tokio::sync::Mutex`. The ledgers live in a `DashMap` keyed by account code,
//! so locking an account only contends with units of work for that same
//! account, mirroring a `SELECT ... FOR UPDATE` on the account row.
//!
//! ```text
//! MemoryStore
//!     └── DashMap<code, Arc<Mutex<Ledger>>>
//!             └── Ledger { account, bets, index }
//!
//! MemoryUnit
//!     ├── OwnedMutexGuard<Ledger>   (row lock, held until commit/drop)
//!     └── journal: Vec<Undo>        (replayed in reverse on drop)
//! ```
//!
//! Writes are applied to the ledger immediately and journaled. Commit clears
//! the journal; dropping an uncommitted unit undoes every write, including when
//! the owning task panics or is cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use super::store::{UnitOfWork, WalletStore};
use crate::types::{
    Account, BetGuard, BetId, BetKey, BetRecord, BetUpdate, NewBet, StoreError,
};

/// One account row and its bet records
#[derive(Debug)]
struct Ledger {
    account: Account,
    bets: Vec<BetRecord>,
    index: HashMap<BetKey, usize>,
}

impl Ledger {
    fn new(account: Account) -> Self {
        Self {
            account,
            bets: Vec::new(),
            index: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    ledgers: DashMap<String, Arc<Mutex<Ledger>>>,
    next_account_id: AtomicU64,
    next_bet_id: AtomicU64,
}

/// Thread-safe in-memory store
///
/// Cloning is cheap and every clone sees the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account
    ///
    /// # Arguments
    ///
    /// * `code` - External account code (unique)
    /// * `currency` - Currency code
    /// * `balance` - Opening balance in internal units
    ///
    /// # Returns
    ///
    /// * `Ok(Account)` - the created account
    /// * `Err(StoreError::UniqueViolation)` - the code is already taken
    pub fn open_account(
        &self,
        code: &str,
        currency: &str,
        balance: Decimal,
    ) -> Result<Account, StoreError> {
        let id = self.shared.next_account_id.fetch_add(1, Ordering::Relaxed) + 1;
        let account = Account::new(id, code, currency.trim().to_ascii_uppercase(), balance);

        let mut created = false;
        self.shared
            .ledgers
            .entry(code.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(Ledger::new(account.clone())))
            });

        if created {
            Ok(account)
        } else {
            Err(StoreError::UniqueViolation {
                key: format!("account {}", code),
            })
        }
    }

    fn ledger(&self, code: &str) -> Option<Arc<Mutex<Ledger>>> {
        self.shared
            .ledgers
            .get(code)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of one account
    ///
    /// Waits for any unit of work holding the account lock to finish.
    pub async fn account(&self, code: &str) -> Option<Account> {
        let ledger = self.ledger(code)?;
        let guard = ledger.lock().await;
        Some(guard.account.clone())
    }

    /// Snapshot of all accounts, sorted by code
    pub async fn accounts(&self) -> Vec<Account> {
        let cells: Vec<Arc<Mutex<Ledger>>> = self
            .shared
            .ledgers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut accounts = Vec::with_capacity(cells.len());
        for cell in cells {
            accounts.push(cell.lock().await.account.clone());
        }
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        accounts
    }

    /// Snapshot of an account's bet records in creation order
    pub async fn bets(&self, code: &str) -> Vec<BetRecord> {
        match self.ledger(code) {
            Some(ledger) => ledger.lock().await.bets.clone(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        Ok(MemoryUnit {
            shared: Arc::clone(&self.shared),
            ledger: None,
            journal: Vec::new(),
            committed: false,
        })
    }
}

#[derive(Debug)]
enum Undo {
    Balance(Decimal),
    Inserted,
    Replaced(usize, BetRecord),
}

/// Unit of work over a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryUnit {
    shared: Arc<Shared>,
    ledger: Option<OwnedMutexGuard<Ledger>>,
    journal: Vec<Undo>,
    committed: bool,
}

impl MemoryUnit {
    fn locked(&mut self) -> Result<&mut Ledger, StoreError> {
        self.ledger
            .as_deref_mut()
            .ok_or(StoreError::NoAccountLocked)
    }

    fn check_scope(ledger: &Ledger, account_code: &str) -> Result<(), StoreError> {
        if ledger.account.code == account_code {
            Ok(())
        } else {
            Err(StoreError::AccountAlreadyLocked {
                code: ledger.account.code.clone(),
            })
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_account(&mut self, code: &str) -> Result<Option<Account>, StoreError> {
        if let Some(ledger) = &self.ledger {
            return Err(StoreError::AccountAlreadyLocked {
                code: ledger.account.code.clone(),
            });
        }

        // The DashMap shard guard must be released before awaiting the row lock
        let cell = match self.shared.ledgers.get(code) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(None),
        };

        let guard = cell.lock_owned().await;
        let account = guard.account.clone();
        self.ledger = Some(guard);
        trace!(account = %code, "account locked");
        Ok(Some(account))
    }

    async fn find_bet(&mut self, key: &BetKey) -> Result<Option<BetRecord>, StoreError> {
        let ledger = self.locked()?;
        Self::check_scope(ledger, &key.account_code)?;
        Ok(ledger.index.get(key).map(|&pos| ledger.bets[pos].clone()))
    }

    async fn find_group(
        &mut self,
        transfer_code: &str,
        account_code: &str,
    ) -> Result<Vec<BetRecord>, StoreError> {
        let ledger = self.locked()?;
        Self::check_scope(ledger, account_code)?;

        // Records are appended in id order, so the filter keeps ascending ids
        Ok(ledger
            .bets
            .iter()
            .filter(|b| b.key.transfer_code == transfer_code && b.key.leg_id.is_some())
            .cloned()
            .collect())
    }

    async fn insert_bet(&mut self, bet: NewBet) -> Result<BetRecord, StoreError> {
        let shared = Arc::clone(&self.shared);
        let ledger = self.locked()?;
        Self::check_scope(ledger, &bet.key.account_code)?;

        if ledger.index.contains_key(&bet.key) {
            return Err(StoreError::UniqueViolation {
                key: bet.key.to_string(),
            });
        }

        let now = Utc::now();
        let record = BetRecord {
            id: shared.next_bet_id.fetch_add(1, Ordering::Relaxed) + 1,
            key: bet.key,
            stake: bet.stake,
            win_loss: bet.win_loss,
            status: bet.status,
            rolled_back: false,
            cash_out: false,
            currency: bet.currency,
            product_type: bet.product_type,
            metadata: bet.metadata,
            created_at: now,
            updated_at: now,
        };

        ledger.index.insert(record.key.clone(), ledger.bets.len());
        ledger.bets.push(record.clone());
        self.journal.push(Undo::Inserted);
        Ok(record)
    }

    async fn update_bet_guarded(
        &mut self,
        id: BetId,
        guard: &BetGuard,
        update: BetUpdate,
    ) -> Result<u64, StoreError> {
        let ledger = self.locked()?;

        let Some(pos) = ledger.bets.iter().position(|b| b.id == id) else {
            return Ok(0);
        };
        if !guard.admits(&ledger.bets[pos]) {
            return Ok(0);
        }

        let previous = ledger.bets[pos].clone();
        let bet = &mut ledger.bets[pos];
        update.apply(bet);
        bet.updated_at = Utc::now();
        self.journal.push(Undo::Replaced(pos, previous));
        Ok(1)
    }

    async fn update_balance(&mut self, balance: Decimal) -> Result<(), StoreError> {
        let ledger = self.locked()?;
        let previous = ledger.account.balance;
        ledger.account.balance = balance;
        self.journal.push(Undo::Balance(previous));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.committed = true;
        self.journal.clear();
        // Releasing the guard releases the row lock
        self.ledger = None;
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if self.committed || self.journal.is_empty() {
            return;
        }
        let Some(ledger) = self.ledger.as_deref_mut() else {
            return;
        };

        trace!(
            account = %ledger.account.code,
            writes = self.journal.len(),
            "rolling back uncommitted unit of work"
        );

        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Balance(previous) => ledger.account.balance = previous,
                Undo::Inserted => {
                    if let Some(record) = ledger.bets.pop() {
                        ledger.index.remove(&record.key);
                    }
                }
                Undo::Replaced(pos, previous) => ledger.bets[pos] = previous,
            }
        }
    }
}
