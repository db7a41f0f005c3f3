//! Persistence contract of the settlement engine
//!
//! The engine never touches storage directly. It opens a [`UnitOfWork`] through
//! a [`WalletStore`], locks exactly one account, reads and writes bet records
//! with status-guarded conditional updates, and commits.
//!
//! # Guarantees an implementation must provide
//!
//! - `lock_account` holds a pessimistic lock on the account row until the unit
//!   is committed or dropped. Units for different accounts never block each
//!   other.
//! - `insert_bet` enforces uniqueness of [`BetKey`] and reports a conflict as
//!   [`StoreError::UniqueViolation`].
//! - `update_bet_guarded` applies the update only if the current row satisfies
//!   the guard and returns the number of rows affected (0 or 1).
//! - Dropping a unit without calling `commit` discards every write it made.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Account, BetGuard, BetId, BetKey, BetRecord, BetUpdate, NewBet, StoreError};

/// Factory of units of work
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Unit of work type handed out by [`WalletStore::begin`]
    type Unit: UnitOfWork + 'static;

    /// Open a new unit of work
    async fn begin(&self) -> Result<Self::Unit, StoreError>;
}

/// One atomic, all-or-nothing scope of reads and writes
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the account row by external code
    ///
    /// # Returns
    ///
    /// * `Ok(Some(account))` - the locked account
    /// * `Ok(None)` - no account with this code exists
    async fn lock_account(&mut self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Find a bet record of the locked account by natural key
    async fn find_bet(&mut self, key: &BetKey) -> Result<Option<BetRecord>, StoreError>;

    /// Find every leg of an aggregated transfer, ascending by creation id
    ///
    /// Records without a leg id are not part of a group and are not returned.
    async fn find_group(
        &mut self,
        transfer_code: &str,
        account_code: &str,
    ) -> Result<Vec<BetRecord>, StoreError>;

    /// Insert a new bet record
    async fn insert_bet(&mut self, bet: NewBet) -> Result<BetRecord, StoreError>;

    /// Apply `update` to bet `id` only if it still satisfies `guard`
    ///
    /// # Returns
    ///
    /// Number of rows affected; `0` means a concurrent writer got there first
    async fn update_bet_guarded(
        &mut self,
        id: BetId,
        guard: &BetGuard,
        update: BetUpdate,
    ) -> Result<u64, StoreError>;

    /// Overwrite the locked account's balance
    async fn update_balance(&mut self, balance: Decimal) -> Result<(), StoreError>;

    /// Make every write of this unit durable and release the lock
    async fn commit(&mut self) -> Result<(), StoreError>;
}
