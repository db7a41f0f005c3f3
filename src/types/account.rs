//! Account-related types for the wallet settlement engine
//!
//! This module defines the Account structure holding a player's balance.

use rust_decimal::Decimal;

/// Store-assigned account identifier
pub type AccountId = u64;

/// Player account state
///
/// The balance is kept in internal units (display amount scaled by the
/// currency rate). It is only written while the account row is locked by a
/// unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Store-assigned identifier
    pub id: AccountId,

    /// External account code used by providers (unique)
    pub code: String,

    /// Currency code, e.g. `USD`, `IDR`
    pub currency: String,

    /// Current balance in internal units
    ///
    /// May transiently go negative only through a rollback of a cancelled bet,
    /// which re-debits a stake without a balance check.
    pub balance: Decimal,

    /// Whether the account is active
    pub active: bool,
}

impl Account {
    /// Create a new active account
    ///
    /// # Arguments
    ///
    /// * `id` - Store-assigned identifier
    /// * `code` - External account code
    /// * `currency` - Currency code
    /// * `balance` - Opening balance in internal units
    pub fn new(
        id: AccountId,
        code: impl Into<String>,
        currency: impl Into<String>,
        balance: Decimal,
    ) -> Self {
        Account {
            id,
            code: code.into(),
            currency: currency.into(),
            balance,
            active: true,
        }
    }
}
