//! Currency Normalizer
//!
//! Converts between a provider's display units and an account's internal
//! units. Zero-decimal currencies (IDR, VND by default) are scaled by the
//! configured rate and kept whole; every other currency keeps two decimals at
//! rate 1.
//!
//! ```text
//! to_internal("IDR", 12.5)   = 12500
//! to_display("IDR", 12500)   = 12.5
//! to_internal("USD", 10.005) = 10.01
//! ```

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::EngineConfig;

/// Tolerance for monetary comparisons, in internal units
pub const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Negative residues smaller than this are treated as zero
const NOISE: Decimal = Decimal::from_parts(1, 0, 0, false, 9);

/// Minor-unit precision of regular currencies
const DEFAULT_DECIMALS: u32 = 2;

/// Pure conversion and rounding rules per currency
#[derive(Debug, Clone)]
pub struct CurrencyNormalizer {
    zero_decimal_currencies: Vec<String>,
    zero_decimal_rate: Decimal,
}

impl CurrencyNormalizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            zero_decimal_currencies: config.zero_decimal_currencies.clone(),
            zero_decimal_rate: config.zero_decimal_rate().max(Decimal::ONE),
        }
    }

    fn is_zero_decimal(&self, currency: &str) -> bool {
        let currency = currency.trim();
        self.zero_decimal_currencies
            .iter()
            .any(|c| c.eq_ignore_ascii_case(currency))
    }

    /// Scale factor between display and internal units
    pub fn rate_for(&self, currency: &str) -> Decimal {
        if self.is_zero_decimal(currency) {
            self.zero_decimal_rate
        } else {
            Decimal::ONE
        }
    }

    /// Number of decimals kept in internal units
    pub fn decimals_for(&self, currency: &str) -> u32 {
        if self.is_zero_decimal(currency) {
            0
        } else {
            DEFAULT_DECIMALS
        }
    }

    /// Convert a display amount to internal units
    ///
    /// # Returns
    ///
    /// `None` if the scaled amount does not fit in a `Decimal`
    pub fn to_internal(&self, currency: &str, display: Decimal) -> Option<Decimal> {
        let scaled = display.checked_mul(self.rate_for(currency))?;
        Some(self.round_internal(currency, scaled))
    }

    /// Convert internal units back to a display amount
    pub fn to_display(&self, currency: &str, internal: Decimal) -> Decimal {
        (internal / self.rate_for(currency)).normalize()
    }

    /// Round to the currency's minor-unit precision
    ///
    /// Midpoints round away from zero. Negative floating residues and negative
    /// zero collapse to exactly `0`.
    pub fn round_internal(&self, currency: &str, value: Decimal) -> Decimal {
        if value < Decimal::ZERO && value > -NOISE {
            return Decimal::ZERO;
        }

        let rounded = value.round_dp_with_strategy(
            self.decimals_for(currency),
            RoundingStrategy::MidpointAwayFromZero,
        );

        if rounded.is_zero() {
            Decimal::ZERO
        } else {
            rounded
        }
    }
}

/// Whether `needed` exceeds `available` by more than [`EPSILON`]
pub fn exceeds(needed: Decimal, available: Decimal) -> bool {
    needed > available + EPSILON
}

/// Whether two amounts are equal within [`EPSILON`]
pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= EPSILON
}

/// Whether an amount is non-zero beyond [`EPSILON`]
pub fn is_nonzero(value: Decimal) -> bool {
    value.abs() > EPSILON
}
