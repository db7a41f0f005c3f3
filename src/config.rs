//! Engine and logging configuration
//!
//! Configuration is optional: every field has a default, and a YAML file may
//! override any subset of them.
//!
//! ```yaml
//! engine:
//!   aggregated_product_types: [9]
//!   incremental_product_types: [3, 7, 9]
//!   zero_decimal_currencies: [IDR, VND]
//!   zero_decimal_rate: 1000
//! logging:
//!   level: debug
//!   json: true
//! ```

use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::ProductType;

/// Errors while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file, or defaults when no path is given
    ///
    /// The engine section is validated after parsing; invalid values fall back
    /// to their defaults with a warning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        Ok(AppConfig {
            engine: config.engine.validated(),
            logging: config.logging,
        })
    }
}

/// Settlement engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Product types whose transfers fan out into legs keyed by leg id
    pub aggregated_product_types: Vec<ProductType>,

    /// Product types where a repeated deduct may raise a running stake
    pub incremental_product_types: Vec<ProductType>,

    /// Currencies without a fractional minor unit
    pub zero_decimal_currencies: Vec<String>,

    /// Scale between display and internal units for zero-decimal currencies
    pub zero_decimal_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aggregated_product_types: vec![ProductType(9)],
            incremental_product_types: vec![ProductType(3), ProductType(7), ProductType(9)],
            zero_decimal_currencies: vec!["IDR".to_string(), "VND".to_string()],
            zero_decimal_rate: 1000,
        }
    }
}

impl EngineConfig {
    /// Replace invalid values with defaults
    pub fn validated(self) -> Self {
        let default = Self::default();

        let zero_decimal_rate = if self.zero_decimal_rate == 0 {
            warn!(
                "Invalid zero_decimal_rate ({}), using default ({})",
                self.zero_decimal_rate, default.zero_decimal_rate
            );
            default.zero_decimal_rate
        } else {
            self.zero_decimal_rate
        };

        let aggregated_product_types = if self.aggregated_product_types.is_empty() {
            warn!(
                "Empty aggregated_product_types, using default ({:?})",
                default.aggregated_product_types
            );
            default.aggregated_product_types
        } else {
            self.aggregated_product_types
        };

        let incremental_product_types = if self.incremental_product_types.is_empty() {
            warn!(
                "Empty incremental_product_types, using default ({:?})",
                default.incremental_product_types
            );
            default.incremental_product_types
        } else {
            self.incremental_product_types
        };

        let zero_decimal_currencies = self
            .zero_decimal_currencies
            .into_iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();

        Self {
            aggregated_product_types,
            incremental_product_types,
            zero_decimal_currencies,
            zero_decimal_rate,
        }
    }

    pub fn is_aggregated(&self, product_type: ProductType) -> bool {
        self.aggregated_product_types.contains(&product_type)
    }

    pub fn is_incremental(&self, product_type: ProductType) -> bool {
        self.incremental_product_types.contains(&product_type)
    }

    pub fn is_zero_decimal(&self, currency: &str) -> bool {
        self.zero_decimal_currencies
            .iter()
            .any(|c| c.eq_ignore_ascii_case(currency.trim()))
    }

    pub fn zero_decimal_rate(&self) -> Decimal {
        Decimal::from(self.zero_decimal_rate)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `wallet_settlement_engine=debug`
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_without_path() {
        let config = AppConfig::load(None).unwrap();

        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  json: true\nengine:\n  zero_decimal_currencies: [idr, ' khr ']").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();

        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.zero_decimal_currencies, vec!["IDR", "KHR"]);
        assert_eq!(config.engine.zero_decimal_rate, 1000);
        assert!(config.engine.is_aggregated(ProductType(9)));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = EngineConfig {
            aggregated_product_types: vec![],
            zero_decimal_rate: 0,
            ..Default::default()
        }
        .validated();

        assert_eq!(config.zero_decimal_rate, 1000);
        assert_eq!(config.aggregated_product_types, vec![ProductType(9)]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "engine: [not, a, map").unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_incremental_and_zero_decimal_lookup() {
        let config = EngineConfig::default();

        assert!(config.is_incremental(ProductType(3)));
        assert!(!config.is_incremental(ProductType(1)));
        assert!(config.is_zero_decimal("idr"));
        assert!(!config.is_zero_decimal("USD"));
    }
}
