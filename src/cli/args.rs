use crate::strategy::BatchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Replay wallet operations against seeded accounts
#[derive(Parser, Debug)]
#[command(name = "wallet-settlement-engine")]
#[command(about = "Replay wallet settlement operations from CSV", long_about = None)]
pub struct CliArgs {
    /// Operation CSV file
    #[arg(value_name = "OPERATIONS", help = "Path to the operations CSV file")]
    pub operations_file: PathBuf,

    /// Account seed CSV file
    #[arg(
        long = "accounts",
        value_name = "FILE",
        help = "Path to the account seed CSV file (code,currency,balance)"
    )]
    pub accounts_file: PathBuf,

    /// Per-operation response log
    #[arg(
        long = "responses",
        value_name = "FILE",
        help = "Write one response row per operation to this file"
    )]
    pub responses_file: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long = "config", value_name = "FILE", help = "Path to a YAML config file")]
    pub config_file: Option<PathBuf>,

    /// Replay strategy
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "concurrent",
        help = "Replay strategy: 'sequential' or 'concurrent'"
    )]
    pub strategy: StrategyType,

    /// Number of operations per batch (concurrent mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of operations per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Worker threads (concurrent mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Number of worker threads (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// Log level, overrides the config file
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        help = "Log level or filter directive, e.g. 'debug' (RUST_LOG takes precedence)"
    )]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long = "log-json", help = "Write logs to stderr as JSON")]
    pub log_json: bool,
}

/// Available replay strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sequential,
    Concurrent,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments, falling back to defaults
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent_batches.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent_batches
                    .unwrap_or(default.max_concurrent_batches),
            )
        } else {
            BatchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default_strategy(&["program", "--accounts", "a.csv", "ops.csv"], StrategyType::Concurrent)]
    #[case::sequential(
        &["program", "--strategy", "sequential", "--accounts", "a.csv", "ops.csv"],
        StrategyType::Sequential
    )]
    #[case::concurrent(
        &["program", "--strategy", "concurrent", "--accounts", "a.csv", "ops.csv"],
        StrategyType::Concurrent
    )]
    fn test_strategy_parsing(#[case] args: &[&str], #[case] expected: StrategyType) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.strategy, expected);
    }

    #[test]
    fn test_optional_files_and_logging() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--accounts",
            "a.csv",
            "--responses",
            "out.csv",
            "--config",
            "wallet.yaml",
            "--log-level",
            "debug",
            "--log-json",
            "ops.csv",
        ])
        .unwrap();

        assert_eq!(parsed.operations_file, PathBuf::from("ops.csv"));
        assert_eq!(parsed.accounts_file, PathBuf::from("a.csv"));
        assert_eq!(parsed.responses_file, Some(PathBuf::from("out.csv")));
        assert_eq!(parsed.config_file, Some(PathBuf::from("wallet.yaml")));
        assert_eq!(parsed.log_level.as_deref(), Some("debug"));
        assert!(parsed.log_json);
    }

    #[rstest]
    #[case::all_defaults(&["program", "--accounts", "a.csv", "ops.csv"], 1000, num_cpus::get())]
    #[case::custom_batch_size(
        &["program", "--batch-size", "200", "--accounts", "a.csv", "ops.csv"],
        200,
        num_cpus::get()
    )]
    #[case::custom_max_concurrent(
        &["program", "--max-concurrent", "2", "--accounts", "a.csv", "ops.csv"],
        1000,
        2
    )]
    #[case::zero_batch_size(
        &["program", "--batch-size", "0", "--accounts", "a.csv", "ops.csv"],
        1000,
        num_cpus::get()
    )]
    fn test_batch_config_conversion(
        #[case] args: &[&str],
        #[case] expected_batch_size: usize,
        #[case] expected_max_concurrent: usize,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().to_batch_config();

        assert_eq!(config.batch_size, expected_batch_size);
        assert_eq!(config.max_concurrent_batches, expected_max_concurrent);
    }

    #[rstest]
    #[case::missing_operations(&["program", "--accounts", "a.csv"])]
    #[case::missing_accounts(&["program", "ops.csv"])]
    #[case::invalid_strategy(&["program", "--strategy", "async", "--accounts", "a.csv", "ops.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
