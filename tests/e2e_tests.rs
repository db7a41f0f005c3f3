//! End-to-end replay tests
//!
//! Each fixture under `tests/fixtures/<name>/` holds:
//! - `accounts.csv` - account seeds
//! - `operations.csv` - operations to replay
//! - `expected.csv` - final balances written to stdout
//! - `responses.csv` - expected per-operation response log
//!
//! Every fixture is replayed with both strategies; the concurrent one uses a
//! tiny batch size so accounts span several batches.

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;
    use wallet_settlement_engine::cli::StrategyType;
    use wallet_settlement_engine::config::EngineConfig;
    use wallet_settlement_engine::strategy::{create_strategy, BatchConfig, ReplayPaths};

    fn fixture_path(fixture_name: &str, file: &str) -> PathBuf {
        Path::new("tests/fixtures").join(fixture_name).join(file)
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
    }

    /// Replay a fixture and compare balances and responses with the expected files
    fn run_test_fixture(fixture_name: &str, strategy_type: StrategyType) {
        let out_dir = TempDir::new().expect("Failed to create temp dir");
        let paths = ReplayPaths {
            accounts: fixture_path(fixture_name, "accounts.csv"),
            operations: fixture_path(fixture_name, "operations.csv"),
            responses: Some(out_dir.path().join("responses.csv")),
        };
        assert!(paths.operations.exists(), "Missing fixture {}", fixture_name);

        let strategy = create_strategy(
            strategy_type,
            Some(BatchConfig::new(2, 2)),
            EngineConfig::default(),
        );
        let mut output = Vec::new();
        strategy
            .process(&paths, &mut output)
            .unwrap_or_else(|e| panic!("Replay failed: {}", e));

        let actual = String::from_utf8(output).expect("Output is not UTF-8");
        let expected = read(&fixture_path(fixture_name, "expected.csv"));
        assert_eq!(
            actual, expected,
            "\n\nBalance mismatch for fixture: {} (strategy: {:?})\n\nActual:\n{}\n\nExpected:\n{}\n",
            fixture_name, strategy_type, actual, expected
        );

        let actual = read(out_dir.path().join("responses.csv").as_path());
        let expected = read(&fixture_path(fixture_name, "responses.csv"));
        assert_eq!(
            actual, expected,
            "\n\nResponse mismatch for fixture: {} (strategy: {:?})\n",
            fixture_name, strategy_type
        );
    }

    #[rstest]
    #[case("single_bet_lifecycle")]
    #[case("aggregated_group")]
    #[case("multiple_accounts")]
    #[case("malformed_rows")]
    fn test_fixtures(
        #[case] fixture: &str,
        #[values(StrategyType::Sequential, StrategyType::Concurrent)] strategy: StrategyType,
    ) {
        run_test_fixture(fixture, strategy);
    }

    #[rstest]
    fn test_missing_operations_file_is_fatal(
        #[values(StrategyType::Sequential, StrategyType::Concurrent)] strategy: StrategyType,
    ) {
        let paths = ReplayPaths {
            accounts: fixture_path("single_bet_lifecycle", "accounts.csv"),
            operations: PathBuf::from("tests/fixtures/does_not_exist.csv"),
            responses: None,
        };
        let strategy = create_strategy(strategy, None, EngineConfig::default());

        assert!(strategy.process(&paths, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_binary_writes_balances_to_stdout() {
        let output = Command::new(env!("CARGO_BIN_EXE_wallet-settlement-engine"))
            .arg("--strategy")
            .arg("sequential")
            .arg("--accounts")
            .arg(fixture_path("aggregated_group", "accounts.csv"))
            .arg(fixture_path("aggregated_group", "operations.csv"))
            .env("RUST_LOG", "off")
            .output()
            .expect("Failed to run binary");

        assert!(output.status.success());
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            read(&fixture_path("aggregated_group", "expected.csv"))
        );
    }

    #[test]
    fn test_binary_exits_with_error_on_missing_file() {
        let output = Command::new(env!("CARGO_BIN_EXE_wallet-settlement-engine"))
            .arg("--accounts")
            .arg("tests/fixtures/nope.csv")
            .arg("tests/fixtures/nope.csv")
            .env("RUST_LOG", "off")
            .output()
            .expect("Failed to run binary");

        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
    }
}
