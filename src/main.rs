//! Wallet Settlement Engine CLI
//!
//! Replays wallet operations from CSV against seeded accounts.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --accounts accounts.csv operations.csv > balances.csv
//! cargo run -- --strategy sequential --accounts accounts.csv operations.csv
//! cargo run -- --responses responses.csv --accounts accounts.csv operations.csv
//! cargo run -- --config wallet.yaml --batch-size 500 --max-concurrent 4 --accounts accounts.csv operations.csv
//! ```
//!
//! Final balances go to stdout; logs go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (bad config, file not found, output failure, etc.)

use std::process;

use wallet_settlement_engine::cli;
use wallet_settlement_engine::config::AppConfig;
use wallet_settlement_engine::logging::init_logging;
use wallet_settlement_engine::strategy::{self, ReplayPaths};

fn main() {
    let args = cli::parse_args();

    let mut config = match AppConfig::load(args.config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.log_json {
        config.logging.json = true;
    }
    init_logging(&config.logging);

    let strategy = {
        let batch = if matches!(args.strategy, cli::StrategyType::Concurrent) {
            Some(args.to_batch_config())
        } else {
            None
        };
        strategy::create_strategy(args.strategy, batch, config.engine)
    };

    let paths = ReplayPaths {
        accounts: args.accounts_file,
        operations: args.operations_file,
        responses: args.responses_file,
    };

    let mut output = std::io::stdout();
    if let Err(e) = strategy.process(&paths, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
