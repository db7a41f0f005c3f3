//! CSV format handling for replay files
//!
//! This module centralizes all CSV format concerns, providing:
//! - Record structures for the account seed file and the operation file
//! - Conversion from CSV records to canonical operations
//! - Balance and response output serialization
//!
//! All functions are pure (no file I/O) for easy testing.
//!
//! # Operation file
//!
//! ```text
//! op,account,transfer,leg,amount,win_loss,result,product_type,cash_out,cancel_all,commission_stake
//! deduct,alice,A,,100,,,,,,
//! settle,alice,A,,,250,win,,,,
//! cancel,alice,W,,,,,9,,true,
//! ```

use std::io::Write;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::currency::CurrencyNormalizer;
use crate::core::ProcessingResult;
use crate::types::{
    Account, BalanceRequest, BonusRequest, CancelBonusRequest, CancelRequest, DeductRequest,
    Metadata, Operation, ProductType, ResultType, RollbackRequest, SettleRequest,
};

/// One row of the operation file
///
/// Every column but `op` and `account` is optional; which ones are required
/// depends on the operation.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct OperationCsvRecord {
    pub op: String,
    pub account: String,
    #[serde(default)]
    pub transfer: Option<String>,
    #[serde(default)]
    pub leg: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub win_loss: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub cash_out: Option<String>,
    #[serde(default)]
    pub cancel_all: Option<String>,
    #[serde(default)]
    pub commission_stake: Option<String>,
}

/// One row of the account seed file; `balance` is in internal units
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountCsvRecord {
    pub code: String,
    pub currency: String,
    pub balance: String,
}

/// Parsed account seed
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSeed {
    pub code: String,
    pub currency: String,
    pub balance: Decimal,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_decimal(field: &Option<String>, column: &str) -> Result<Option<Decimal>, String> {
    match present(field) {
        Some(raw) => Decimal::from_str(raw)
            .map(Some)
            .map_err(|_| format!("Invalid {} '{}'", column, raw)),
        None => Ok(None),
    }
}

fn require_decimal(field: &Option<String>, column: &str, op: &str) -> Result<Decimal, String> {
    parse_decimal(field, column)?.ok_or_else(|| format!("{} requires {}", op, column))
}

fn parse_flag(field: &Option<String>, column: &str) -> Result<bool, String> {
    match present(field).map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") | Some("no") | Some("n") => Ok(false),
        Some("true") | Some("1") | Some("yes") | Some("y") => Ok(true),
        Some(other) => Err(format!("Invalid {} '{}'", column, other)),
    }
}

fn parse_product_type(field: &Option<String>) -> Result<ProductType, String> {
    match present(field) {
        Some(raw) => raw
            .parse::<i32>()
            .map(ProductType)
            .map_err(|_| format!("Invalid product_type '{}'", raw)),
        None => Ok(ProductType::default()),
    }
}

/// Parse the `result` column; aggregated settles usually leave it empty, which reads as a win
fn parse_result(field: &Option<String>) -> Result<ResultType, String> {
    match present(field).map(str::to_ascii_lowercase).as_deref() {
        None | Some("win") => Ok(ResultType::Win),
        Some("lose") | Some("loss") => Ok(ResultType::Lose),
        Some("draw") | Some("refund") => Ok(ResultType::Draw),
        Some(other) => Err(format!("Invalid result '{}'", other)),
    }
}

/// Convert an operation row to a canonical operation
///
/// Missing or unparseable columns that the operation needs are reported as
/// errors. Business validation (empty codes, non-positive amounts) is left to
/// the engine, which answers it with a validation response.
pub fn convert_operation_record(record: OperationCsvRecord) -> Result<Operation, String> {
    let account_code = record.account.clone();
    let transfer_code = present(&record.transfer).unwrap_or_default().to_string();
    let leg_id = present(&record.leg).map(str::to_string);
    let product_type = parse_product_type(&record.product_type)?;
    let op = record.op.trim().to_ascii_lowercase();

    let operation = match op.as_str() {
        "deduct" => Operation::Deduct(DeductRequest {
            account_code,
            transfer_code,
            leg_id,
            amount: require_decimal(&record.amount, "amount", &op)?,
            product_type,
            commission_stake: parse_decimal(&record.commission_stake, "commission_stake")?,
            metadata: Metadata::new(),
        }),
        "settle" => Operation::Settle(SettleRequest {
            account_code,
            transfer_code,
            leg_id,
            win_loss: require_decimal(&record.win_loss, "win_loss", &op)?,
            result_type: parse_result(&record.result)?,
            cash_out: parse_flag(&record.cash_out, "cash_out")?,
            product_type,
            result_time: None,
            game_result: None,
            metadata: Metadata::new(),
        }),
        "cancel" => Operation::Cancel(CancelRequest {
            account_code,
            transfer_code,
            leg_id,
            cancel_all: parse_flag(&record.cancel_all, "cancel_all")?,
            product_type,
        }),
        "rollback" => Operation::Rollback(RollbackRequest {
            account_code,
            transfer_code,
            leg_id,
            product_type,
        }),
        "bonus" => Operation::Bonus(BonusRequest {
            account_code,
            transfer_code,
            amount: require_decimal(&record.amount, "amount", &op)?,
            provider: None,
            game_provider_promotion: false,
            metadata: Metadata::new(),
        }),
        "cancel_bonus" => Operation::CancelBonus(CancelBonusRequest {
            account_code,
            transfer_code,
        }),
        "balance" => Operation::Balance(BalanceRequest { account_code }),
        _ => return Err(format!("Invalid operation '{}'", record.op)),
    };

    Ok(operation)
}

/// Convert an account seed row
pub fn convert_account_record(record: AccountCsvRecord) -> Result<AccountSeed, String> {
    let code = record.code.trim().to_string();
    if code.is_empty() {
        return Err("Account code is required".to_string());
    }
    let balance = Decimal::from_str(record.balance.trim())
        .map_err(|_| format!("Invalid balance '{}' for account {}", record.balance, code))?;

    Ok(AccountSeed {
        code,
        currency: record.currency.trim().to_ascii_uppercase(),
        balance,
    })
}

/// Write final balances
///
/// Columns: account, currency, balance (internal units), display_balance.
/// Accounts are sorted by code for deterministic output.
pub fn write_balances_csv(
    accounts: &[Account],
    normalizer: &CurrencyNormalizer,
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["account", "currency", "balance", "display_balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = accounts.to_vec();
    sorted.sort_by(|a, b| a.code.cmp(&b.code));

    for account in sorted {
        writer
            .write_record(&[
                account.code.clone(),
                account.currency.clone(),
                format!("{:.4}", account.balance),
                format!(
                    "{:.4}",
                    normalizer.to_display(&account.currency, account.balance)
                ),
            ])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}

/// Write one response row per replayed operation
///
/// Columns: line, op, account, transfer, error_code, balance (display units,
/// empty when the response carries none).
pub fn write_responses_csv(
    results: &[ProcessingResult],
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["line", "op", "account", "transfer", "error_code", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    for result in results {
        let response = &result.response;
        writer
            .write_record(&[
                result.line.to_string(),
                response.operation.to_string(),
                response.account_code.clone(),
                response.transfer_code.clone(),
                response.error_code.to_string(),
                response
                    .balance
                    .map(|b| format!("{:.4}", b))
                    .unwrap_or_default(),
            ])
            .map_err(|e| format!("Failed to write response record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{ErrorCode, OperationResponse};
    use rstest::rstest;

    fn record(op: &str) -> OperationCsvRecord {
        OperationCsvRecord {
            op: op.to_string(),
            account: "alice".to_string(),
            transfer: Some("T1".to_string()),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::deduct("deduct", "deduct")]
    #[case::uppercase("SETTLE", "settle")]
    #[case::cancel("cancel", "cancel")]
    #[case::rollback("rollback", "rollback")]
    #[case::bonus("bonus", "bonus")]
    #[case::cancel_bonus("cancel_bonus", "cancel_bonus")]
    #[case::balance("balance", "balance")]
    fn test_convert_operation_kinds(#[case] op: &str, #[case] expected: &str) {
        let record = OperationCsvRecord {
            amount: Some("10".to_string()),
            win_loss: Some("5".to_string()),
            ..record(op)
        };

        let operation = convert_operation_record(record).unwrap();
        assert_eq!(operation.name(), expected);
    }

    #[test]
    fn test_convert_aggregated_cancel_all() {
        let record = OperationCsvRecord {
            leg: Some(" ".to_string()),
            product_type: Some("9".to_string()),
            cancel_all: Some("TRUE".to_string()),
            ..record("cancel")
        };

        match convert_operation_record(record).unwrap() {
            Operation::Cancel(req) => {
                assert!(req.cancel_all);
                assert_eq!(req.leg_id, None);
                assert_eq!(req.product_type, ProductType(9));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_convert_settle_fields() {
        let record = OperationCsvRecord {
            win_loss: Some("250.5".to_string()),
            result: Some("draw".to_string()),
            cash_out: Some("1".to_string()),
            ..record("settle")
        };

        match convert_operation_record(record).unwrap() {
            Operation::Settle(req) => {
                assert_eq!(req.win_loss, Decimal::new(2505, 1));
                assert_eq!(req.result_type, ResultType::Draw);
                assert!(req.cash_out);
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[rstest]
    #[case::unknown_op(record("withdraw"), "Invalid operation")]
    #[case::missing_amount(record("deduct"), "deduct requires amount")]
    #[case::missing_win_loss(record("settle"), "settle requires win_loss")]
    #[case::bad_amount(
        OperationCsvRecord { amount: Some("ten".to_string()), ..record("deduct") },
        "Invalid amount"
    )]
    #[case::bad_flag(
        OperationCsvRecord { cancel_all: Some("maybe".to_string()), ..record("cancel") },
        "Invalid cancel_all"
    )]
    #[case::bad_result(
        OperationCsvRecord {
            win_loss: Some("1".to_string()),
            result: Some("push".to_string()),
            ..record("settle")
        },
        "Invalid result"
    )]
    #[case::bad_product_type(
        OperationCsvRecord { product_type: Some("wm".to_string()), ..record("rollback") },
        "Invalid product_type"
    )]
    fn test_convert_operation_errors(#[case] record: OperationCsvRecord, #[case] message: &str) {
        let err = convert_operation_record(record).unwrap_err();
        assert!(err.contains(message), "{}", err);
    }

    #[test]
    fn test_convert_account_record() {
        let seed = convert_account_record(AccountCsvRecord {
            code: " alice ".to_string(),
            currency: "idr".to_string(),
            balance: "1000000".to_string(),
        })
        .unwrap();

        assert_eq!(seed.code, "alice");
        assert_eq!(seed.currency, "IDR");
        assert_eq!(seed.balance, Decimal::new(1_000_000, 0));

        assert!(convert_account_record(AccountCsvRecord {
            code: "bob".to_string(),
            currency: "USD".to_string(),
            balance: "lots".to_string(),
        })
        .is_err());
    }

    #[test]
    fn test_write_balances_sorted_with_display_units() {
        let normalizer = CurrencyNormalizer::new(&EngineConfig::default());
        let accounts = vec![
            Account::new(2, "bob", "USD", Decimal::new(99990, 2)),
            Account::new(1, "alice", "IDR", Decimal::new(12500, 0)),
        ];
        let mut output = Vec::new();

        write_balances_csv(&accounts, &normalizer, &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "account,currency,balance,display_balance");
        assert_eq!(lines[1], "alice,IDR,12500.0000,12.5000");
        assert_eq!(lines[2], "bob,USD,999.9000,999.9000");
    }

    #[test]
    fn test_write_responses() {
        let results = vec![ProcessingResult {
            line: 2,
            response: OperationResponse {
                operation: "deduct",
                error_code: ErrorCode::InsufficientBalance,
                message: "Insufficient balance".to_string(),
                account_code: "alice".to_string(),
                transfer_code: "T1".to_string(),
                currency: Some("USD".to_string()),
                balance: Some(Decimal::new(50, 0)),
                bet_amount: None,
            },
        }];
        let mut output = Vec::new();

        write_responses_csv(&results, &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(
            text,
            "line,op,account,transfer,error_code,balance\n2,deduct,alice,T1,5,50.0000\n"
        );
    }
}
