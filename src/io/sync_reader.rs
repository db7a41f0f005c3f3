//! Synchronous CSV readers
//!
//! `OperationReader` streams the operation file one row at a time and yields
//! [`ReplayItem`]s tagged with their line number. `read_accounts` loads the
//! (small) account seed file in one go.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, unreadable header) are returned from `new()`
//! - Individual row errors are yielded as `Err` items and the iterator continues
//! - Line numbers are the physical line in the file, header included
//!
//! ```no_run
//! use wallet_settlement_engine::io::sync_reader::OperationReader;
//! use std::path::Path;
//!
//! let reader = OperationReader::new(Path::new("operations.csv")).unwrap();
//! for item in reader {
//!     match item {
//!         Ok(item) => println!("line {}: {}", item.line, item.operation.name()),
//!         Err(e) => eprintln!("{}", e),
//!     }
//! }
//! ```

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::warn;

use crate::core::ReplayItem;
use crate::io::csv_format::{
    convert_account_record, convert_operation_record, AccountCsvRecord, AccountSeed,
    OperationCsvRecord,
};
use crate::types::ReplayError;

fn open_csv(path: &Path) -> Result<csv::Reader<File>, ReplayError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ReplayError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => ReplayError::from(e),
    })?;

    Ok(ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .buffer_capacity(8 * 1024)
        .from_reader(file))
}

/// Streaming reader over the operation file
#[derive(Debug)]
pub struct OperationReader {
    reader: csv::Reader<File>,
    headers: StringRecord,
    record: StringRecord,
}

impl OperationReader {
    /// Open an operation file and read its header
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the CSV file
    ///
    /// # Returns
    ///
    /// * `Ok(OperationReader)` if the file opened and has a header
    /// * `Err(ReplayError)` otherwise
    pub fn new(path: &Path) -> Result<Self, ReplayError> {
        let mut reader = open_csv(path)?;
        let headers = reader.headers()?.clone();

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
        })
    }
}

impl Iterator for OperationReader {
    type Item = Result<ReplayItem, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or_default();
                let item = self
                    .record
                    .deserialize::<OperationCsvRecord>(Some(&self.headers))
                    .map_err(|e| ReplayError::invalid_record(line, e.to_string()))
                    .and_then(|record| {
                        convert_operation_record(record)
                            .map_err(|e| ReplayError::invalid_record(line, e))
                    })
                    .map(|operation| ReplayItem { line, operation });
                Some(item)
            }
        }
    }
}

/// Load every account seed from `path`
///
/// Rows that fail to parse are logged and skipped.
pub fn read_accounts(path: &Path) -> Result<Vec<AccountSeed>, ReplayError> {
    let mut reader = open_csv(path)?;
    let mut seeds = Vec::new();

    for (index, row) in reader.deserialize::<AccountCsvRecord>().enumerate() {
        // header is line 1
        let line = index as u64 + 2;
        match row
            .map_err(ReplayError::from)
            .and_then(|r| convert_account_record(r).map_err(|e| ReplayError::invalid_record(line, e)))
        {
            Ok(seed) => seeds.push(seed),
            Err(e) => warn!(line, error = %e, "Skipping account row"),
        }
    }

    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operation;
    use rust_decimal::Decimal;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str =
        "op,account,transfer,leg,amount,win_loss,result,product_type,cash_out,cancel_all,commission_stake\n";

    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = OperationReader::new(Path::new("does-not-exist.csv")).unwrap_err();
        assert!(matches!(err, ReplayError::FileNotFound { .. }));
    }

    #[test]
    fn test_reads_operations_with_line_numbers() {
        let file = create_temp_csv(&format!(
            "{}deduct,alice,A,,100,,,,,,\nsettle,alice,A,,,250,win,,,,\n",
            HEADER
        ));

        let items: Vec<_> = OperationReader::new(file.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].line, 2);
        assert_eq!(items[1].line, 3);
        match &items[0].operation {
            Operation::Deduct(req) => assert_eq!(req.amount, Decimal::new(100, 0)),
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_short_rows_fill_optional_columns() {
        let file = create_temp_csv(&format!("{}balance,alice\nrollback,alice,A\n", HEADER));

        let items: Vec<_> = OperationReader::new(file.path())
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].operation.name(), "balance");
        assert_eq!(items[1].operation.transfer_code(), "A");
    }

    #[test]
    fn test_bad_row_reports_line_and_continues() {
        let file = create_temp_csv(&format!(
            "{}deduct,alice,A,,100,,,,,,\nwithdraw,alice,B,,5,,,,,,\nbalance,alice,,,,,,,,,\n",
            HEADER
        ));

        let items: Vec<_> = OperationReader::new(file.path()).unwrap().collect();

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[2].is_ok());
        match items[1].as_ref().unwrap_err() {
            ReplayError::InvalidRecord { line, message } => {
                assert_eq!(*line, 3);
                assert!(message.contains("Invalid operation"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_read_accounts_skips_bad_rows() {
        let file = create_temp_csv(
            "code,currency,balance\nalice,usd,1000\nbob,IDR,oops\n  carol , IDR , 5000000 \n",
        );

        let seeds = read_accounts(file.path()).unwrap();

        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].code, "alice");
        assert_eq!(seeds[0].currency, "USD");
        assert_eq!(seeds[1].code, "carol");
        assert_eq!(seeds[1].balance, Decimal::new(5_000_000, 0));
    }
}
