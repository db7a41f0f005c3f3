//! I/O module
//!
//! Handles the replay files.
//!
//! # Components
//!
//! - `csv_format` - Record structures, conversion to operations, output serialization
//! - `sync_reader` - Iterator over the operation file and the account seed loader
//! - `async_reader` - Batch reader used by the concurrent strategy

pub mod async_reader;
pub mod csv_format;
pub mod sync_reader;

pub use async_reader::AsyncOperationReader;
pub use csv_format::{
    convert_operation_record, write_balances_csv, write_responses_csv, AccountSeed,
    OperationCsvRecord,
};
pub use sync_reader::{read_accounts, OperationReader};
