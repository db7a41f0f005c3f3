//! Asynchronous CSV reader with batch interface
//!
//! Used by the concurrent replay strategy: operations are pulled in batches
//! so each batch can be partitioned by account and applied in parallel.
//!
//! ```text
//! CSV Reader → AsyncOperationReader → Vec<ReplayItem> → BatchProcessor
//!                      ↓
//!              csv_format module
//! ```

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

use crate::core::ReplayItem;
use crate::io::csv_format::{convert_operation_record, OperationCsvRecord};

/// Asynchronous operation reader
pub struct AsyncOperationReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    /// Line number of the next data row; the header is line 1
    next_line: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncOperationReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            next_line: 2,
        }
    }

    /// Read up to `batch_size` operations
    ///
    /// Rows that fail to parse or convert are logged with their line number
    /// and skipped.
    ///
    /// # Returns
    ///
    /// The converted operations; empty once the file is exhausted.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<ReplayItem> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<OperationCsvRecord>();

        while batch.len() < batch_size {
            let Some(row) = records.next().await else {
                break;
            };
            let line = self.next_line;
            self.next_line += 1;

            match row {
                Ok(record) => match convert_operation_record(record) {
                    Ok(operation) => batch.push(ReplayItem { line, operation }),
                    Err(e) => warn!(line, error = %e, "Skipping invalid operation"),
                },
                Err(e) => warn!(line, error = %e, "Skipping unparseable row"),
            }
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    const HEADER: &str =
        "op,account,transfer,leg,amount,win_loss,result,product_type,cash_out,cancel_all,commission_stake\n";

    #[tokio::test]
    async fn test_read_batch_in_chunks() {
        let csv_content = format!(
            "{}deduct,alice,A,,10,,,,,,\ndeduct,bob,B,,20,,,,,,\nsettle,alice,A,,,5,lose,,,,\n",
            HEADER
        );
        let mut reader = AsyncOperationReader::new(Cursor::new(csv_content.into_bytes()));

        let batch = reader.read_batch(2).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].line, 2);
        assert_eq!(batch[1].operation.account_code(), "bob");

        let batch = reader.read_batch(2).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].line, 4);
        assert_eq!(batch[0].operation.name(), "settle");

        assert!(reader.read_batch(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped_but_counted() {
        let csv_content = format!(
            "{}payout,alice,A,,10,,,,,,\ncancel,alice,A,,,,,9,,yes,\n",
            HEADER
        );
        let mut reader = AsyncOperationReader::new(Cursor::new(csv_content.into_bytes()));

        let batch = reader.read_batch(10).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].line, 3);
        assert_eq!(batch[0].operation.name(), "cancel");
    }

    #[tokio::test]
    async fn test_header_only() {
        let mut reader = AsyncOperationReader::new(Cursor::new(HEADER.as_bytes().to_vec()));
        assert!(reader.read_batch(10).await.is_empty());
    }
}
