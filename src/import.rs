use std::io;

use log::info;

use crate::error::ImportError;
use crate::store::{ItemStatus, TweetStore};

const STATUS_COLUMN: &str = "status";

/// A CSV export of post URLs, shaped for the input table: every column is
/// text and each row carries a status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct InputRows {
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Vec<String>>,
}

/// Reads a CSV with a header row. A missing `status` column is appended and
/// blank statuses become `pending`.
pub(crate) fn read_input_csv<R: io::Read>(
    reader: R,
    url_column: &str,
) -> Result<InputRows, ImportError> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    if !columns.iter().any(|column| column == url_column) {
        return Err(ImportError::MissingColumn(url_column.to_string()));
    }
    let status_index = match columns.iter().position(|column| column == STATUS_COLUMN) {
        Some(index) => index,
        None => {
            columns.push(STATUS_COLUMN.to_string());
            columns.len() - 1
        }
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let mut row: Vec<String> = record?.iter().map(|value| value.trim().to_string()).collect();
        row.resize(columns.len(), String::new());
        if row[status_index].is_empty() {
            row[status_index] = ItemStatus::Pending.as_str().to_string();
        }
        rows.push(row);
    }
    Ok(InputRows { columns, rows })
}

/// Loads a CSV export into `input_table`, creating it when needed.
pub(crate) async fn import_csv<R: io::Read>(
    store: &dyn TweetStore,
    input_table: &str,
    url_column: &str,
    reader: R,
) -> Result<u64, ImportError> {
    let input = read_input_csv(reader, url_column)?;
    info!(
        "Read {} rows with columns {:?}",
        input.rows.len(),
        input.columns
    );
    Ok(store.load_input(input_table, &input).await?)
}
