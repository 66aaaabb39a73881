use crate::model::{AssetSymbol, OperationKind, ParseAmountError, Quantity, Stats};
use crate::model::{Operation, Source, UnsupportedOperationError, ValidationError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::{io, path::Path, sync::Arc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unable to read ledger `{0}`")]
    Csv(String, #[source] csv::Error),

    #[error("Invalid ledger row at {0}")]
    Row(Source, #[source] RowError),
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error("CSV error")]
    Csv(#[from] csv::Error),

    #[error("Invalid timestamp `{0}`, expected RFC 3339 or `YYYY-MM-DD HH:MM:SS`")]
    Time(String, #[source] chrono::ParseError),

    #[error("Invalid amount")]
    Amount(#[from] ParseAmountError),

    #[error("Unknown operation type")]
    Kind(#[from] UnsupportedOperationError),

    #[error("Invalid operation")]
    Validation(#[from] ValidationError),
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct LedgerCsvRow {
    pub(crate) time: String,
    pub(crate) platform: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) amount: String,
    pub(crate) asset: String,
    #[serde(default)]
    pub(crate) remark: String,
}

/// Read a normalized ledger CSV file into operations, in file order.
pub fn read_operations(
    stats: &mut Stats,
    path: impl AsRef<Path>,
) -> Result<Vec<Operation>, LedgerError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let file = std::fs::File::open(path)
        .map_err(|err| LedgerError::Csv(name.clone(), csv::Error::from(err)))?;

    stats.inc_ledger_files();
    read_operations_from(stats, &name, file)
}

/// Read ledger CSV from any reader. `name` identifies the input in each operation's [`Source`].
pub fn read_operations_from<R: io::Read>(
    stats: &mut Stats,
    name: &str,
    input: R,
) -> Result<Vec<Operation>, LedgerError> {
    let file: Arc<str> = Arc::from(name);
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers = reader
        .headers()
        .map_err(|err| LedgerError::Csv(name.to_string(), err))?
        .clone();

    debug!("Parsing ledger rows from {name}");
    let mut operations = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| {
            let line = err.position().map(|pos| pos.line()).unwrap_or_default();
            let source = Source {
                file: file.clone(),
                line,
            };
            LedgerError::Row(source, RowError::Csv(err))
        })?;

        let source = Source {
            file: file.clone(),
            line: record.position().map(|pos| pos.line()).unwrap_or_default(),
        };
        let parsed = record
            .deserialize::<LedgerCsvRow>(Some(&headers))
            .map_err(RowError::from)
            .and_then(ledger_parse);
        let operation = match parsed {
            Ok(operation) => operation.with_source(source),
            Err(err) => return Err(LedgerError::Row(source, err)),
        };
        debug!("Parsed: {operation:?}");

        operations.push(operation);
        stats.inc_ledgers();
    }

    Ok(operations)
}

fn ledger_parse(row: LedgerCsvRow) -> Result<Operation, RowError> {
    let time = parse_time(&row.time)?;
    let kind: OperationKind = row.kind.parse()?;
    let amount: Quantity = row.amount.parse()?;
    let asset = AssetSymbol::new(&row.asset);

    let operation = Operation::new(time, &row.platform, amount, asset, kind)?;

    Ok(operation.with_remark(row.remark))
}

fn parse_time(time: &str) -> Result<DateTime<Utc>, RowError> {
    DateTime::parse_from_rfc3339(time)
        .map(|time| time.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(time, "%F %T").map(|time| time.and_utc()))
        .map_err(|err| RowError::Time(time.to_string(), err))
}
