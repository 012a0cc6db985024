//! Durable accumulation of intraday prices in a wide CSV file.
//!
//! Layout: a `timestamp` column followed by one column per symbol. Timestamps
//! are timezone-naive wall-clock times; an empty cell is a missing price. The
//! dashboard only reads this file, the `refresh-prices` job owns writes.

use crate::core::series::PriceTable;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const TIMESTAMP_COLUMN: &str = "timestamp";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub const FILE_NAME: &'static str = "hourly_prices.csv";

    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the store. A missing file is no history, not an error.
    pub fn load(&self) -> Result<Option<PriceTable>> {
        if !self.path.exists() {
            debug!("No history store at {}", self.path.display());
            return Ok(None);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open history store: {}", self.path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header: {}", self.path.display()))?
            .clone();
        let mut columns = headers.iter();
        match columns.next() {
            Some(first) if first.eq_ignore_ascii_case(TIMESTAMP_COLUMN) => {}
            _ => {
                return Err(anyhow!(
                    "History store {} must start with a '{}' column",
                    self.path.display(),
                    TIMESTAMP_COLUMN
                ));
            }
        }
        let mut symbols: Vec<String> = Vec::new();
        for symbol in columns {
            if symbols.iter().any(|s| s == symbol) {
                return Err(anyhow!(
                    "History store {} has a repeated '{}' column",
                    self.path.display(),
                    symbol
                ));
            }
            symbols.push(symbol.to_string());
        }
        let mut table = PriceTable::new(&symbols);

        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| {
                format!("Failed to read row {} of {}", line + 1, self.path.display())
            })?;
            let Some(raw_ts) = record.get(0) else {
                continue;
            };
            let timestamp = parse_timestamp(raw_ts)
                .with_context(|| format!("Invalid timestamp on row {}", line + 1))?;
            let values = (1..=symbols.len())
                .map(|i| parse_price(record.get(i).unwrap_or_default()))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid price on row {}", line + 1))?;
            table.insert_row(timestamp, values);
        }

        debug!(
            rows = table.len(),
            symbols = table.symbols().len(),
            "Loaded history store"
        );
        Ok(Some(table))
    }

    /// Replaces the store with `table`. Rows are written to a temporary file
    /// in the same directory which is then renamed over the store, so readers
    /// see either the old file or the new one.
    pub fn save(&self, table: &PriceTable) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let staged = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to stage history store in {}", dir.display()))?;
        let mut writer = WriterBuilder::new().from_writer(staged);

        let mut header = vec![TIMESTAMP_COLUMN.to_string()];
        header.extend(table.symbols().iter().cloned());
        writer.write_record(&header)?;

        for (ts, values) in table.rows() {
            let mut record = vec![ts.format(TIMESTAMP_FORMAT).to_string()];
            record.extend(
                values
                    .iter()
                    .map(|v| v.map(|p| p.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }
        let staged = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to write history store: {}", e.error()))?;
        staged
            .as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync history store: {}", self.path.display()))?;
        staged
            .persist(&self.path)
            .with_context(|| format!("Failed to replace history store: {}", self.path.display()))?;

        debug!(rows = table.len(), "Saved history store");
        Ok(())
    }
}

/// Accepts naive timestamps, RFC 3339 timestamps (offset stripped, wall
/// clock kept) and bare dates (midnight).
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_local());
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(ts.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
        .with_context(|| format!("Unrecognised timestamp: {raw}"))
}

fn parse_price(raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .with_context(|| format!("Unrecognised price: {raw}"))
}
