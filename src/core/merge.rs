//! Combines the durable history store with fresh fetches into one gap-free,
//! deduplicated price table, recovering symbols a bulk fetch silently dropped.
use crate::core::price::{FetchRange, Granularity, PriceSource};
use crate::core::series::PriceTable;
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

/// Result of a fetch phase. `NoData` means the provider returned nothing for
/// the whole request, which halts everything downstream of it.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Data(PriceTable),
    NoData,
}

impl FetchOutcome {
    pub fn into_table(self) -> Option<PriceTable> {
        match self {
            FetchOutcome::Data(table) => Some(table),
            FetchOutcome::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, FetchOutcome::NoData)
    }
}

/// Requested symbols whose column is absent or entirely missing.
pub fn missing_symbols(table: &PriceTable, symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .filter(|s| table.is_all_missing(s))
        .cloned()
        .collect()
}

/// Phase one: a single multi-symbol request. Errors and empty tables are
/// the same failure.
pub async fn bulk_fetch(
    source: &dyn PriceSource,
    symbols: &[String],
    range: FetchRange,
    granularity: Granularity,
) -> Option<PriceTable> {
    match source.fetch(symbols, range, granularity).await {
        Ok(table) if !table.is_empty() => Some(table.with_columns(symbols)),
        Ok(_) => {
            warn!(?symbols, %range, %granularity, "Price source returned no data");
            None
        }
        Err(e) => {
            warn!(?symbols, %range, %granularity, error = %e, "Price fetch failed");
            None
        }
    }
}

/// Phase two: re-fetches each all-missing symbol on its own and splices the
/// column in when the retry has data. Best effort; returns the symbols that
/// were recovered.
pub async fn recover_missing(
    source: &dyn PriceSource,
    table: &mut PriceTable,
    symbols: &[String],
    range: FetchRange,
    granularity: Granularity,
) -> Vec<String> {
    let mut recovered = Vec::new();
    for symbol in missing_symbols(table, symbols) {
        debug!(%symbol, "Retrying symbol missing from bulk fetch");
        match source
            .fetch(std::slice::from_ref(&symbol), range, granularity)
            .await
        {
            Ok(single) => {
                if table.replace_column(&symbol, &single) {
                    info!(%symbol, "Recovered symbol with single-symbol retry");
                    recovered.push(symbol);
                } else {
                    warn!(%symbol, "Single-symbol retry returned no data");
                }
            }
            Err(e) => warn!(%symbol, error = %e, "Single-symbol retry failed"),
        }
    }
    recovered
}

/// Bulk fetch followed by targeted retries of silently dropped symbols.
pub async fn fetch_with_retry(
    source: &dyn PriceSource,
    symbols: &[String],
    range: FetchRange,
    granularity: Granularity,
) -> FetchOutcome {
    let Some(mut table) = bulk_fetch(source, symbols, range, granularity).await else {
        return FetchOutcome::NoData;
    };
    recover_missing(source, &mut table, symbols, range, granularity).await;

    let still_missing = missing_symbols(&table, symbols);
    if !still_missing.is_empty() {
        warn!(symbols = ?still_missing, "Symbols have no prices after retry");
    }
    FetchOutcome::Data(table)
}

/// Merges `historical` with `fresh` tables for `symbols`.
///
/// Rows are applied in order (history first, then each fresh table), so at
/// a shared timestamp the most recently fetched row wins wholesale. Columns
/// are the requested symbols found in any input, in request order. Rows
/// strictly before `start` are dropped.
pub fn merge(
    historical: Option<&PriceTable>,
    fresh: &[PriceTable],
    symbols: &[String],
    start: NaiveDateTime,
) -> PriceTable {
    let inputs: Vec<PriceTable> = historical
        .into_iter()
        .chain(fresh.iter())
        .map(|table| table.select(symbols))
        .collect();

    let present: Vec<String> = symbols
        .iter()
        .filter(|s| inputs.iter().any(|t| t.has_column(s)))
        .cloned()
        .collect();

    let mut merged = PriceTable::new(&present);
    for input in &inputs {
        let aligned = input.with_columns(&present);
        for (ts, values) in aligned.rows() {
            merged.insert_row(*ts, values.to_vec());
        }
    }
    merged.truncate_before(start);

    debug!(
        rows = merged.len(),
        symbols = merged.symbols().len(),
        "Merged price history"
    );
    merged
}

/// Fetch with retry, then merge on top of `historical`. A failed fetch is
/// `NoData` even when history exists.
pub async fn fetch_and_merge(
    source: &dyn PriceSource,
    historical: Option<&PriceTable>,
    symbols: &[String],
    range: FetchRange,
    granularity: Granularity,
    start: NaiveDateTime,
) -> FetchOutcome {
    match fetch_with_retry(source, symbols, range, granularity).await {
        FetchOutcome::Data(fresh) => {
            FetchOutcome::Data(merge(historical, &[fresh], symbols, start))
        }
        FetchOutcome::NoData => FetchOutcome::NoData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::Observation;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Serves fixed series per symbol, dropping `silent_drops` from bulk
    /// requests and recording every call.
    struct ScriptedSource {
        series: HashMap<String, Vec<(NaiveDateTime, f64)>>,
        silent_drops: Vec<String>,
        fail_all: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(series: &[(&str, Vec<(NaiveDateTime, f64)>)]) -> Self {
            Self {
                series: series
                    .iter()
                    .map(|(s, v)| (s.to_string(), v.clone()))
                    .collect(),
                silent_drops: Vec::new(),
                fail_all: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        async fn fetch(
            &self,
            symbols: &[String],
            _range: FetchRange,
            _granularity: Granularity,
        ) -> Result<PriceTable> {
            self.calls.lock().unwrap().push(symbols.to_vec());
            if self.fail_all {
                return Err(anyhow!("provider unavailable"));
            }
            let bulk = symbols.len() > 1;
            let observations = symbols
                .iter()
                .filter(|s| !(bulk && self.silent_drops.contains(*s)))
                .flat_map(|s| {
                    self.series
                        .get(s)
                        .into_iter()
                        .flatten()
                        .map(move |(t, p)| Observation::new(*t, s, Some(*p)))
                });
            Ok(PriceTable::from_observations(symbols, observations))
        }
    }

    fn daily(prices: &[f64]) -> Vec<(NaiveDateTime, f64)> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| (ts(i as u32 + 1, 0), *p))
            .collect()
    }

    #[tokio::test]
    async fn test_retry_targets_only_the_dropped_symbol() {
        let mut source = ScriptedSource::new(&[
            ("SPY", daily(&[1.0, 2.0, 3.0])),
            ("MSTR", daily(&[4.0, 5.0, 6.0])),
            ("MARA", daily(&[7.0, 8.0, 9.0])),
        ]);
        source.silent_drops = syms(&["MSTR"]);
        let symbols = syms(&["SPY", "MSTR", "MARA"]);

        let outcome =
            fetch_with_retry(&source, &symbols, FetchRange::Period { days: 5 }, Granularity::Daily)
                .await;

        let calls = source.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], syms(&["MSTR"]));

        let table = outcome.into_table().expect("should have data");
        assert_eq!(table.value(&ts(2, 0), "MSTR"), Some(5.0));
        assert!(missing_symbols(&table, &symbols).is_empty());
    }

    #[tokio::test]
    async fn test_no_retry_when_bulk_is_complete() {
        let source = ScriptedSource::new(&[
            ("SPY", daily(&[1.0, 2.0])),
            ("MSTR", daily(&[4.0, 5.0])),
        ]);
        let symbols = syms(&["SPY", "MSTR"]);

        let outcome =
            fetch_with_retry(&source, &symbols, FetchRange::Period { days: 5 }, Granularity::Daily)
                .await;
        assert!(!outcome.is_no_data());
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_leaves_symbol_missing_without_error() {
        let source = ScriptedSource::new(&[
            ("SPY", daily(&[1.0, 2.0])),
            ("MSTR", daily(&[4.0, 5.0])),
        ]);
        let symbols = syms(&["SPY", "MSTR", "DELISTED"]);

        let table =
            fetch_with_retry(&source, &symbols, FetchRange::Period { days: 5 }, Granularity::Daily)
                .await
                .into_table()
                .expect("partial failure is not fatal");

        assert_eq!(source.calls().len(), 2);
        assert!(table.has_column("DELISTED"));
        assert!(table.is_all_missing("DELISTED"));
    }

    #[tokio::test]
    async fn test_total_failure_is_no_data() {
        let mut source = ScriptedSource::new(&[("SPY", daily(&[1.0]))]);
        source.fail_all = true;

        let outcome = fetch_with_retry(
            &source,
            &syms(&["SPY", "MSTR"]),
            FetchRange::Period { days: 5 },
            Granularity::Daily,
        )
        .await;

        assert_eq!(outcome, FetchOutcome::NoData);
        assert_eq!(source.calls().len(), 1);
    }

    #[test]
    fn test_merge_fresh_value_wins_on_shared_timestamp() {
        let symbols = syms(&["SPY", "MSTR"]);
        let mut history = PriceTable::new(&syms(&["SPY", "MSTR", "OLD"]));
        history.insert_row(ts(1, 10), vec![Some(100.0), Some(300.0), Some(1.0)]);
        history.insert_row(ts(2, 10), vec![Some(101.0), Some(301.0), Some(1.0)]);

        let mut fresh = PriceTable::new(&symbols);
        fresh.insert_row(ts(2, 10), vec![Some(111.0), Some(311.0)]);
        fresh.insert_row(ts(3, 10), vec![Some(112.0), Some(312.0)]);

        let merged = merge(Some(&history), &[fresh], &symbols, ts(1, 0));

        assert_eq!(merged.symbols(), &symbols[..]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.value(&ts(1, 10), "SPY"), Some(100.0));
        assert_eq!(merged.value(&ts(2, 10), "SPY"), Some(111.0));
        assert_eq!(merged.value(&ts(2, 10), "MSTR"), Some(311.0));
        let stamps: Vec<_> = merged.timestamps().copied().collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_merge_truncates_before_start_and_handles_no_history() {
        let symbols = syms(&["SPY"]);
        let mut fresh = PriceTable::new(&symbols);
        fresh.insert_row(ts(1, 15), vec![Some(1.0)]);
        fresh.insert_row(ts(2, 15), vec![Some(2.0)]);

        let merged = merge(None, &[fresh], &symbols, ts(2, 0));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.first_timestamp(), Some(ts(2, 15)));
    }

    #[test]
    fn test_merge_later_fresh_table_wins_over_earlier() {
        let symbols = syms(&["SPY"]);
        let mut daily = PriceTable::new(&symbols);
        daily.insert_row(ts(1, 0), vec![Some(1.0)]);
        let mut refresh = PriceTable::new(&symbols);
        refresh.insert_row(ts(1, 0), vec![Some(2.0)]);

        let merged = merge(None, &[daily, refresh], &symbols, ts(1, 0));
        assert_eq!(merged.value(&ts(1, 0), "SPY"), Some(2.0));
    }

    #[tokio::test]
    async fn test_fetch_and_merge_keeps_history_rows() {
        let source = ScriptedSource::new(&[("SPY", vec![(ts(3, 10), 103.0)])]);
        let symbols = syms(&["SPY"]);
        let mut history = PriceTable::new(&symbols);
        history.insert_row(ts(2, 10), vec![Some(102.0)]);

        let table = fetch_and_merge(
            &source,
            Some(&history),
            &symbols,
            FetchRange::Period { days: 5 },
            Granularity::Hourly,
            ts(1, 0),
        )
        .await
        .into_table()
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.value(&ts(2, 10), "SPY"), Some(102.0));
        assert_eq!(table.value(&ts(3, 10), "SPY"), Some(103.0));
    }
}
