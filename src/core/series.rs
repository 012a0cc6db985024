//! Rectangular price tables: rows keyed by timezone-naive timestamp, one
//! column per symbol.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// A single price observation. `price` is `None` when the source reported no
/// value for that timestamp, which is distinct from a zero price.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub price: Option<f64>,
}

impl Observation {
    pub fn new(timestamp: NaiveDateTime, symbol: &str, price: Option<f64>) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            price,
        }
    }
}

/// Prices must be positive and finite; anything else is a missing value.
fn clean(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p > 0.0)
}

/// Price table with strictly increasing, unique timestamps.
///
/// Rows are stored in a `BTreeMap`, so ordering and uniqueness hold by
/// construction. Inserting a row at an existing timestamp replaces the old
/// row wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    symbols: Vec<String>,
    rows: BTreeMap<NaiveDateTime, Vec<Option<f64>>>,
}

impl PriceTable {
    pub fn new(symbols: &[String]) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if !unique.contains(symbol) {
                unique.push(symbol.clone());
            }
        }
        Self {
            symbols: unique,
            rows: BTreeMap::new(),
        }
    }

    /// Builds a table with columns in `symbols` order. Observations for
    /// symbols outside that list are ignored; a later observation for the
    /// same (timestamp, symbol) pair overwrites an earlier one.
    pub fn from_observations(
        symbols: &[String],
        observations: impl IntoIterator<Item = Observation>,
    ) -> Self {
        let mut table = Self::new(symbols);
        for obs in observations {
            if let Some(idx) = table.column_index(&obs.symbol) {
                let width = table.symbols.len();
                let row = table
                    .rows
                    .entry(obs.timestamp)
                    .or_insert_with(|| vec![None; width]);
                row[idx] = clean(obs.price);
            }
        }
        table
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// A table with no rows or no columns carries no data.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.symbols.is_empty()
    }

    pub fn has_column(&self, symbol: &str) -> bool {
        self.column_index(symbol).is_some()
    }

    fn column_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = &NaiveDateTime> {
        self.rows.keys()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.keys().next().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.keys().next_back().copied()
    }

    /// Iterates rows in ascending timestamp order; values follow `symbols()`.
    pub fn rows(&self) -> impl DoubleEndedIterator<Item = (&NaiveDateTime, &[Option<f64>])> {
        self.rows.iter().map(|(ts, values)| (ts, values.as_slice()))
    }

    /// Inserts a row aligned with `symbols()`, replacing any existing row at
    /// the same timestamp.
    pub fn insert_row(&mut self, timestamp: NaiveDateTime, values: Vec<Option<f64>>) {
        let width = self.symbols.len();
        let mut row: Vec<Option<f64>> = values.into_iter().take(width).map(clean).collect();
        row.resize(width, None);
        self.rows.insert(timestamp, row);
    }

    pub fn value(&self, timestamp: &NaiveDateTime, symbol: &str) -> Option<f64> {
        let idx = self.column_index(symbol)?;
        self.rows.get(timestamp).and_then(|row| row[idx])
    }

    /// Full column for `symbol`, including missing values; `None` when the
    /// table has no such column.
    pub fn column(&self, symbol: &str) -> Option<Vec<(NaiveDateTime, Option<f64>)>> {
        let idx = self.column_index(symbol)?;
        Some(self.rows.iter().map(|(ts, row)| (*ts, row[idx])).collect())
    }

    /// Non-missing observations for `symbol` in ascending order.
    pub fn observations<'a>(
        &'a self,
        symbol: &str,
    ) -> impl DoubleEndedIterator<Item = (NaiveDateTime, f64)> + use<'a> {
        let idx = self.column_index(symbol);
        self.rows.iter().filter_map(move |(ts, row)| {
            idx.and_then(|i| row[i]).map(|price| (*ts, price))
        })
    }

    /// True when the column is absent or has no value in any row.
    pub fn is_all_missing(&self, symbol: &str) -> bool {
        self.observations(symbol).next().is_none()
    }

    /// Restricts the table to the requested symbols it actually has, keeping
    /// the requested order.
    pub fn select(&self, symbols: &[String]) -> PriceTable {
        let kept: Vec<(String, usize)> = symbols
            .iter()
            .filter_map(|s| self.column_index(s).map(|idx| (s.clone(), idx)))
            .fold(Vec::new(), |mut acc, (s, idx)| {
                if !acc.iter().any(|(existing, _)| *existing == s) {
                    acc.push((s, idx));
                }
                acc
            });
        let rows = self
            .rows
            .iter()
            .map(|(ts, row)| (*ts, kept.iter().map(|(_, idx)| row[*idx]).collect()))
            .collect();
        PriceTable {
            symbols: kept.into_iter().map(|(s, _)| s).collect(),
            rows,
        }
    }

    /// Returns a copy whose columns are `symbols`, in that order; columns the
    /// table lacks are added as all-missing.
    pub fn with_columns(&self, symbols: &[String]) -> PriceTable {
        let mut table = PriceTable::new(symbols);
        let indices: Vec<Option<usize>> =
            table.symbols.iter().map(|s| self.column_index(s)).collect();
        for (ts, row) in &self.rows {
            let values = indices.iter().map(|idx| idx.and_then(|i| row[i])).collect();
            table.rows.insert(*ts, values);
        }
        table
    }

    /// Overwrites the column for `symbol` with values from `source`, aligned
    /// on this table's existing timestamps. Timestamps only present in
    /// `source` are not added, so other columns never gain gap rows. Returns
    /// false when the column is absent or `source` has nothing for `symbol`.
    pub fn replace_column(&mut self, symbol: &str, source: &PriceTable) -> bool {
        let Some(idx) = self.column_index(symbol) else {
            return false;
        };
        if source.is_all_missing(symbol) {
            return false;
        }
        for (ts, row) in self.rows.iter_mut() {
            row[idx] = source.value(ts, symbol);
        }
        true
    }

    /// Drops every row strictly before `start`.
    pub fn truncate_before(&mut self, start: NaiveDateTime) {
        self.rows = self.rows.split_off(&start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_observations_orders_and_aligns_rows() {
        let table = PriceTable::from_observations(
            &syms(&["SPY", "MSTR"]),
            vec![
                Observation::new(ts(3), "SPY", Some(502.0)),
                Observation::new(ts(1), "SPY", Some(500.0)),
                Observation::new(ts(1), "MSTR", Some(300.0)),
                Observation::new(ts(2), "OTHER", Some(1.0)),
            ],
        );

        assert_eq!(table.len(), 2);
        assert_eq!(table.first_timestamp(), Some(ts(1)));
        assert_eq!(table.last_timestamp(), Some(ts(3)));
        assert_eq!(table.value(&ts(1), "MSTR"), Some(300.0));
        assert_eq!(table.value(&ts(3), "MSTR"), None);
        assert!(!table.has_column("OTHER"));
    }

    #[test]
    fn test_non_positive_prices_are_missing() {
        let table = PriceTable::from_observations(
            &syms(&["SPY"]),
            vec![
                Observation::new(ts(1), "SPY", Some(0.0)),
                Observation::new(ts(2), "SPY", Some(f64::NAN)),
                Observation::new(ts(3), "SPY", Some(-4.0)),
            ],
        );
        assert!(table.is_all_missing("SPY"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_insert_row_replaces_existing_row() {
        let mut table = PriceTable::new(&syms(&["A", "B"]));
        table.insert_row(ts(1), vec![Some(1.0), Some(2.0)]);
        table.insert_row(ts(1), vec![Some(3.0)]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.value(&ts(1), "A"), Some(3.0));
        assert_eq!(table.value(&ts(1), "B"), None);
    }

    #[test]
    fn test_select_keeps_requested_order_and_intersection() {
        let mut table = PriceTable::new(&syms(&["A", "B", "C"]));
        table.insert_row(ts(1), vec![Some(1.0), Some(2.0), Some(3.0)]);

        let selected = table.select(&syms(&["C", "X", "A"]));
        assert_eq!(selected.symbols(), &syms(&["C", "A"])[..]);
        assert_eq!(selected.value(&ts(1), "C"), Some(3.0));
        assert_eq!(selected.value(&ts(1), "A"), Some(1.0));
    }

    #[test]
    fn test_replace_column_aligns_on_existing_index() {
        let mut bulk = PriceTable::new(&syms(&["A", "B"]));
        bulk.insert_row(ts(1), vec![Some(1.0), None]);
        bulk.insert_row(ts(2), vec![Some(1.1), None]);

        let retry = PriceTable::from_observations(
            &syms(&["B"]),
            vec![
                Observation::new(ts(2), "B", Some(20.0)),
                Observation::new(ts(5), "B", Some(50.0)),
            ],
        );

        assert!(bulk.replace_column("B", &retry));
        assert_eq!(bulk.len(), 2);
        assert_eq!(bulk.value(&ts(1), "B"), None);
        assert_eq!(bulk.value(&ts(2), "B"), Some(20.0));
        assert!(!bulk.replace_column("Z", &retry));
    }

    #[test]
    fn test_truncate_before_is_exclusive_of_start() {
        let mut table = PriceTable::new(&syms(&["A"]));
        for day in 1..=4 {
            table.insert_row(ts(day), vec![Some(day as f64)]);
        }
        table.truncate_before(ts(3));
        let remaining: Vec<_> = table.timestamps().copied().collect();
        assert_eq!(remaining, vec![ts(3), ts(4)]);
    }

    #[test]
    fn test_with_columns_adds_missing_columns() {
        let mut table = PriceTable::new(&syms(&["A"]));
        table.insert_row(ts(1), vec![Some(1.0)]);
        let widened = table.with_columns(&syms(&["B", "A"]));
        assert_eq!(widened.symbols(), &syms(&["B", "A"])[..]);
        assert!(widened.is_all_missing("B"));
        assert_eq!(widened.value(&ts(1), "A"), Some(1.0));
    }
}
