//! Price source abstractions and fetch parameters

use crate::core::series::PriceTable;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt::Display;

/// Bar size requested from a price source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Daily,
    Hourly,
}

impl Granularity {
    /// Interval parameter understood by the chart API.
    pub fn interval(&self) -> &'static str {
        match self {
            Granularity::Daily => "1d",
            Granularity::Hourly => "1h",
        }
    }
}

impl Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interval())
    }
}

/// Time span of a fetch: either everything since a start date, or a short
/// trailing lookback measured in calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchRange {
    Since(NaiveDate),
    Period { days: u32 },
}

impl Display for FetchRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchRange::Since(date) => write!(f, "since {date}"),
            FetchRange::Period { days } => write!(f, "{days}d"),
        }
    }
}

/// Identity of a fetch request. Two requests share cached results only when
/// the full symbol list, the range and the granularity all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub symbols: Vec<String>,
    pub range: FetchRange,
    pub granularity: Granularity,
}

impl FetchKey {
    pub fn new(symbols: &[String], range: FetchRange, granularity: Granularity) -> Self {
        Self {
            symbols: symbols.to_vec(),
            range,
            granularity,
        }
    }
}

/// A market-data provider returning adjusted close prices.
///
/// The returned table has one column per requested symbol, in request order,
/// whatever the number of symbols. An empty table and an `Err` both mean the
/// fetch failed; callers treat them the same way.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(
        &self,
        symbols: &[String],
        range: FetchRange,
        granularity: Granularity,
    ) -> Result<PriceTable>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_interval() {
        assert_eq!(Granularity::Daily.to_string(), "1d");
        assert_eq!(Granularity::Hourly.interval(), "1h");
        assert_eq!(FetchRange::Period { days: 59 }.to_string(), "59d");
    }

    #[test]
    fn test_fetch_key_distinguishes_symbol_sets() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let a = FetchKey::new(
            &["SPY".to_string(), "MSTR".to_string()],
            FetchRange::Since(start),
            Granularity::Daily,
        );
        let b = FetchKey::new(&["SPY".to_string()], FetchRange::Since(start), Granularity::Daily);
        let c = FetchKey::new(
            &["SPY".to_string(), "MSTR".to_string()],
            FetchRange::Since(start),
            Granularity::Hourly,
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.clone(), a);
    }
}
