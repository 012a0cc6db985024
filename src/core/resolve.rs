//! Base and current price lookup over a merged price table.

use crate::core::series::PriceTable;
use chrono::{Duration, NaiveDate, NaiveTime};
use std::collections::BTreeMap;

/// Symbol to price. A symbol without a usable price is simply absent.
pub type PriceMap = BTreeMap<String, f64>;

/// How far before the target date a base price may come from. Covers long
/// weekends and exchange holidays.
pub const BASE_PRICE_LOOKBACK_DAYS: i64 = 10;

/// Most recent price on or before the end of `target_date`, searching back
/// at most [`BASE_PRICE_LOOKBACK_DAYS`].
pub fn base_price(table: &PriceTable, symbol: &str, target_date: NaiveDate) -> Option<f64> {
    base_price_within(
        table,
        symbol,
        target_date,
        Duration::days(BASE_PRICE_LOOKBACK_DAYS),
    )
}

/// Like [`base_price`] with an explicit lookback horizon. No trading
/// calendar is consulted; weekends and holidays fall out of searching
/// backward through whatever sessions the table holds.
pub fn base_price_within(
    table: &PriceTable,
    symbol: &str,
    target_date: NaiveDate,
    lookback: Duration,
) -> Option<f64> {
    let start_of_day = target_date.and_time(NaiveTime::MIN);
    let end_exclusive = start_of_day + Duration::days(1);
    let earliest = start_of_day - lookback;

    table
        .observations(symbol)
        .rev()
        .find(|(ts, _)| *ts < end_exclusive)
        .filter(|(ts, _)| *ts >= earliest)
        .map(|(_, price)| price)
}

/// Freshest observed price for `symbol`.
pub fn current_price(table: &PriceTable, symbol: &str) -> Option<f64> {
    table.observations(symbol).next_back().map(|(_, price)| price)
}

pub fn base_prices(table: &PriceTable, symbols: &[String], target_date: NaiveDate) -> PriceMap {
    symbols
        .iter()
        .filter_map(|s| base_price(table, s, target_date).map(|p| (s.clone(), p)))
        .collect()
}

pub fn current_prices(table: &PriceTable, symbols: &[String]) -> PriceMap {
    symbols
        .iter()
        .filter_map(|s| current_price(table, s).map(|p| (s.clone(), p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::Observation;
    use chrono::NaiveDateTime;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn at(d: u32, hour: u32) -> NaiveDateTime {
        day(d).and_hms_opt(hour, 0, 0).unwrap()
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // Thu 2 .. Fri 3, weekend 4-5, Mon 6
    fn weekday_table() -> PriceTable {
        PriceTable::from_observations(
            &syms(&["SPY", "MSTR"]),
            vec![
                Observation::new(at(2, 0), "SPY", Some(100.0)),
                Observation::new(at(3, 0), "SPY", Some(101.0)),
                Observation::new(at(6, 0), "SPY", Some(103.0)),
                Observation::new(at(2, 0), "MSTR", Some(300.0)),
                Observation::new(at(3, 0), "MSTR", None),
                Observation::new(at(6, 0), "MSTR", Some(320.0)),
            ],
        )
    }

    #[test]
    fn test_base_price_on_weekend_uses_prior_session() {
        let table = weekday_table();
        assert_eq!(base_price(&table, "SPY", day(5)), Some(101.0));
        assert_eq!(base_price(&table, "SPY", day(3)), Some(101.0));
    }

    #[test]
    fn test_base_price_skips_missing_cells() {
        let table = weekday_table();
        assert_eq!(base_price(&table, "MSTR", day(4)), Some(300.0));
    }

    #[test]
    fn test_base_price_includes_intraday_rows_of_target_day() {
        let table = PriceTable::from_observations(
            &syms(&["SPY"]),
            vec![
                Observation::new(at(3, 10), "SPY", Some(10.0)),
                Observation::new(at(3, 15), "SPY", Some(11.0)),
                Observation::new(at(6, 10), "SPY", Some(12.0)),
            ],
        );
        assert_eq!(base_price(&table, "SPY", day(3)), Some(11.0));
    }

    #[test]
    fn test_base_price_missing_outside_lookback() {
        let table = weekday_table();
        assert_eq!(base_price(&table, "SPY", day(1)), None);
        assert_eq!(
            base_price_within(&table, "SPY", day(20), Duration::days(10)),
            None
        );
        assert_eq!(
            base_price_within(&table, "SPY", day(20), Duration::days(14)),
            Some(103.0)
        );
        assert_eq!(base_price(&table, "UNKNOWN", day(5)), None);
    }

    #[test]
    fn test_current_price_is_freshest_observation() {
        let table = weekday_table();
        assert_eq!(current_price(&table, "SPY"), Some(103.0));
        assert_eq!(current_price(&table, "UNKNOWN"), None);

        let prices = current_prices(&table, &syms(&["SPY", "MSTR", "UNKNOWN"]));
        assert_eq!(prices.len(), 2);
        assert_eq!(prices.get("MSTR"), Some(&320.0));
    }

    #[test]
    fn test_base_prices_collects_available_symbols() {
        let table = weekday_table();
        let prices = base_prices(&table, &syms(&["SPY", "MSTR"]), day(3));
        assert_eq!(prices.get("SPY"), Some(&101.0));
        assert_eq!(prices.get("MSTR"), Some(&300.0));
    }
}
