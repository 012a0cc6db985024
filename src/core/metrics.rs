//! Return and correlation metrics. All functions are pure; anything that
//! cannot be computed comes back as `None` rather than an error.

use crate::core::resolve::PriceMap;
use crate::core::series::PriceTable;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnRecord {
    pub symbol: String,
    pub base_price: Option<f64>,
    pub current_price: Option<f64>,
    pub ytd_return: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelativeReturnRecord {
    pub symbol: String,
    pub relative_return: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRecord {
    pub symbol: String,
    pub pearson: Option<f64>,
}

/// `current / base - 1`. Missing when either price is missing or the base
/// is not positive.
pub fn ytd_return(current: Option<f64>, base: Option<f64>) -> Option<f64> {
    let (current, base) = (current?, base?);
    if base.is_nan() || base <= 0.0 || !current.is_finite() {
        return None;
    }
    Some(current / base - 1.0)
}

pub fn compute_returns(
    symbols: &[String],
    base_prices: &PriceMap,
    current_prices: &PriceMap,
) -> Vec<ReturnRecord> {
    symbols
        .iter()
        .map(|symbol| {
            let base_price = base_prices.get(symbol).copied();
            let current_price = current_prices.get(symbol).copied();
            ReturnRecord {
                symbol: symbol.clone(),
                base_price,
                current_price,
                ytd_return: ytd_return(current_price, base_price),
            }
        })
        .collect()
}

/// Each symbol's return minus the benchmark's. Without a benchmark return
/// there is no baseline, so the whole result is empty.
pub fn relative_returns(returns: &[ReturnRecord], benchmark: &str) -> Vec<RelativeReturnRecord> {
    let Some(benchmark_return) = returns
        .iter()
        .find(|r| r.symbol == benchmark)
        .and_then(|r| r.ytd_return)
    else {
        return Vec::new();
    };

    returns
        .iter()
        .map(|r| RelativeReturnRecord {
            symbol: r.symbol.clone(),
            relative_return: r.ytd_return.map(|ret| ret - benchmark_return),
        })
        .collect()
}

/// Period-over-period percentage change for `symbol`. The first row has no
/// prior period and is dropped; a change is missing unless both adjacent
/// rows have a price.
pub fn pct_change(table: &PriceTable, symbol: &str) -> Option<Vec<(NaiveDateTime, Option<f64>)>> {
    let column = table.column(symbol)?;
    Some(
        column
            .windows(2)
            .map(|pair| {
                let (_, prev) = pair[0];
                let (ts, cur) = pair[1];
                let change = match (prev, cur) {
                    (Some(prev), Some(cur)) if prev != 0.0 => Some(cur / prev - 1.0),
                    _ => None,
                };
                (ts, change)
            })
            .collect(),
    )
}

/// Pearson correlation coefficient of two equal-length samples. Missing for
/// fewer than two points or when either sample has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Rolling Pearson correlation of each symbol's daily returns against the
/// benchmark's.
///
/// Returns are aligned by timestamp and any timestamp where either side is
/// missing is dropped, so the window counts aligned observations, not
/// calendar or raw trading days. A symbol with fewer than `window` aligned
/// pairs, or absent from the table, is missing. An empty result means the
/// benchmark itself has no column.
pub fn rolling_correlations(
    table: &PriceTable,
    benchmark: &str,
    symbols: &[String],
    window: usize,
) -> Vec<CorrelationRecord> {
    let Some(bench_returns) = pct_change(table, benchmark) else {
        return Vec::new();
    };
    let bench_by_ts: BTreeMap<NaiveDateTime, f64> = bench_returns
        .into_iter()
        .filter_map(|(ts, r)| r.map(|r| (ts, r)))
        .collect();

    symbols
        .iter()
        .map(|symbol| CorrelationRecord {
            symbol: symbol.clone(),
            pearson: pct_change(table, symbol)
                .and_then(|returns| windowed_correlation(&bench_by_ts, &returns, window)),
        })
        .collect()
}

fn windowed_correlation(
    bench_by_ts: &BTreeMap<NaiveDateTime, f64>,
    returns: &[(NaiveDateTime, Option<f64>)],
    window: usize,
) -> Option<f64> {
    if window < 2 {
        return None;
    }
    let (bench, other): (Vec<f64>, Vec<f64>) = returns
        .iter()
        .filter_map(|(ts, r)| Some((*bench_by_ts.get(ts)?, (*r)?)))
        .unzip();

    if bench.len() < window {
        return None;
    }
    let start = bench.len() - window;
    pearson(&bench[start..], &other[start..])
}
