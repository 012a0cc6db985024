//! Debt-adjusted mNAV: market capitalisation over the net value of the
//! treasury.
//!
//! `mNAV = market cap / (coin value + cash - non-convertible debt)`.
//! Without a convertible-debt figure for a ticker, all of its debt is
//! assumed convertible and nothing is deducted, since diluted share counts
//! already reflect conversion.

use crate::core::holdings::CoinHoldings;
use crate::core::resolve::PriceMap;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationRecord {
    pub symbol: String,
    pub mnav: Option<f64>,
    pub market_cap: f64,
    pub coin_value: f64,
    pub adjusted_nav: f64,
    pub coin_held: f64,
    pub coin_source: String,
    pub coin_price: f64,
    pub shares_outstanding: f64,
    pub shares_type: String,
    pub stock_price: f64,
    pub cash: f64,
    pub convertible_debt: Option<f64>,
    pub non_convertible_debt: f64,
    pub holdings_updated: Option<NaiveDate>,
}

/// Debt that still claims against NAV.
pub fn non_convertible_debt(total_debt: f64, convertible_debt: Option<f64>) -> f64 {
    match convertible_debt {
        Some(convertible) => (total_debt - convertible).max(0.0),
        None => 0.0,
    }
}

/// Market cap over adjusted NAV, missing unless the NAV is positive.
pub fn mnav(market_cap: f64, adjusted_nav: f64) -> Option<f64> {
    (adjusted_nav > 0.0).then(|| market_cap / adjusted_nav)
}

/// Values every symbol that has holdings, a share count and a current
/// price. Symbols missing any of those are left out. `coin_price_override`
/// replaces the snapshot coin price for scenario analysis.
pub fn compute_valuation(
    holdings: &CoinHoldings,
    symbols: &[String],
    current_prices: &PriceMap,
    convertible_debt: &BTreeMap<String, f64>,
    coin_price_override: Option<f64>,
) -> Vec<ValuationRecord> {
    let Some(coin_price) = coin_price_override
        .filter(|p| *p > 0.0)
        .or_else(|| holdings.coin_price())
    else {
        debug!("No coin price available, skipping valuation");
        return Vec::new();
    };

    symbols
        .iter()
        .filter_map(|symbol| {
            let entry = holdings.entry(symbol)?;
            let coin_held = entry.coin_held()?;
            let shares = entry.shares_outstanding()?;
            let stock_price = current_prices.get(symbol).copied().filter(|p| *p > 0.0);
            let Some(stock_price) = stock_price else {
                debug!(%symbol, "No current price, skipping valuation");
                return None;
            };

            let market_cap = shares * stock_price;
            let coin_value = coin_held * coin_price;
            let cash = entry.total_cash();
            let convertible = convertible_debt.get(symbol).copied();
            let non_conv = non_convertible_debt(entry.total_debt(), convertible);
            let adjusted_nav = coin_value + cash - non_conv;

            Some(ValuationRecord {
                symbol: symbol.clone(),
                mnav: mnav(market_cap, adjusted_nav),
                market_cap,
                coin_value,
                adjusted_nav,
                coin_held,
                coin_source: entry.coin_source().to_string(),
                coin_price,
                shares_outstanding: shares,
                shares_type: entry.shares_type().to_string(),
                stock_price,
                cash,
                convertible_debt: convertible,
                non_convertible_debt: non_conv,
                holdings_updated: entry.coin_held_updated,
            })
        })
        .collect()
}
