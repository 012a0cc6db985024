//! Inputs of the holdings refresh job and the snapshot assembly itself.

use crate::core::config::{AppConfig, TickerHoldingsConfig};
use crate::core::holdings::{CoinHoldings, CoinType, HoldingsEntry, HoldingsSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// One public company's disclosed treasury.
#[derive(Debug, Clone, PartialEq)]
pub struct TreasuryCompany {
    pub symbol: String,
    pub total_holdings: f64,
}

#[async_trait]
pub trait TreasuryProvider: Send + Sync {
    async fn fetch_coin_price(&self, coin: CoinType) -> Result<f64>;
    async fn fetch_treasury_companies(&self, coin: CoinType) -> Result<Vec<TreasuryCompany>>;
}

/// Balance-sheet facts for one listed company.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyFundamentals {
    /// Latest quarterly diluted average share count.
    pub diluted_shares: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub total_debt: Option<f64>,
    pub total_cash: Option<f64>,
}

#[async_trait]
pub trait FundamentalsProvider: Send + Sync {
    async fn fetch_fundamentals(&self, symbol: &str) -> Result<CompanyFundamentals>;
}

/// Builds a fresh snapshot for every dashboard that names a coin type and
/// holdings. Dashboards sharing a coin contribute to the same ticker map;
/// the coin price and treasury list are fetched once per coin. A coin whose
/// price cannot be fetched is left out; a ticker the treasury list does not
/// know is kept with `coin_held` unset.
///
/// `on_ticker` is called once per distinct ticker processed.
pub async fn refresh_holdings(
    config: &AppConfig,
    treasury: &dyn TreasuryProvider,
    fundamentals: &dyn FundamentalsProvider,
    now: DateTime<Utc>,
    on_ticker: &(dyn Fn(&str) + Send + Sync),
) -> HoldingsSnapshot {
    let mut snapshot = HoldingsSnapshot {
        last_updated: Some(now),
        coins: BTreeMap::new(),
    };
    let mut treasuries: BTreeMap<CoinType, Vec<TreasuryCompany>> = BTreeMap::new();
    let mut failed: BTreeSet<CoinType> = BTreeSet::new();
    let today = now.date_naive();

    for dashboard in &config.dashboards {
        let Some(coin) = dashboard.coin_type else {
            continue;
        };
        if dashboard.holdings.is_empty() || failed.contains(&coin) {
            continue;
        }

        if !snapshot.coins.contains_key(&coin) {
            let coin_price = match treasury.fetch_coin_price(coin).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(%coin, error = %e, "Failed to fetch coin price, skipping");
                    failed.insert(coin);
                    continue;
                }
            };
            info!(%coin, coin_price, "Fetched coin price");

            let companies = treasury
                .fetch_treasury_companies(coin)
                .await
                .unwrap_or_else(|e| {
                    warn!(%coin, error = %e, "Failed to fetch treasury companies");
                    Vec::new()
                });
            treasuries.insert(coin, companies);
            snapshot.coins.insert(
                coin,
                CoinHoldings {
                    coin_price_usd: Some(coin_price),
                    last_updated: Some(now),
                    tickers: BTreeMap::new(),
                },
            );
        }

        let by_symbol: BTreeMap<&str, &TreasuryCompany> = treasuries
            .get(&coin)
            .into_iter()
            .flatten()
            .map(|c| (c.symbol.as_str(), c))
            .collect();
        let Some(coin_holdings) = snapshot.coins.get_mut(&coin) else {
            continue;
        };

        for (ticker, ticker_config) in &dashboard.holdings {
            if coin_holdings.tickers.contains_key(ticker) {
                debug!(%coin, %ticker, dashboard = %dashboard.name, "Ticker already refreshed");
                continue;
            }
            let company = ticker_config
                .coingecko_symbol
                .as_deref()
                .and_then(|s| by_symbol.get(s));
            let (coin_held, source, coin_updated) = match company {
                Some(c) => (Some(c.total_holdings), "coingecko", Some(today)),
                None => {
                    warn!(%ticker, "Ticker not found in treasury list");
                    (None, "missing", None)
                }
            };

            let facts = fundamentals
                .fetch_fundamentals(ticker)
                .await
                .unwrap_or_else(|e| {
                    warn!(%ticker, error = %e, "Failed to fetch fundamentals");
                    CompanyFundamentals::default()
                });
            let (shares, shares_type) = resolve_shares(ticker_config, &facts);

            coin_holdings.tickers.insert(
                ticker.clone(),
                HoldingsEntry {
                    coin_held,
                    coin_held_updated: coin_updated,
                    coin_held_source: Some(source.to_string()),
                    shares_outstanding: shares,
                    shares_type: Some(shares_type),
                    shares_updated: Some(today),
                    total_debt: facts.total_debt,
                    total_cash: facts.total_cash,
                },
            );
            on_ticker(ticker);
        }
    }

    snapshot
}

/// Distinct `(coin, ticker)` pairs `refresh_holdings` will visit.
pub fn holdings_ticker_count(config: &AppConfig) -> usize {
    config
        .dashboards
        .iter()
        .filter_map(|d| d.coin_type.map(|coin| (coin, &d.holdings)))
        .flat_map(|(coin, holdings)| holdings.keys().map(move |ticker| (coin, ticker)))
        .collect::<BTreeSet<_>>()
        .len()
}

/// A configured override beats the provider's diluted share count, which
/// beats the basic count.
fn resolve_shares(
    ticker_config: &TickerHoldingsConfig,
    facts: &CompanyFundamentals,
) -> (Option<f64>, String) {
    if let Some(shares) = ticker_config.shares_override.filter(|s| *s > 0.0) {
        let kind = ticker_config
            .shares_type_override
            .clone()
            .unwrap_or_else(|| "manual".to_string());
        return (Some(shares), kind);
    }
    if let Some(shares) = facts.diluted_shares.filter(|s| *s > 0.0) {
        return (Some(shares), "diluted".to_string());
    }
    match facts.shares_outstanding.filter(|s| *s > 0.0) {
        Some(shares) => (Some(shares), "basic".to_string()),
        None => (None, "unknown".to_string()),
    }
}
