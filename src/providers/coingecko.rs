use super::util::with_retry;
use crate::core::holdings::CoinType;
use crate::core::treasury::{TreasuryCompany, TreasuryProvider};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

const RETRIES: usize = 2;
const RETRY_DELAY_MS: u64 = 500;

/// Coin prices and public-company treasury lists from the CoinGecko API.
pub struct CoinGeckoProvider {
    base_url: String,
    retry_delay_ms: u64,
}

impl CoinGeckoProvider {
    pub fn new(base_url: &str) -> Self {
        CoinGeckoProvider {
            base_url: base_url.to_string(),
            retry_delay_ms: RETRY_DELAY_MS,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!("Requesting {}", url);
        let client = reqwest::Client::new();
        let response = with_retry(
            || async {
                client
                    .get(url)
                    .header("Accept", "application/json")
                    .send()
                    .await?
                    .error_for_status()
            },
            RETRIES,
            self.retry_delay_ms,
        )
        .await?;

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| anyhow!("Failed to parse response from {}: {}", url, e))
    }
}

#[derive(Deserialize, Debug)]
struct TreasuryResponse {
    #[serde(default)]
    companies: Vec<CompanyRecord>,
}

#[derive(Deserialize, Debug)]
struct CompanyRecord {
    symbol: String,
    total_holdings: Option<f64>,
}

#[async_trait]
impl TreasuryProvider for CoinGeckoProvider {
    #[instrument(name = "CoinGeckoPrice", skip(self))]
    async fn fetch_coin_price(&self, coin: CoinType) -> Result<f64> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url,
            coin.as_str()
        );
        let data: HashMap<String, HashMap<String, f64>> = self.get_json(&url).await?;
        data.get(coin.as_str())
            .and_then(|prices| prices.get("usd"))
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| anyhow!("No USD price for {}", coin))
    }

    #[instrument(name = "CoinGeckoTreasury", skip(self))]
    async fn fetch_treasury_companies(&self, coin: CoinType) -> Result<Vec<TreasuryCompany>> {
        let url = format!("{}/companies/public_treasury/{}", self.base_url, coin.as_str());
        let data: TreasuryResponse = self.get_json(&url).await?;
        Ok(data
            .companies
            .into_iter()
            .filter_map(|c| {
                c.total_holdings.map(|total_holdings| TreasuryCompany {
                    symbol: c.symbol,
                    total_holdings,
                })
            })
            .collect())
    }
}
