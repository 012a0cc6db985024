use crate::core::price::{FetchRange, Granularity, PriceSource};
use crate::core::series::{Observation, PriceTable};
use crate::core::treasury::{CompanyFundamentals, FundamentalsProvider};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = "datdash/1.0";

/// Converts an exchange timestamp to timezone-naive local wall time. Daily
/// bars collapse to local midnight so every symbol lands on the same row.
fn to_local_naive(ts: i64, gmtoffset: i64, granularity: Granularity) -> Option<NaiveDateTime> {
    let local = DateTime::from_timestamp(ts + gmtoffset, 0)?.naive_utc();
    Some(match granularity {
        Granularity::Daily => local.date().and_time(NaiveTime::MIN),
        Granularity::Hourly => local,
    })
}

fn range_query(range: FetchRange) -> String {
    match range {
        FetchRange::Since(date) => {
            let period1 = date.and_time(NaiveTime::MIN).and_utc().timestamp();
            let period2 = Utc::now().timestamp();
            format!("period1={period1}&period2={period2}")
        }
        FetchRange::Period { days } => format!("range={days}d"),
    }
}

/// Adjusted close prices from the Yahoo Finance chart API.
pub struct YahooPriceSource {
    base_url: String,
}

impl YahooPriceSource {
    pub fn new(base_url: &str) -> Self {
        YahooPriceSource {
            base_url: base_url.to_string(),
        }
    }

    async fn fetch_symbol(
        &self,
        client: &reqwest::Client,
        symbol: &str,
        range: FetchRange,
        granularity: Granularity,
    ) -> Result<Vec<Observation>> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval={}&{}&events=div%2Csplits",
            self.base_url,
            symbol,
            granularity.interval(),
            range_query(range)
        );
        debug!("Requesting price data from {}", url);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for symbol: {}",
                response.status(),
                symbol
            ));
        }

        let data = response
            .json::<YahooChartResponse>()
            .await
            .with_context(|| format!("Failed to parse chart response for {symbol}"))?;
        let item = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", symbol))?;

        Ok(item.into_observations(symbol, granularity))
    }
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
struct AdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

impl ChartItem {
    /// Prefers dividend/split adjusted closes; intraday bars only have raw
    /// closes.
    fn into_observations(self, symbol: &str, granularity: Granularity) -> Vec<Observation> {
        let (Some(timestamps), Some(indicators)) = (self.timestamp, self.indicators) else {
            return Vec::new();
        };
        let adjusted = indicators
            .adjclose
            .into_iter()
            .next()
            .and_then(|a| a.adjclose);
        let closes = adjusted.or_else(|| indicators.quote.into_iter().next().and_then(|q| q.close));
        let Some(closes) = closes else {
            return Vec::new();
        };

        timestamps
            .into_iter()
            .zip(closes)
            .filter_map(|(ts, close)| {
                to_local_naive(ts, self.meta.gmtoffset, granularity)
                    .map(|local| Observation::new(local, symbol, close))
            })
            .collect()
    }
}

#[async_trait]
impl PriceSource for YahooPriceSource {
    /// One chart request per symbol, issued concurrently. A symbol whose
    /// request fails stays in the table as an all-missing column.
    #[instrument(
        name = "YahooPriceFetch",
        skip(self, symbols),
        fields(symbols = ?symbols)
    )]
    async fn fetch(
        &self,
        symbols: &[String],
        range: FetchRange,
        granularity: Granularity,
    ) -> Result<PriceTable> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        let futures = symbols.iter().map(|symbol| {
            let client = &client;
            async move {
                let result = self.fetch_symbol(client, symbol, range, granularity).await;
                (symbol, result)
            }
        });

        let mut observations = Vec::new();
        for (symbol, result) in join_all(futures).await {
            match result {
                Ok(symbol_obs) => {
                    debug!(%symbol, bars = symbol_obs.len(), "Received price bars");
                    observations.extend(symbol_obs);
                }
                Err(e) => warn!(%symbol, error = %e, "Symbol fetch failed"),
            }
        }

        Ok(PriceTable::from_observations(symbols, observations))
    }
}

/// Share counts, debt and cash from the Yahoo quote summary and fundamentals
/// timeseries APIs.
pub struct YahooFundamentalsProvider {
    base_url: String,
}

/// How far back to look for the latest quarterly diluted share count.
const DILUTED_SHARES_LOOKBACK_DAYS: i64 = 730;

impl YahooFundamentalsProvider {
    pub fn new(base_url: &str) -> Self {
        YahooFundamentalsProvider {
            base_url: base_url.to_string(),
        }
    }

    async fn get_text(&self, client: &reqwest::Client, url: &str, symbol: &str) -> Result<String> {
        debug!("Requesting fundamentals from {}", url);
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {}", e, symbol))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for symbol: {}",
                response.status(),
                symbol
            ));
        }
        Ok(response.text().await?)
    }

    /// Most recent quarterly "Diluted Average Shares" figure.
    async fn fetch_diluted_shares(
        &self,
        client: &reqwest::Client,
        symbol: &str,
    ) -> Result<Option<f64>> {
        let period2 = Utc::now().timestamp();
        let period1 = period2 - DILUTED_SHARES_LOOKBACK_DAYS * 86_400;
        let url = format!(
            "{}/ws/fundamentals-timeseries/v1/finance/timeseries/{}?type=quarterlyDilutedAverageShares&period1={}&period2={}",
            self.base_url, symbol, period1, period2
        );
        let text = self.get_text(client, &url, symbol).await?;
        let data: TimeseriesResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse timeseries response for {}: {}", symbol, e))?;

        Ok(data
            .timeseries
            .result
            .unwrap_or_default()
            .into_iter()
            .flat_map(|item| item.diluted_average_shares.unwrap_or_default())
            .flatten()
            .filter_map(|point| Some((point.as_of_date, raw(point.reported_value)?)))
            .max_by_key(|(as_of, _)| *as_of)
            .map(|(_, shares)| shares))
    }
}

#[derive(Deserialize, Debug)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryResult,
}

#[derive(Deserialize, Debug)]
struct QuoteSummaryResult {
    result: Option<Vec<QuoteSummaryItem>>,
}

#[derive(Deserialize, Debug)]
struct QuoteSummaryItem {
    #[serde(rename = "defaultKeyStatistics")]
    key_statistics: Option<KeyStatistics>,
    #[serde(rename = "financialData")]
    financial_data: Option<FinancialData>,
}

#[derive(Deserialize, Debug)]
struct KeyStatistics {
    #[serde(rename = "sharesOutstanding")]
    shares_outstanding: Option<RawValue>,
}

#[derive(Deserialize, Debug)]
struct FinancialData {
    #[serde(rename = "totalDebt")]
    total_debt: Option<RawValue>,
    #[serde(rename = "totalCash")]
    total_cash: Option<RawValue>,
}

#[derive(Deserialize, Debug)]
struct RawValue {
    raw: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct TimeseriesResponse {
    timeseries: TimeseriesResult,
}

#[derive(Deserialize, Debug)]
struct TimeseriesResult {
    result: Option<Vec<TimeseriesItem>>,
}

#[derive(Deserialize, Debug)]
struct TimeseriesItem {
    #[serde(rename = "quarterlyDilutedAverageShares")]
    diluted_average_shares: Option<Vec<Option<TimeseriesPoint>>>,
}

#[derive(Deserialize, Debug)]
struct TimeseriesPoint {
    #[serde(rename = "asOfDate")]
    as_of_date: NaiveDate,
    #[serde(rename = "reportedValue")]
    reported_value: Option<RawValue>,
}

fn raw(value: Option<RawValue>) -> Option<f64> {
    value.and_then(|v| v.raw)
}

#[async_trait]
impl FundamentalsProvider for YahooFundamentalsProvider {
    /// A failed diluted-shares lookup leaves that field unset; the quote
    /// summary decides success.
    #[instrument(name = "YahooFundamentalsFetch", skip(self))]
    async fn fetch_fundamentals(&self, symbol: &str) -> Result<CompanyFundamentals> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules=defaultKeyStatistics%2CfinancialData",
            self.base_url, symbol
        );
        let text = self.get_text(&client, &url, symbol).await?;
        let data: QuoteSummaryResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;
        let item = data
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| anyhow!("No fundamentals found for symbol: {}", symbol))?;

        let diluted_shares = self
            .fetch_diluted_shares(&client, symbol)
            .await
            .unwrap_or_else(|e| {
                warn!(%symbol, error = %e, "Diluted share count unavailable");
                None
            });

        let (total_debt, total_cash) = match item.financial_data {
            Some(f) => (raw(f.total_debt), raw(f.total_cash)),
            None => (None, None),
        };
        Ok(CompanyFundamentals {
            diluted_shares,
            shares_outstanding: raw(item.key_statistics.and_then(|k| k.shares_outstanding)),
            total_debt,
            total_cash,
        })
    }
}
