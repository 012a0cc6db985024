//! Offline jobs that keep the data directory current.

use super::ui;
use crate::core::config::AppConfig;
use crate::core::merge::{self, FetchOutcome};
use crate::core::price::{FetchRange, Granularity, PriceSource};
use crate::core::series::PriceTable;
use crate::core::treasury::{self, FundamentalsProvider, TreasuryProvider};
use crate::store::history::HistoryStore;
use anyhow::{Result, anyhow};
use chrono::{NaiveDateTime, Utc};
use std::path::Path;
use tracing::info;

/// Longest hourly lookback the chart API serves.
pub const HOURLY_HISTORY_DAYS: u32 = 59;

/// Fetches the hourly window for every configured symbol and folds it into
/// `existing`. Columns already in the store but no longer configured are
/// kept. `None` when the fetch produced nothing.
pub async fn accumulate_hourly(
    config: &AppConfig,
    source: &dyn PriceSource,
    existing: Option<&PriceTable>,
) -> Option<PriceTable> {
    let symbols = config.all_symbols();
    let fresh = match merge::fetch_with_retry(
        source,
        &symbols,
        FetchRange::Period {
            days: HOURLY_HISTORY_DAYS,
        },
        Granularity::Hourly,
    )
    .await
    {
        FetchOutcome::Data(table) => table,
        FetchOutcome::NoData => return None,
    };

    let mut columns: Vec<String> = existing.map(|t| t.symbols().to_vec()).unwrap_or_default();
    for symbol in symbols {
        if !columns.contains(&symbol) {
            columns.push(symbol);
        }
    }
    Some(merge::merge(existing, &[fresh], &columns, NaiveDateTime::MIN))
}

pub async fn refresh_prices(
    config: &AppConfig,
    source: &dyn PriceSource,
    store: &HistoryStore,
) -> Result<()> {
    let existing = store.load()?;
    let previous_rows = existing.as_ref().map_or(0, PriceTable::len);

    let merged = accumulate_hourly(config, source, existing.as_ref())
        .await
        .ok_or_else(|| anyhow!("No hourly prices fetched; history store left unchanged"))?;
    store.save(&merged)?;

    info!(
        rows = merged.len(),
        added = merged.len().saturating_sub(previous_rows),
        "History store updated"
    );
    println!(
        "Saved {} rows ({} new) for {} symbols to {}",
        merged.len(),
        merged.len().saturating_sub(previous_rows),
        merged.symbols().len(),
        store.path().display()
    );
    Ok(())
}

/// Rebuilds the holdings snapshot and replaces the file wholesale. The file
/// is left alone when no coin could be refreshed.
pub async fn refresh_holdings(
    config: &AppConfig,
    treasury_provider: &dyn TreasuryProvider,
    fundamentals: &dyn FundamentalsProvider,
    path: &Path,
) -> Result<()> {
    let total = treasury::holdings_ticker_count(config);
    let pb = ui::new_progress_bar(total as u64, true);
    pb.set_message("Refreshing holdings");

    let snapshot = treasury::refresh_holdings(
        config,
        treasury_provider,
        fundamentals,
        Utc::now(),
        &|ticker| {
            pb.set_message(ticker.to_string());
            pb.inc(1);
        },
    )
    .await;
    pb.finish_and_clear();

    if snapshot.coins.is_empty() {
        return Err(anyhow!("No holdings refreshed; snapshot left unchanged"));
    }
    snapshot.validate()?;
    snapshot.save(path)?;

    let tickers: usize = snapshot.coins.values().map(|c| c.tickers.len()).sum();
    println!(
        "Saved holdings for {} tickers across {} coins to {}",
        tickers,
        snapshot.coins.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::Observation;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct HourlySource {
        table: Option<PriceTable>,
    }

    #[async_trait]
    impl PriceSource for HourlySource {
        async fn fetch(
            &self,
            symbols: &[String],
            _range: FetchRange,
            _granularity: Granularity,
        ) -> Result<PriceTable> {
            self.table
                .as_ref()
                .map(|t| t.select(symbols))
                .ok_or_else(|| anyhow!("offline"))
        }
    }

    fn hour(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(h, 30, 0)
            .unwrap()
    }

    fn config() -> AppConfig {
        serde_yaml::from_str(
            r#"
dashboards:
  - name: "Test"
    benchmark: "SPY"
    tickers: ["AAA"]
    ytd_base_date: "2024-12-31"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_prices_merges_into_store() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::in_dir(dir.path());

        let old_symbols = vec!["SPY".to_string(), "OLD".to_string()];
        let mut existing = PriceTable::new(&old_symbols);
        existing.insert_row(hour(1, 9), vec![Some(500.0), Some(7.0)]);
        existing.insert_row(hour(2, 9), vec![Some(501.0), Some(7.5)]);
        store.save(&existing).unwrap();

        let symbols = vec!["SPY".to_string(), "AAA".to_string()];
        let fresh = PriceTable::from_observations(
            &symbols,
            vec![
                Observation::new(hour(2, 9), "SPY", Some(502.0)),
                Observation::new(hour(2, 9), "AAA", Some(20.0)),
                Observation::new(hour(3, 9), "SPY", Some(503.0)),
                Observation::new(hour(3, 9), "AAA", Some(21.0)),
            ],
        );
        let source = HourlySource { table: Some(fresh) };

        refresh_prices(&config(), &source, &store).await.unwrap();

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.symbols(), &["SPY", "OLD", "AAA"]);
        assert_eq!(saved.len(), 3);
        assert_eq!(saved.value(&hour(1, 9), "OLD"), Some(7.0));
        // The fresh row replaces the stored one wholesale.
        assert_eq!(saved.value(&hour(2, 9), "SPY"), Some(502.0));
        assert_eq!(saved.value(&hour(2, 9), "OLD"), None);
        assert_eq!(saved.value(&hour(3, 9), "AAA"), Some(21.0));
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::in_dir(dir.path());

        let result = refresh_prices(&config(), &HourlySource { table: None }, &store).await;
        assert!(result.is_err());
        assert!(!store.path().exists());
    }
}
