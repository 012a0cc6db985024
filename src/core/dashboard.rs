//! Runs one dashboard: fetch, merge, resolve prices, compute metrics.

use crate::core::cache::Clock;
use crate::core::config::DashboardConfig;
use crate::core::merge::{self, FetchOutcome};
use crate::core::metrics::{self, CorrelationRecord, RelativeReturnRecord, ReturnRecord};
use crate::core::price::{FetchRange, Granularity, PriceSource};
use crate::core::resolve::{self, PriceMap};
use crate::core::series::PriceTable;
use chrono::{DateTime, NaiveTime, Utc};
use tracing::{info, instrument, warn};

/// Calendar days of hourly bars re-fetched on every run; older intraday
/// history comes from the history store.
pub const INTRADAY_REFRESH_DAYS: u32 = 5;

#[derive(Debug, Clone)]
pub struct DashboardReport {
    pub name: String,
    pub benchmark: String,
    pub tickers: Vec<String>,
    pub correlation_window: usize,
    pub base_prices: PriceMap,
    pub current_prices: PriceMap,
    pub returns: Vec<ReturnRecord>,
    pub relative_returns: Vec<RelativeReturnRecord>,
    pub correlations: Vec<CorrelationRecord>,
    /// Intraday table when one could be built, the daily table otherwise.
    pub chart: PriceTable,
    pub intraday: bool,
    pub fetched_at: DateTime<Utc>,
}

impl DashboardReport {
    pub fn return_for(&self, symbol: &str) -> Option<&ReturnRecord> {
        self.returns.iter().find(|r| r.symbol == symbol)
    }

    pub fn relative_for(&self, symbol: &str) -> Option<f64> {
        self.relative_returns
            .iter()
            .find(|r| r.symbol == symbol)
            .and_then(|r| r.relative_return)
    }

    pub fn correlation_for(&self, symbol: &str) -> Option<f64> {
        self.correlations
            .iter()
            .find(|r| r.symbol == symbol)
            .and_then(|r| r.pearson)
    }
}

#[derive(Debug, Clone)]
pub enum DashboardOutcome {
    Ready(Box<DashboardReport>),
    /// The daily fetch returned nothing at all; nothing can be shown.
    NoData,
}

/// Builds the report for `config`.
///
/// The daily series drives base prices and correlations. The intraday
/// series (history store plus a short refresh) is preferred wholesale for
/// current prices and the chart; when its refresh fails the daily series
/// stands in.
#[instrument(name = "BuildDashboard", skip_all, fields(dashboard = %config.name))]
pub async fn build_dashboard(
    config: &DashboardConfig,
    source: &dyn PriceSource,
    history: Option<&PriceTable>,
    clock: &dyn Clock,
) -> DashboardOutcome {
    let symbols = config.all_symbols();

    let daily_start = config.data_start_date();
    let daily = match merge::fetch_and_merge(
        source,
        None,
        &symbols,
        FetchRange::Since(daily_start),
        Granularity::Daily,
        daily_start.and_time(NaiveTime::MIN),
    )
    .await
    {
        FetchOutcome::Data(table) if !table.is_empty() => table,
        _ => {
            warn!("Daily fetch returned no data");
            return DashboardOutcome::NoData;
        }
    };

    let intraday = merge::fetch_and_merge(
        source,
        history,
        &symbols,
        FetchRange::Period {
            days: INTRADAY_REFRESH_DAYS,
        },
        Granularity::Hourly,
        config.ytd_base_date.and_time(NaiveTime::MIN),
    )
    .await
    .into_table()
    .filter(|table| !table.is_empty());
    if intraday.is_none() {
        warn!("Intraday refresh returned no data, using daily prices");
    }
    let fetched_at = clock.now();

    let base_prices = resolve::base_prices(&daily, &symbols, config.ytd_base_date);
    let current_table = intraday.as_ref().unwrap_or(&daily);
    let current_prices = resolve::current_prices(current_table, &symbols);

    let returns = metrics::compute_returns(&symbols, &base_prices, &current_prices);
    let relative_returns = metrics::relative_returns(&returns, &config.benchmark);
    let correlations = metrics::rolling_correlations(
        &daily,
        &config.benchmark,
        &config.tickers,
        config.correlation_window,
    );

    info!(
        daily_rows = daily.len(),
        intraday_rows = intraday.as_ref().map_or(0, PriceTable::len),
        "Dashboard computed"
    );

    let is_intraday = intraday.is_some();
    DashboardOutcome::Ready(Box::new(DashboardReport {
        name: config.name.clone(),
        benchmark: config.benchmark.clone(),
        tickers: config.tickers.clone(),
        correlation_window: config.correlation_window,
        base_prices,
        current_prices,
        returns,
        relative_returns,
        correlations,
        chart: intraday.unwrap_or(daily),
        intraday: is_intraday,
        fetched_at,
    }))
}
