use super::ui;
use crate::core::cache::SystemClock;
use crate::core::config::{AppConfig, DashboardConfig};
use crate::core::dashboard::{self, DashboardOutcome, DashboardReport};
use crate::core::holdings::{HOLDINGS_FILE_NAME, HoldingsSnapshot};
use crate::core::price::PriceSource;
use crate::core::valuation::{self, ValuationRecord};
use crate::store::history::HistoryStore;
use anyhow::{Result, anyhow};
use comfy_table::{Cell, CellAlignment};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{info, warn};

/// Rows of the chart table shown under the ticker table.
const RECENT_ROWS: usize = 5;

pub async fn run(
    config: &AppConfig,
    name: Option<&str>,
    coin_price: Option<f64>,
    source: &dyn PriceSource,
    data_dir: &Path,
) -> Result<()> {
    let dashboard_config = config.dashboard(name)?;
    info!(dashboard = %dashboard_config.name, "Building dashboard");

    let history = HistoryStore::in_dir(data_dir).load().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable history store");
        None
    });

    let report = match dashboard::build_dashboard(
        dashboard_config,
        source,
        history.as_ref(),
        &SystemClock,
    )
    .await
    {
        DashboardOutcome::Ready(report) => report,
        DashboardOutcome::NoData => {
            println!(
                "{}",
                ui::style_text(
                    "Failed to fetch market data. Please try again later.",
                    ui::StyleType::Error
                )
            );
            return Err(anyhow!(
                "No market data for dashboard '{}'",
                dashboard_config.name
            ));
        }
    };

    println!("{}", render_report(&report));

    let valuations = load_valuations(dashboard_config, &report, coin_price, data_dir);
    if !valuations.is_empty() {
        ui::print_separator();
        println!("{}", render_valuations(&valuations, coin_price.is_some()));
    }
    Ok(())
}

/// mNAV rows for the dashboard's coin, empty when it has no holdings
/// snapshot.
fn load_valuations(
    dashboard_config: &DashboardConfig,
    report: &DashboardReport,
    coin_price: Option<f64>,
    data_dir: &Path,
) -> Vec<ValuationRecord> {
    let Some(coin) = dashboard_config.coin_type else {
        return Vec::new();
    };
    let snapshot = match HoldingsSnapshot::load(data_dir.join(HOLDINGS_FILE_NAME)) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable holdings snapshot");
            return Vec::new();
        }
    };
    let Some(holdings) = snapshot.coin(coin) else {
        info!(%coin, "No holdings snapshot for coin");
        return Vec::new();
    };

    valuation::compute_valuation(
        holdings,
        &report.tickers,
        &report.current_prices,
        &dashboard_config.convertible_debt(),
        coin_price,
    )
}

/// Benchmark header, ticker table sorted by relative return and the most
/// recent chart rows.
pub fn render_report(report: &DashboardReport) -> String {
    let benchmark = &report.benchmark;
    let bench = report.return_for(benchmark);
    let fmt = |v: Option<f64>, f: fn(f64) -> String| v.map_or("N/A".to_string(), f);

    let mut output = format!(
        "Dashboard: {}\n\n",
        ui::style_text(&report.name, ui::StyleType::Title)
    );
    output.push_str(&format!(
        "Benchmark {}  YTD Start: {}  Current: {}  YTD Return: {}\n\n",
        ui::style_text(benchmark, ui::StyleType::Label),
        fmt(bench.and_then(|r| r.base_price), ui::format_price),
        fmt(bench.and_then(|r| r.current_price), ui::format_price),
        ui::style_text(
            &fmt(bench.and_then(|r| r.ytd_return), ui::format_pct),
            ui::StyleType::Value
        ),
    ));

    let mut tickers: Vec<&String> = report.tickers.iter().collect();
    // Best relative return first, missing last.
    tickers.sort_by(|a, b| match (report.relative_for(a), report.relative_for(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ticker"),
        ui::header_cell("YTD Start Price"),
        ui::header_cell("Current Price"),
        ui::header_cell("YTD Return"),
        ui::header_cell("Relative Return"),
        ui::header_cell(&format!(
            "{}d Corr w/ {}",
            report.correlation_window, benchmark
        )),
    ]);
    for ticker in tickers {
        let record = report.return_for(ticker);
        table.add_row(vec![
            Cell::new(ticker),
            ui::format_optional_cell(record.and_then(|r| r.base_price), ui::format_price),
            ui::format_optional_cell(record.and_then(|r| r.current_price), ui::format_price),
            ui::change_cell(record.and_then(|r| r.ytd_return), false),
            ui::change_cell(report.relative_for(ticker), true),
            ui::correlation_cell(report.correlation_for(ticker)),
        ]);
    }
    output.push_str(&table.to_string());

    output.push_str(&format!(
        "\n\n{}\n",
        ui::style_text(
            if report.intraday {
                "Recent prices (hourly)"
            } else {
                "Recent prices (daily)"
            },
            ui::StyleType::Label
        )
    ));
    output.push_str(&render_recent_prices(report).to_string());

    output.push_str(&format!(
        "\n\n{}",
        ui::style_text(
            &format!("Last updated: {}", report.fetched_at.format("%Y-%m-%d %H:%M:%S")),
            ui::StyleType::Subtle
        )
    ));
    output
}

fn render_recent_prices(report: &DashboardReport) -> comfy_table::Table {
    let chart = &report.chart;
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("Time")];
    header.extend(chart.symbols().iter().map(|s| ui::header_cell(s)));
    table.set_header(header);

    let recent: Vec<_> = chart.rows().rev().take(RECENT_ROWS).collect();
    for (timestamp, values) in recent.into_iter().rev() {
        let mut row = vec![Cell::new(timestamp.format("%Y-%m-%d %H:%M").to_string())];
        row.extend(
            values
                .iter()
                .map(|v| ui::format_optional_cell(*v, |p| format!("{p:.2}"))),
        );
        table.add_row(row);
    }
    table
}

pub fn render_valuations(records: &[ValuationRecord], scenario: bool) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ticker"),
        ui::header_cell("mNAV"),
        ui::header_cell("Market Cap"),
        ui::header_cell("Coin Value"),
        ui::header_cell("Cash"),
        ui::header_cell("Non-Conv. Debt"),
        ui::header_cell("Adjusted NAV"),
        ui::header_cell("Coin Held"),
        ui::header_cell("Shares"),
        ui::header_cell("Updated"),
    ]);

    let mut sorted: Vec<&ValuationRecord> = records.iter().collect();
    sorted.sort_by(|a, b| match (a.mnav, b.mnav) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    for r in sorted {
        let right = |text: String| Cell::new(text).set_alignment(CellAlignment::Right);
        table.add_row(vec![
            Cell::new(&r.symbol),
            ui::format_optional_cell(r.mnav, |m| format!("{m:.2}x")),
            right(ui::format_usd_compact(r.market_cap)),
            right(ui::format_usd_compact(r.coin_value)),
            right(ui::format_usd_compact(r.cash)),
            right(ui::format_usd_compact(r.non_convertible_debt)),
            right(ui::format_usd_compact(r.adjusted_nav)),
            right(format!("{:.0} ({})", r.coin_held, r.coin_source)),
            right(format!("{:.0} ({})", r.shares_outstanding, r.shares_type)),
            ui::format_optional_cell(r.holdings_updated, |d| d.to_string()),
        ]);
    }

    let coin_price = records
        .first()
        .map_or("N/A".to_string(), |r| ui::format_price(r.coin_price));
    let label = if scenario {
        "Coin price (scenario)"
    } else {
        "Coin price"
    };
    format!(
        "{}\n{}: {}\n\n{}",
        ui::style_text("mNAV", ui::StyleType::Title),
        ui::style_text(label, ui::StyleType::Label),
        coin_price,
        table
    )
}
