use crate::core::holdings::CoinType;
use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_CORRELATION_WINDOW: usize = 60;
pub const MAX_CORRELATION_WINDOW: usize = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: i64 = 300;

fn default_correlation_window() -> usize {
    DEFAULT_CORRELATION_WINDOW
}

/// Manual corrections and lookup keys for one ticker's treasury data.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct TickerHoldingsConfig {
    pub coingecko_symbol: Option<String>,
    pub convertible_debt: Option<f64>,
    pub shares_override: Option<f64>,
    pub shares_type_override: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DashboardConfig {
    pub name: String,
    pub benchmark: String,
    pub tickers: Vec<String>,
    pub ytd_base_date: NaiveDate,
    #[serde(default = "default_correlation_window")]
    pub correlation_window: usize,
    pub coin_type: Option<CoinType>,
    #[serde(default)]
    pub holdings: BTreeMap<String, TickerHoldingsConfig>,
}

impl DashboardConfig {
    /// Benchmark followed by tickers, deduplicated, first occurrence wins.
    pub fn all_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::with_capacity(self.tickers.len() + 1);
        for symbol in std::iter::once(&self.benchmark).chain(self.tickers.iter()) {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        symbols
    }

    /// Start of the daily fetch: far enough before the base date to fill the
    /// correlation window, at roughly 1.5 calendar days per trading day plus
    /// a 10-day holiday buffer.
    pub fn data_start_date(&self) -> NaiveDate {
        let calendar_days = ((self.correlation_window as f64 * 1.5) as i64).saturating_add(10);
        Duration::try_days(calendar_days)
            .and_then(|span| self.ytd_base_date.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Convertible-debt figures configured per ticker.
    pub fn convertible_debt(&self) -> BTreeMap<String, f64> {
        self.holdings
            .iter()
            .filter_map(|(symbol, h)| h.convertible_debt.map(|d| (symbol.clone(), d)))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("Dashboard name must not be empty"));
        }
        if self.benchmark.trim().is_empty() {
            return Err(anyhow!("Dashboard '{}' has no benchmark", self.name));
        }
        if self.tickers.is_empty() {
            return Err(anyhow!("Dashboard '{}' has no tickers", self.name));
        }
        if !(2..=MAX_CORRELATION_WINDOW).contains(&self.correlation_window) {
            return Err(anyhow!(
                "Dashboard '{}': correlation_window must be between 2 and {}, got {}",
                self.name,
                MAX_CORRELATION_WINDOW,
                self.correlation_window
            ));
        }
        for (symbol, h) in &self.holdings {
            for (field, value) in [
                ("convertible_debt", h.convertible_debt),
                ("shares_override", h.shares_override),
            ] {
                if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                    return Err(anyhow!(
                        "Dashboard '{}': {field} for {symbol} must be non-negative",
                        self.name
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoinGeckoProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
    pub coingecko: Option<CoinGeckoProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
            coingecko: Some(CoinGeckoProviderConfig {
                base_url: "https://api.coingecko.com/api/v3".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub dashboards: Vec<DashboardConfig>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub data_path: Option<String>,
    pub cache_ttl_secs: Option<i64>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "datdash", "datdash")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "datdash", "datdash")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dashboards.is_empty() {
            return Err(anyhow!("No dashboards configured"));
        }
        for dashboard in &self.dashboards {
            dashboard.validate()?;
        }
        if self.cache_ttl_secs.is_some_and(|ttl| ttl < 0) {
            return Err(anyhow!("cache_ttl_secs must not be negative"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::seconds(self.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS))
    }

    /// Dashboard by name, or the first one when no name is given.
    pub fn dashboard(&self, name: Option<&str>) -> Result<&DashboardConfig> {
        match name {
            Some(name) => self
                .dashboards
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| anyhow!("No dashboard named '{}'", name)),
            None => self
                .dashboards
                .first()
                .ok_or_else(|| anyhow!("No dashboards configured")),
        }
    }

    /// Every symbol across all dashboards, first occurrence wins.
    pub fn all_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for symbol in self.dashboards.iter().flat_map(|d| d.all_symbols()) {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        symbols
    }

    pub fn yahoo_base_url(&self) -> &str {
        self.providers
            .yahoo
            .as_ref()
            .map_or("https://query1.finance.yahoo.com", |p| &p.base_url)
    }

    pub fn coingecko_base_url(&self) -> &str {
        self.providers
            .coingecko
            .as_ref()
            .map_or("https://api.coingecko.com/api/v3", |p| &p.base_url)
    }
}
