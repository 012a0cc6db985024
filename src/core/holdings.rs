//! Treasury holdings snapshot produced by the `refresh-holdings` job.
//!
//! The snapshot is read-only to the dashboard and replaced wholesale on
//! every refresh. Optional fields stay optional here; the defaulting rules
//! live in the accessors on [`HoldingsEntry`] so computation never guesses.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

pub const HOLDINGS_FILE_NAME: &str = "holdings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinType {
    Bitcoin,
    Ethereum,
    Solana,
}

impl CoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinType::Bitcoin => "bitcoin",
            CoinType::Ethereum => "ethereum",
            CoinType::Solana => "solana",
        }
    }
}

impl Display for CoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-ticker facts. Any field may be absent when the upstream provider had
/// nothing for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingsEntry {
    pub coin_held: Option<f64>,
    pub coin_held_updated: Option<NaiveDate>,
    pub coin_held_source: Option<String>,
    pub shares_outstanding: Option<f64>,
    pub shares_type: Option<String>,
    pub shares_updated: Option<NaiveDate>,
    pub total_debt: Option<f64>,
    pub total_cash: Option<f64>,
}

impl HoldingsEntry {
    /// Coins held, when known and positive.
    pub fn coin_held(&self) -> Option<f64> {
        self.coin_held.filter(|c| *c > 0.0)
    }

    /// Share count, when known and positive.
    pub fn shares_outstanding(&self) -> Option<f64> {
        self.shares_outstanding.filter(|s| *s > 0.0)
    }

    /// Unreported debt counts as none.
    pub fn total_debt(&self) -> f64 {
        self.total_debt.unwrap_or(0.0)
    }

    /// Unreported cash counts as none.
    pub fn total_cash(&self) -> f64 {
        self.total_cash.unwrap_or(0.0)
    }

    pub fn shares_type(&self) -> &str {
        self.shares_type.as_deref().unwrap_or("basic")
    }

    pub fn coin_source(&self) -> &str {
        self.coin_held_source.as_deref().unwrap_or("")
    }

    fn validate(&self, symbol: &str) -> Result<()> {
        for (name, value) in [
            ("coin_held", self.coin_held),
            ("shares_outstanding", self.shares_outstanding),
            ("total_debt", self.total_debt),
            ("total_cash", self.total_cash),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(anyhow!(
                        "Invalid holdings for {symbol}: {name} must be a non-negative number, got {v}"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Holdings for all tracked companies of one coin type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinHoldings {
    pub coin_price_usd: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tickers: BTreeMap<String, HoldingsEntry>,
}

impl CoinHoldings {
    pub fn entry(&self, symbol: &str) -> Option<&HoldingsEntry> {
        self.tickers.get(symbol)
    }

    /// Snapshot coin price, when known and positive.
    pub fn coin_price(&self) -> Option<f64> {
        self.coin_price_usd.filter(|p| *p > 0.0)
    }
}

/// Whole snapshot, keyed by coin type name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingsSnapshot {
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub coins: BTreeMap<CoinType, CoinHoldings>,
}

impl HoldingsSnapshot {
    /// Loads and validates the snapshot. A missing file is an empty snapshot.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No holdings snapshot at {}", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read holdings file: {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse holdings file: {}", path.display()))?;
        snapshot
            .validate()
            .with_context(|| format!("Invalid holdings file: {}", path.display()))?;
        debug!(coins = snapshot.coins.len(), "Loaded holdings snapshot");
        Ok(snapshot)
    }

    /// Writes the snapshot through a temporary file renamed over `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(self)?;
        let mut staged = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to stage holdings file in {}", dir.display()))?;
        staged
            .write_all(json.as_bytes())
            .and_then(|_| staged.as_file().sync_all())
            .with_context(|| format!("Failed to write holdings file: {}", path.display()))?;
        staged
            .persist(path)
            .with_context(|| format!("Failed to replace holdings file: {}", path.display()))?;
        Ok(())
    }

    pub fn coin(&self, coin: CoinType) -> Option<&CoinHoldings> {
        self.coins.get(&coin)
    }

    pub fn validate(&self) -> Result<()> {
        for (coin, holdings) in &self.coins {
            if let Some(price) = holdings.coin_price_usd {
                if !price.is_finite() || price < 0.0 {
                    return Err(anyhow!("Invalid {coin} price: {price}"));
                }
            }
            for (symbol, entry) in &holdings.tickers {
                entry.validate(symbol)?;
            }
        }
        Ok(())
    }
}
