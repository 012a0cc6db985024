pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

pub use crate::core::config;

use crate::core::config::AppConfig;
use crate::core::holdings::HOLDINGS_FILE_NAME;
use crate::core::price::FetchKey;
use crate::core::series::PriceTable;
use crate::providers::caching::CachingPriceSource;
use crate::providers::coingecko::CoinGeckoProvider;
use crate::providers::yahoo_finance::{YahooFundamentalsProvider, YahooPriceSource};
use crate::store::history::HistoryStore;
use crate::store::memory::MemoryCache;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Dashboard {
        name: Option<String>,
        coin_price: Option<f64>,
    },
    List,
    RefreshPrices,
    RefreshHoldings,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("datdash starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let data_dir = config.data_dir()?;
    let price_cache = Arc::new(MemoryCache::<FetchKey, PriceTable>::new());
    let price_source = CachingPriceSource::new(
        YahooPriceSource::new(config.yahoo_base_url()),
        price_cache,
        config.cache_ttl(),
    );

    match command {
        AppCommand::Dashboard { name, coin_price } => {
            cli::dashboard::run(
                &config,
                name.as_deref(),
                coin_price,
                &price_source,
                &data_dir,
            )
            .await
        }
        AppCommand::List => {
            cli::list::run(&config);
            Ok(())
        }
        AppCommand::RefreshPrices => {
            let store = HistoryStore::in_dir(&data_dir);
            cli::refresh::refresh_prices(&config, &price_source, &store).await
        }
        AppCommand::RefreshHoldings => {
            let treasury = CoinGeckoProvider::new(config.coingecko_base_url());
            let fundamentals = YahooFundamentalsProvider::new(config.yahoo_base_url());
            cli::refresh::refresh_holdings(
                &config,
                &treasury,
                &fundamentals,
                &data_dir.join(HOLDINGS_FILE_NAME),
            )
            .await
        }
    }
}
