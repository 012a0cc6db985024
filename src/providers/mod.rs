pub mod caching;
pub mod coingecko;
pub mod util;
pub mod yahoo_finance;
