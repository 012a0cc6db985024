//! Domain types and the dashboard pipeline

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod holdings;
pub mod log;
pub mod merge;
pub mod metrics;
pub mod price;
pub mod resolve;
pub mod series;
pub mod treasury;
pub mod valuation;

// Re-export main types for cleaner imports
pub use price::{FetchKey, FetchRange, Granularity, PriceSource};
pub use series::{Observation, PriceTable};
pub use treasury::{FundamentalsProvider, TreasuryProvider};
