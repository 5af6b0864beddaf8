//! pd-marketdata
//!
//! The market-data acquisition core: the [`MarketDataPort`] contract and
//! its production implementation, [`TieredMarketData`] — a read-through
//! tiered cache (hot key/value → durable warm store → rate-limited
//! upstream) with a trading-calendar-aware completeness oracle and
//! market-closed fallback.

pub mod oracle;
pub mod tiered;

pub use tiered::{MarketDataPort, TieredMarketData};
