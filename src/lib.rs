//! Spectre: a per-instrument trade lifecycle engine.
//!
//! Each market gets one `StrategyTrader` owning its live trades end to end:
//! admission through regions and contexts, the per-tick stop-loss /
//! take-profit / timeout policy, asynchronous broker reconciliation, and
//! snapshot persistence. `TradingEngine` fans the tick out across markets.

pub mod config;
pub mod error;
pub mod services;
pub mod types;

pub use config::Config;
pub use error::{BrokerError, Result, StoreError, TradeError};
