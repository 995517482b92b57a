use thiserror::Error;

/// Errors surfaced by the trade lifecycle core.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("Trade not found: {0}")]
    TradeNotFound(u64),

    #[error("Context not found: {0}")]
    ContextNotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Instrument not tradeable: {0}")]
    NotTradeable(String),

    #[error("Trader is inactive")]
    Inactive,

    #[error("Max concurrent trades reached for context {context}: {max}")]
    MaxTradesReached { context: String, max: u32 },

    #[error("Option rejected: {0}")]
    OptionRejected(String),

    #[error("Signal rejected by region gate")]
    RegionRejected,

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Broker submission failures. Explicit kinds so the tick loop can apply
/// retry-or-error policy deterministically.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Insufficient margin: need {needed}, have {available}")]
    InsufficientMargin { needed: f64, available: f64 },

    #[error("Insufficient asset {symbol}: need {needed}, have {available}")]
    InsufficientAsset {
        symbol: String,
        needed: f64,
        available: f64,
    },

    #[error("Market closed: {0}")]
    MarketClosed(String),

    #[error("Order rejected: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// Rejections are terminal for the trade; everything else keeps the
    /// trade in its prior state for retry on the next tick.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BrokerError::Rejected(_))
    }
}

/// Persistence gateway errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TradeError>;
