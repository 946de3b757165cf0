use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("insufficient history: need {needed} candles, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Advisory error: {0}")]
    Advisory(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("Clock unavailable: {0}")]
    ClockUnavailable(String),

    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid candle series: {0}")]
    InvalidSeries(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
