//! Error types shared across droidclaw crates.

/// Errors raised while decoding an inbound wire message.
///
/// Decode errors never produce a response: a message that cannot be decoded
/// has no trustworthy correlation id to answer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("`{kind}` message is missing its requestId")]
    MissingRequestId { kind: String },
}

/// Errors raised while loading or validating agent configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path} is {size} bytes, larger than the {max} byte limit")]
    TooLarge { path: String, size: u64, max: u64 },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
