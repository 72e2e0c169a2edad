//! Error types for the broker link.

/// Reasons an inbound payload is rejected.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not a JSON object carrying string identifiers.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A required identifier is present but empty.
    #[error("payload field `{0}` is empty")]
    EmptyIdentifier(&'static str),
}

/// Invalid broker settings, detected before connecting.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("broker host must not be empty")]
    EmptyHost,

    #[error("subscription topic must not be empty")]
    EmptyTopic,

    #[error("reconnect interval must be at least one second")]
    ZeroReconnectInterval,
}
