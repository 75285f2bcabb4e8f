use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum VitalError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while parsing or rendering JSON payloads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The platform has no usable audio output
    #[error("Audio output unavailable: {0}")]
    AudioUnavailable(String),

    /// An escalation channel could not deliver a message
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// Escalation was requested while the aggregate severity is not Emergency
    #[error("Escalation requires Emergency severity, current severity is {0}")]
    NotEmergency(crate::classifier::Severity),

    /// HTTP transport failure talking to a remote channel
    #[cfg(feature = "twilio")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenient alias over [`Result`] using [`VitalError`]
pub type Result<T> = std::result::Result<T, VitalError>;
