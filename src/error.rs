use thiserror::Error;

/// Error types for keyword scoring
#[derive(Error, Debug)]
pub enum ScorerError {
    // Validation errors, fatal before any provider call
    #[error("Input table is missing required column: {column}")]
    MissingColumn { column: String },

    #[error("Input table contains no rows")]
    EmptyTable,

    #[error("Business context field is required: {field}")]
    MissingContextField { field: &'static str },

    #[error("Invalid API credential: {reason}")]
    InvalidCredential { reason: String },

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Provider errors, recovered per batch
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Provider returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Provider rejected credentials (HTTP {status})")]
    Authentication { status: u16 },

    #[error("Provider rate limit exceeded")]
    RateLimited,

    #[error("Provider call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Provider returned an empty completion")]
    EmptyResponse,

    // Data errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Row {row} has {found} fields, header has {expected}")]
    MalformedRow { row: usize, expected: usize, found: usize },

    #[error("Score count {actual} does not match row count {expected}")]
    ScoreLengthMismatch { expected: usize, actual: usize },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ScorerError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Map a non-success HTTP status from the provider
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Authentication { status },
            429 => Self::RateLimited,
            _ => Self::HttpStatus { status, body: body.into() },
        }
    }

    /// Check if a provider call is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingColumn { .. }
            | Self::EmptyTable
            | Self::MissingContextField { .. }
            | Self::InvalidCredential { .. }
            | Self::InvalidBatchSize
            | Self::MalformedRow { .. }
            | Self::Configuration { .. } => "validation",
            Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::Authentication { .. }
            | Self::RateLimited
            | Self::Timeout { .. }
            | Self::EmptyResponse => "provider",
            Self::Csv(_)
            | Self::Io(_)
            | Self::ScoreLengthMismatch { .. } => "data",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get suggested retry delay for recoverable errors
    pub fn retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited => Some(std::time::Duration::from_secs(20)),
            _ if self.is_recoverable() => Some(std::time::Duration::from_secs(2)),
            _ => None,
        }
    }
}

impl ScorerError {
    /// Map a transport error; `deadline` is the per-call timeout it ran under
    pub fn from_reqwest(err: reqwest::Error, deadline: std::time::Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout { seconds: deadline.as_secs() };
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        Self::network(err.to_string())
    }
}

/// Result type alias for keyword scoring
pub type ScorerResult<T> = std::result::Result<T, ScorerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors() {
        let error = ScorerError::MissingColumn { column: "keywords".to_string() };
        assert_eq!(error.category(), "validation");
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("keywords"));
    }

    #[test]
    fn test_recoverable_errors() {
        let network_error = ScorerError::network("connection reset");
        assert!(network_error.is_recoverable());
        assert!(network_error.retry_delay().is_some());

        let server_error = ScorerError::from_status(503, "unavailable");
        assert!(server_error.is_recoverable());

        let client_error = ScorerError::from_status(400, "bad request");
        assert!(!client_error.is_recoverable());
        assert!(client_error.retry_delay().is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ScorerError::from_status(401, ""),
            ScorerError::Authentication { status: 401 }
        ));
        assert!(matches!(ScorerError::from_status(429, ""), ScorerError::RateLimited));
        assert_eq!(ScorerError::from_status(500, "oops").category(), "provider");
    }
}
