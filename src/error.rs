//! Error types for jobtrail.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Whether this error is a storage-level uniqueness violation.
    ///
    /// The idempotency guard treats a racing duplicate insert the same as a
    /// lookup hit via this check.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

/// Mail-content fetch errors (upstream mail provider).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Upstream request failed: {0}")]
    Request(String),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed upstream payload: {0}")]
    Malformed(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Classification timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Notification delivery errors. Always treated as best-effort by callers.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("No live subscriber for account {account_id}")]
    NoSubscriber { account_id: String },

    #[error("Delivery channel failed: {0}")]
    Channel(String),
}

/// Pipeline-level errors.
///
/// Only `Fetch` maps to a non-200 webhook response short of an internal
/// fault; classification failures are absorbed into the ignore path before
/// they ever reach the handler.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mail fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classification failed: {0}")]
    Classification(#[from] LlmError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
