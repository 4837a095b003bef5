//! Error types for lead-outreach.

use std::time::Duration;

use uuid::Uuid;

use crate::leads::model::LeadStatus;
use crate::pipeline::types::Stage;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

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
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Lead {id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        id: i64,
        from: LeadStatus,
        to: LeadStatus,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a stage processor for one lead.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{stage} failed: {reason}")]
    Failed { stage: Stage, reason: String },

    #[error("{stage} produced invalid output: {reason}")]
    InvalidOutput { stage: Stage, reason: String },

    #[error("{stage} processor panicked: {message}")]
    Panicked { stage: Stage, message: String },

    /// The processor cannot serve any lead (missing credentials, backend down).
    #[error("{stage} processor unavailable: {reason}")]
    Unavailable { stage: Stage, reason: String },
}

impl ProcessorError {
    /// Whether this error should abort the whole run rather than one lead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// The message without the stage prefix.
    pub fn reason(&self) -> String {
        match self {
            Self::Failed { reason, .. } | Self::Unavailable { reason, .. } => reason.clone(),
            Self::InvalidOutput { reason, .. } => format!("invalid output: {reason}"),
            Self::Panicked { message, .. } => format!("panicked: {message}"),
        }
    }
}

/// Channel send failures. Never propagated past the dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to send on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Invalid address for channel {channel}: {reason}")]
    InvalidAddress { channel: String, reason: String },

    #[error("No sender configured for channel {channel}")]
    NoSender { channel: String },
}

/// Run-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline already running (run {active})")]
    Conflict { active: Uuid },

    #[error("Pipeline aborted: {0}")]
    Fatal(String),

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_fatal() {
        let unavailable = ProcessorError::Unavailable {
            stage: Stage::Enrich,
            reason: "no key".into(),
        };
        let failed = ProcessorError::Failed {
            stage: Stage::Enrich,
            reason: "boom".into(),
        };
        assert!(unavailable.is_fatal());
        assert!(!failed.is_fatal());
    }

    #[test]
    fn illegal_transition_message() {
        let err = DatabaseError::IllegalTransition {
            id: 7,
            from: LeadStatus::Sent,
            to: LeadStatus::New,
        };
        assert_eq!(err.to_string(), "Lead 7: illegal status transition SENT -> NEW");
    }
}
