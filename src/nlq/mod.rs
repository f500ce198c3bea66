//! Natural Language Querying (NLQ)
//!
//! Implements Text-to-Cypher translation with two strategies:
//! - a deterministic pattern matcher backed by parameterized query templates
//! - an LLM generator grounded on the graph schema
//!
//! Every candidate passes the static [`validator::CypherValidator`] before it is
//! handed back to the caller. The [`coordinator::HybridCoordinator`] picks the
//! strategy, performs at most one fallback hop, caches validated queries and
//! records per-request metrics.

pub mod cache;
pub mod client;
pub mod coordinator;
pub mod executor;
pub mod intent;
pub mod interpreter;
pub mod metrics;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod strategy;
pub mod templates;
pub mod types;
pub mod validator;

use std::time::Duration;
use thiserror::Error;

pub use coordinator::{ComplexityMetrics, HybridCoordinator};
pub use executor::{execute_validated, QueryExecutor, Row};
pub use types::{GeneratedQuery, Parameters, QueryCandidate, QueryMode, Strategy};
pub use validator::{CypherValidator, ValidationErrorKind, ValidationOutcome};

/// Failures reported by the LLM backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network or connection failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The call did not finish within the per-call timeout
    #[error("Request timed out after {0:?}")]
    TimeoutError(Duration),

    /// HTTP 429
    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    /// HTTP 401/403 or missing credential
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// HTTP 5xx
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Empty completion, undecodable body or any other client error
    #[error("Invalid response: {0}")]
    ResponseError(String),
}

impl BackendError {
    /// Transient failures are worth another attempt; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionError(_)
                | BackendError::TimeoutError(_)
                | BackendError::RateLimitError(_)
                | BackendError::ServerError { .. }
        )
    }
}

/// The response interpreter could not recover a query from the completion text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty response")]
    EmptyResponse,

    #[error("Model declined to produce a query")]
    Refused,

    #[error("Cannot parse response: no valid Cypher found")]
    NoQueryFound,
}

/// One failed strategy attempt, kept for diagnostics
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub error: GenerationError,
}

/// Errors raised while producing a query
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Question cannot be empty")]
    EmptyQuestion,

    #[error("Unknown intent, cannot generate query from patterns")]
    UnknownIntent,

    #[error("No query template for intent: {0}")]
    NoTemplate(String),

    #[error("Generative strategy unavailable: {0}")]
    Unavailable(String),

    #[error("LLM backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Response parse error: {0}")]
    Parse(#[from] ParseError),

    /// A candidate was produced but rejected by the validator. The candidate is
    /// diagnostic metadata only and must never be executed.
    #[error("{strategy} query failed validation: {}", .outcome.error_message)]
    Invalid {
        strategy: Strategy,
        candidate: Box<QueryCandidate>,
        outcome: ValidationOutcome,
    },

    /// Every available strategy, including the fallback hop, failed
    #[error("Query generation failed: {}", describe_attempts(.attempts))]
    Exhausted { attempts: Vec<StrategyFailure> },
}

pub type GenerationResult<T> = Result<T, GenerationError>;

fn describe_attempts(attempts: &[StrategyFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_backend_errors() {
        assert!(BackendError::ConnectionError("reset".into()).is_retryable());
        assert!(BackendError::TimeoutError(Duration::from_secs(1)).is_retryable());
        assert!(BackendError::RateLimitError("slow down".into()).is_retryable());
        assert!(BackendError::ServerError { status: 503 }.is_retryable());

        assert!(!BackendError::AuthenticationError("bad key".into()).is_retryable());
        assert!(!BackendError::ResponseError("HTTP 400".into()).is_retryable());
    }

    #[test]
    fn test_exhausted_message_lists_attempts() {
        let err = GenerationError::Exhausted {
            attempts: vec![
                StrategyFailure { strategy: Strategy::Pattern, error: GenerationError::UnknownIntent },
                StrategyFailure {
                    strategy: Strategy::Generative,
                    error: GenerationError::Backend(BackendError::ServerError { status: 502 }),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("pattern: Unknown intent"));
        assert!(msg.contains("generative: LLM backend error: Server error: HTTP 502"));
    }
}
