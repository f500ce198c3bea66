//! Hand-off point to whatever runs the Cypher
//!
//! The coordinator never executes anything. Callers that own a graph
//! connection implement [`QueryExecutor`] and go through
//! [`execute_validated`], which refuses anything that did not pass
//! validation.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{GeneratedQuery, Parameters};

/// One result row, columns in RETURN order
pub type Row = IndexMap<String, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Refusing to execute unvalidated query: {0}")]
    Rejected(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str, parameters: &Parameters) -> ExecutorResult<Vec<Row>>;
}

/// Run a generated query, but only if its validation outcome is valid
pub async fn execute_validated(
    executor: &dyn QueryExecutor,
    generated: &GeneratedQuery,
) -> ExecutorResult<Vec<Row>> {
    if !generated.validation.is_valid {
        warn!("Blocked execution of invalid query {}", generated.request_id);
        return Err(ExecutorError::Rejected(generated.validation.error_message.clone()));
    }

    let rows = executor
        .execute(&generated.candidate.query, &generated.candidate.parameters)
        .await?;
    debug!("Query {} returned {} rows", generated.request_id, rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlq::types::{QueryCandidate, QueryMode, Strategy};
    use crate::nlq::validator::{ValidationErrorKind, ValidationOutcome};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<(String, Parameters)>>,
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn execute(&self, query: &str, parameters: &Parameters) -> ExecutorResult<Vec<Row>> {
            self.seen.lock().unwrap().push((query.to_string(), parameters.clone()));
            let mut row = Row::new();
            row.insert("p.name".to_string(), json!("Two Sum"));
            row.insert("p.rating".to_string(), json!(800));
            Ok(vec![row])
        }
    }

    fn generated(validation: ValidationOutcome) -> GeneratedQuery {
        let mut params = Parameters::new();
        params.insert("problem".to_string(), json!("Two Sum"));
        GeneratedQuery {
            request_id: "req-1".to_string(),
            candidate: QueryCandidate::new(
                "MATCH (p:Problem {name: $problem}) RETURN p.name, p.rating",
                params,
                Strategy::Pattern,
            ),
            validation,
            mode: QueryMode::Pattern,
            fallback_used: false,
            from_cache: false,
        }
    }

    #[tokio::test]
    async fn test_executes_valid_query() {
        let executor = RecordingExecutor::default();
        let rows = execute_validated(&executor, &generated(ValidationOutcome::valid(Vec::new(), 2)))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let columns: Vec<&str> = rows[0].keys().map(|k| k.as_str()).collect();
        assert_eq!(columns, vec!["p.name", "p.rating"]);

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen[0].1.get("problem"), Some(&json!("Two Sum")));
    }

    #[tokio::test]
    async fn test_rejects_invalid_query() {
        let executor = RecordingExecutor::default();
        let outcome = ValidationOutcome::invalid(ValidationErrorKind::Security, "Dangerous operation detected: DELETE");

        let err = execute_validated(&executor, &generated(outcome)).await.unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Rejected("Dangerous operation detected: DELETE".to_string())
        );
        assert!(executor.seen.lock().unwrap().is_empty());
    }
}
