//! Query generation strategies
//!
//! Both paths implement [`QueryStrategy`] so the coordinator can treat them
//! uniformly and tests can substitute either one.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::client::GenerativeClient;
use super::intent::IntentResolver;
use super::interpreter::ResponseInterpreter;
use super::prompt::build_user_prompt;
use super::schema::SchemaContextBuilder;
use super::templates::TemplateStore;
use super::types::{QueryCandidate, Strategy};
use super::{GenerationError, GenerationResult};

/// Confidence attached to template-backed candidates
pub const PATTERN_CONFIDENCE: f32 = 0.9;

#[async_trait]
pub trait QueryStrategy: Send + Sync {
    fn kind(&self) -> Strategy;

    /// Produce an unvalidated candidate for the question
    async fn generate(&self, question: &str) -> GenerationResult<QueryCandidate>;

    /// Drop any cached derived state (e.g. schema text)
    fn refresh(&self) {}
}

/// Regex intent resolution plus the template table
pub struct PatternStrategy {
    resolver: Arc<IntentResolver>,
    templates: TemplateStore,
}

impl PatternStrategy {
    pub fn new(resolver: Arc<IntentResolver>, templates: TemplateStore) -> Self {
        Self { resolver, templates }
    }

    pub fn builtin() -> Self {
        Self::new(Arc::new(IntentResolver::builtin()), TemplateStore::builtin())
    }

    /// Synchronous core; the trait method only wraps it
    pub fn generate_sync(&self, question: &str) -> GenerationResult<QueryCandidate> {
        let start = Instant::now();
        let parsed = self.resolver.resolve(question);
        if parsed.is_unknown() {
            return Err(GenerationError::UnknownIntent);
        }

        let (query, parameters) = self.templates.render(&parsed);
        if query.is_empty() {
            return Err(GenerationError::NoTemplate(parsed.intent));
        }

        debug!("Pattern matched intent {}", parsed.intent);
        Ok(QueryCandidate::new(query, parameters, Strategy::Pattern)
            .with_confidence(PATTERN_CONFIDENCE)
            .with_intent(Some(parsed.intent))
            .with_latency(start.elapsed()))
    }
}

#[async_trait]
impl QueryStrategy for PatternStrategy {
    fn kind(&self) -> Strategy {
        Strategy::Pattern
    }

    async fn generate(&self, question: &str) -> GenerationResult<QueryCandidate> {
        self.generate_sync(question)
    }
}

/// Schema-grounded LLM generation
pub struct GenerativeStrategy {
    client: GenerativeClient,
    schema: SchemaContextBuilder,
    interpreter: ResponseInterpreter,
}

impl GenerativeStrategy {
    pub fn new(client: GenerativeClient, schema: SchemaContextBuilder) -> Self {
        Self {
            client,
            schema,
            interpreter: ResponseInterpreter::new(),
        }
    }

    pub fn schema(&self) -> &SchemaContextBuilder {
        &self.schema
    }
}

#[async_trait]
impl QueryStrategy for GenerativeStrategy {
    fn kind(&self) -> Strategy {
        Strategy::Generative
    }

    async fn generate(&self, question: &str) -> GenerationResult<QueryCandidate> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GenerationError::EmptyQuestion);
        }

        let start = Instant::now();
        let schema_text = self.schema.schema_text().await;
        let prompt = build_user_prompt(question, &schema_text);

        let raw = self.client.generate(&prompt).await?;
        let candidate = self.interpreter.to_candidate(&raw)?.with_latency(start.elapsed());

        info!(
            "Generated Cypher with {} in {:?} (confidence {:.2})",
            self.client.model(),
            candidate.latency,
            candidate.confidence
        );
        Ok(candidate)
    }

    fn refresh(&self) {
        self.schema.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::nlq::client::{Completion, CompletionBackend, CompletionRequest, TokenUsage};
    use crate::nlq::retry::RetryPolicy;
    use crate::nlq::{BackendError, ParseError};
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedBackend {
        reply: Result<String, BackendError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            self.reply
                .clone()
                .map(|text| Completion { text, usage: TokenUsage::default() })
        }
    }

    fn generative(reply: Result<String, BackendError>) -> (GenerativeStrategy, Arc<FixedBackend>) {
        let backend = Arc::new(FixedBackend { reply, prompts: Mutex::new(Vec::new()) });
        let client = GenerativeClient::new(backend.clone(), &GenerationConfig::default())
            .with_retry(RetryPolicy::none());
        (GenerativeStrategy::new(client, SchemaContextBuilder::builtin()), backend)
    }

    #[tokio::test]
    async fn test_pattern_strategy_candidate() {
        let candidate = PatternStrategy::builtin().generate("题目'两数之和'的难度").await.unwrap();
        assert_eq!(candidate.source, Strategy::Pattern);
        assert_eq!(candidate.confidence, PATTERN_CONFIDENCE);
        assert_eq!(candidate.intent.as_deref(), Some("get_problem_difficulty"));
        assert_eq!(candidate.parameters.get("problem"), Some(&json!("两数之和")));
    }

    #[tokio::test]
    async fn test_pattern_strategy_unknown() {
        let err = PatternStrategy::builtin().generate("今天天气怎么样").await.unwrap_err();
        assert!(matches!(err, GenerationError::UnknownIntent));
    }

    #[tokio::test]
    async fn test_pattern_strategy_missing_template() {
        let strategy = PatternStrategy::new(
            Arc::new(IntentResolver::builtin()),
            TemplateStore::from_pairs(Vec::new()),
        );
        let err = strategy.generate("有哪些关于图论的题目").await.unwrap_err();
        assert!(matches!(err, GenerationError::NoTemplate(ref i) if i == "list_problems_by_tag"));
    }

    #[tokio::test]
    async fn test_generative_strategy_grounds_prompt() {
        let (strategy, backend) = generative(Ok(
            r#"{"cypher": "MATCH (t:Team) RETURN t.name LIMIT 5", "parameters": {}}"#.to_string(),
        ));

        let candidate = strategy.generate("列出所有队伍").await.unwrap();
        assert_eq!(candidate.source, Strategy::Generative);
        assert_eq!(candidate.query, "MATCH (t:Team) RETURN t.name LIMIT 5");

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("列出所有队伍"));
        assert!(prompts[0].contains("PLACED: Team -> Contest"));
        assert!(strategy.schema().is_cached());
    }

    #[tokio::test]
    async fn test_generative_strategy_errors() {
        let (strategy, _) = generative(Ok("ERROR".to_string()));
        let err = strategy.generate("?").await.unwrap_err();
        assert!(matches!(err, GenerationError::Parse(ParseError::Refused)));

        let (strategy, _) = generative(Err(BackendError::AuthenticationError("no".to_string())));
        let err = strategy.generate("?").await.unwrap_err();
        assert!(matches!(err, GenerationError::Backend(BackendError::AuthenticationError(_))));

        let (strategy, backend) = generative(Ok("unused".to_string()));
        assert!(matches!(strategy.generate("  ").await, Err(GenerationError::EmptyQuestion)));
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generative_refresh_clears_schema() {
        let (strategy, _) = generative(Ok(r#"{"cypher": "MATCH (n) RETURN n"}"#.to_string()));
        strategy.generate("anything").await.unwrap();
        assert!(strategy.schema().is_cached());
        strategy.refresh();
        assert!(!strategy.schema().is_cached());
    }
}
