//! Shared NLQ data types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::validator::ValidationOutcome;

/// Query parameters, keyed by placeholder name (without the `$`)
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// How the coordinator resolves a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Pattern matcher first
    Pattern,
    /// LLM generator first
    Generative,
    /// Pick per question from its complexity
    Hybrid,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Pattern => "pattern",
            QueryMode::Generative => "generative",
            QueryMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pattern" | "rule" => Ok(QueryMode::Pattern),
            "generative" | "llm" => Ok(QueryMode::Generative),
            "hybrid" => Ok(QueryMode::Hybrid),
            other => Err(format!("unknown query mode: {}", other)),
        }
    }
}

/// Which generator produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Pattern,
    Generative,
}

impl Strategy {
    /// The alternate strategy used for the fallback hop
    pub fn other(self) -> Self {
        match self {
            Strategy::Pattern => Strategy::Generative,
            Strategy::Generative => Strategy::Pattern,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Pattern => "pattern",
            Strategy::Generative => "generative",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated, not yet validated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCandidate {
    /// Cypher text with `$placeholders`
    pub query: String,
    /// Values bound to the placeholders at execution time
    pub parameters: Parameters,
    /// Producing strategy
    pub source: Strategy,
    /// Fixed prior for the producing path, not a measured probability
    pub confidence: f32,
    /// Wall-clock time spent producing the candidate
    pub latency: Duration,
    /// Recognised intent, when the producer reports one
    pub intent: Option<String>,
}

impl QueryCandidate {
    pub fn new(query: impl Into<String>, parameters: Parameters, source: Strategy) -> Self {
        Self {
            query: query.into(),
            parameters,
            source,
            confidence: 0.0,
            latency: Duration::ZERO,
            intent: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// A validated query handed to the caller, who owns execution
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuery {
    pub request_id: String,
    pub candidate: QueryCandidate,
    pub validation: ValidationOutcome,
    /// Resolution mode the request ran under (part of the cache key)
    pub mode: QueryMode,
    /// Produced by the alternate strategy after the primary failed
    pub fallback_used: bool,
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_mode_parsing() {
        assert_eq!("pattern".parse::<QueryMode>().unwrap(), QueryMode::Pattern);
        assert_eq!("RULE".parse::<QueryMode>().unwrap(), QueryMode::Pattern);
        assert_eq!("llm".parse::<QueryMode>().unwrap(), QueryMode::Generative);
        assert_eq!(" Hybrid ".parse::<QueryMode>().unwrap(), QueryMode::Hybrid);
        assert!("auto".parse::<QueryMode>().is_err());
    }

    #[test]
    fn test_strategy_other() {
        assert_eq!(Strategy::Pattern.other(), Strategy::Generative);
        assert_eq!(Strategy::Generative.other(), Strategy::Pattern);
    }

    #[test]
    fn test_candidate_serializes_lowercase_source() {
        let candidate = QueryCandidate::new("MATCH (n) RETURN n", Parameters::new(), Strategy::Generative)
            .with_confidence(0.8);
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["source"], "generative");
        assert_eq!(json["query"], "MATCH (n) RETURN n");
    }
}
