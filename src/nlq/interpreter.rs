//! Completion text → query candidate
//!
//! Parsing is an ordered table of tiers. Each tier either recovers a query,
//! misses (the next tier is tried), or reports that the model refused.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use super::types::{Parameters, QueryCandidate, Strategy};
use super::validator::CypherValidator;
use super::ParseError;

/// Which tier recovered the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    /// The whole response is a JSON object
    StructuredJson,
    /// A JSON object inside a fence or embedded in prose
    EmbeddedJson,
    /// A query-shaped code block plus key/value hints
    CodeBlock,
    /// A bare clause lifted out of free text
    ClauseExtraction,
}

impl ParseTier {
    /// Fixed prior attached to candidates from this tier
    pub fn base_confidence(&self) -> f32 {
        match self {
            ParseTier::StructuredJson => 0.8,
            ParseTier::EmbeddedJson => 0.6,
            ParseTier::CodeBlock => 0.6,
            ParseTier::ClauseExtraction => 0.4,
        }
    }
}

/// What a tier recovered
#[derive(Debug, Clone, PartialEq)]
pub struct Interpreted {
    pub query: String,
    pub parameters: Parameters,
    pub intent: Option<String>,
    pub confidence: f32,
}

enum TierOutcome {
    Parsed(Interpreted),
    Miss,
    Refused,
}

type Tier = fn(&str) -> TierOutcome;

const TIERS: &[(ParseTier, Tier)] = &[
    (ParseTier::StructuredJson, parse_structured),
    (ParseTier::EmbeddedJson, parse_embedded_json),
    (ParseTier::CodeBlock, parse_code_block),
    (ParseTier::ClauseExtraction, parse_clause),
];

/// Confidence of a code block without any recovered parameter value
const BARE_CODE_BLOCK_CONFIDENCE: f32 = 0.5;

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z]*)[ \t]*\r?\n?(.*?)```").unwrap());

static QUERY_SHAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:MATCH|RETURN)\b").unwrap());

// Anchored on an uppercase MATCH so prose words never start a query. The
// capture ends at a blank line or a `Parameters:` line.
static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\b((?:OPTIONAL\s+MATCH|MATCH)\b.*?)(?:\n\s*\n|\n\s*(?i:param(?:eter)?s?)\s*[:：]|$)",
    )
    .unwrap()
});

static RETURN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bRETURN\b").unwrap());

static PARAMS_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)param(?:eter)?s?\s*[:：]?\s*(\{[^{}]*\})").unwrap());

/// Stateless cascade over the parse tiers
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseInterpreter;

impl ResponseInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Run the cascade and report which tier succeeded
    pub fn interpret(&self, response: &str) -> Result<(ParseTier, Interpreted), ParseError> {
        let text = response.trim();
        if text.is_empty() {
            return Err(ParseError::EmptyResponse);
        }
        if is_refusal(text) {
            return Err(ParseError::Refused);
        }

        for (tier, parse) in TIERS {
            match parse(text) {
                TierOutcome::Parsed(interpreted) => {
                    debug!("Parsed LLM response with {:?} tier", tier);
                    return Ok((*tier, interpreted));
                }
                TierOutcome::Refused => return Err(ParseError::Refused),
                TierOutcome::Miss => continue,
            }
        }

        Err(ParseError::NoQueryFound)
    }

    /// Interpret a response into a generative candidate
    pub fn to_candidate(&self, response: &str) -> Result<QueryCandidate, ParseError> {
        let (_, interpreted) = self.interpret(response)?;
        Ok(QueryCandidate::new(interpreted.query, interpreted.parameters, Strategy::Generative)
            .with_confidence(interpreted.confidence)
            .with_intent(interpreted.intent))
    }
}

fn is_refusal(text: &str) -> bool {
    let t = text.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '.' || c == '`');
    t.eq_ignore_ascii_case("ERROR")
}

fn clean_query(raw: &str) -> String {
    raw.trim()
        .trim_end_matches("```")
        .trim_end()
        .trim_end_matches(';')
        .trim()
        .to_string()
}

fn json_to_parameters(value: Option<&Value>) -> Parameters {
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Parameters::new(),
    }
}

/// Shared extraction from a decoded object. `None` confidence means the
/// tier's fixed prior applies.
fn from_object(obj: &Map<String, Value>, confidence: Option<f32>, default_confidence: f32) -> TierOutcome {
    let query = obj
        .get("query")
        .or_else(|| obj.get("cypher"))
        .and_then(|v| v.as_str())
        .map(clean_query)
        .filter(|q| !q.is_empty());

    let query = match query {
        Some(q) => q,
        None if obj.contains_key("error") => return TierOutcome::Refused,
        None => return TierOutcome::Miss,
    };

    let parameters = json_to_parameters(obj.get("parameters").or_else(|| obj.get("params")));
    let intent = obj
        .get("intent")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    TierOutcome::Parsed(Interpreted {
        query,
        parameters,
        intent,
        confidence: confidence.unwrap_or(default_confidence),
    })
}

fn parse_structured(text: &str) -> TierOutcome {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => {
            let confidence = obj
                .get("confidence")
                .and_then(|v| v.as_f64())
                .map(|c| c.clamp(0.0, 1.0) as f32);
            from_object(&obj, confidence, ParseTier::StructuredJson.base_confidence())
        }
        _ => TierOutcome::Miss,
    }
}

fn parse_embedded_json(text: &str) -> TierOutcome {
    let prior = ParseTier::EmbeddedJson.base_confidence();

    if let Some(caps) = FENCED_JSON_RE.captures(text) {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&caps[1]) {
            match from_object(&obj, Some(prior), prior) {
                TierOutcome::Miss => {}
                outcome => return outcome,
            }
        }
    }

    // Any balanced object in prose, decoded with a streaming reader so the
    // trailing text is ignored
    for (pos, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(obj))) = stream.next() {
            if let TierOutcome::Parsed(interpreted) = from_object(&obj, Some(prior), prior) {
                return TierOutcome::Parsed(interpreted);
            }
        }
    }

    TierOutcome::Miss
}

fn parse_code_block(text: &str) -> TierOutcome {
    for caps in CODE_BLOCK_RE.captures_iter(text) {
        let lang = caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        if !matches!(lang.as_str(), "" | "cypher" | "sql") {
            continue;
        }

        let query = clean_query(&caps[2]);
        if query.is_empty() || query.starts_with('{') || !QUERY_SHAPE_RE.is_match(&query) {
            continue;
        }

        let parameters = recover_parameters(text, &query, false);
        let confidence = if parameters.is_empty() {
            BARE_CODE_BLOCK_CONFIDENCE
        } else {
            ParseTier::CodeBlock.base_confidence()
        };

        return TierOutcome::Parsed(Interpreted {
            query,
            parameters,
            intent: None,
            confidence,
        });
    }

    TierOutcome::Miss
}

fn parse_clause(text: &str) -> TierOutcome {
    let caps = match CLAUSE_RE.captures(text) {
        Some(caps) => caps,
        None => return TierOutcome::Miss,
    };

    let query = clean_query(&caps[1]);
    if !RETURN_RE.is_match(&query) {
        return TierOutcome::Miss;
    }

    let parameters = recover_parameters(text, &query, true);
    TierOutcome::Parsed(Interpreted {
        query,
        parameters,
        intent: None,
        confidence: ParseTier::ClauseExtraction.base_confidence(),
    })
}

/// Values for the query's placeholders, taken from a `parameters: {...}`
/// object or `name: "value"` hints anywhere in the response. With
/// `fill_missing`, placeholders without a hint get an empty string.
fn recover_parameters(text: &str, query: &str, fill_missing: bool) -> Parameters {
    let declared: Parameters = PARAMS_OBJECT_RE
        .captures_iter(text)
        .filter_map(|caps| serde_json::from_str::<Value>(&caps[1]).ok())
        .find_map(|v| match v {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        })
        .unwrap_or_default();

    let mut parameters = Parameters::new();
    for name in CypherValidator::placeholders(query) {
        if let Some(value) = declared.get(&name) {
            parameters.insert(name, value.clone());
        } else if let Some(value) = find_hint(text, &name) {
            parameters.insert(name, value);
        } else if fill_missing {
            parameters.insert(name, Value::String(String::new()));
        }
    }
    parameters
}

fn find_hint(text: &str, name: &str) -> Option<Value> {
    let pattern = format!(
        r#"(?i)\$?\b{}\s*[:=：]\s*(?:["'“‘]([^"'”’]+)["'”’]|(-?\d+(?:\.\d+)?)\b)"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;

    if let Some(s) = caps.get(1) {
        return Some(Value::String(s.as_str().to_string()));
    }
    caps.get(2)
        .and_then(|n| serde_json::from_str::<Value>(n.as_str()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interpret(text: &str) -> Result<(ParseTier, Interpreted), ParseError> {
        ResponseInterpreter::new().interpret(text)
    }

    #[test]
    fn test_structured_json() {
        let (tier, parsed) = interpret(
            r#"{"cypher": "MATCH (p:Problem) WHERE p.name = $name RETURN p;", "parameters": {"name": "Two Sum"}, "intent": "lookup"}"#,
        )
        .unwrap();
        assert_eq!(tier, ParseTier::StructuredJson);
        assert_eq!(parsed.query, "MATCH (p:Problem) WHERE p.name = $name RETURN p");
        assert_eq!(parsed.parameters.get("name"), Some(&json!("Two Sum")));
        assert_eq!(parsed.intent.as_deref(), Some("lookup"));
        assert_eq!(parsed.confidence, 0.8);
    }

    #[test]
    fn test_structured_json_aliases_and_confidence() {
        let (_, parsed) =
            interpret(r#"{"query": "MATCH (n) RETURN n", "params": "oops", "confidence": 0.95}"#).unwrap();
        assert_eq!(parsed.query, "MATCH (n) RETURN n");
        assert!(parsed.parameters.is_empty());
        assert!((parsed.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"cypher\": \"MATCH (t:Tag) WHERE t.name = $tag RETURN t\", \"parameters\": {\"tag\": \"dp\"}, \"confidence\": 0.99}\n```";
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::EmbeddedJson);
        assert_eq!(parsed.parameters.get("tag"), Some(&json!("dp")));
        assert_eq!(parsed.confidence, 0.6);
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let text = r#"The query is {"cypher": "MATCH (n) WHERE n.x = $x RETURN n", "parameters": {"x": {"nested": 1}}} and that's it."#;
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::EmbeddedJson);
        assert_eq!(parsed.parameters.get("x"), Some(&json!({"nested": 1})));
    }

    #[test]
    fn test_code_block_with_hints() {
        let text = "```cypher\nMATCH (p:Problem) WHERE toLower(p.name) CONTAINS toLower($problem) RETURN p\n```\nwhere problem: \"两数之和\"";
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::CodeBlock);
        assert!(parsed.query.starts_with("MATCH (p:Problem)"));
        assert_eq!(parsed.parameters.get("problem"), Some(&json!("两数之和")));
        assert_eq!(parsed.confidence, 0.6);
    }

    #[test]
    fn test_code_block_with_params_object() {
        let text = "```\nMATCH (t:Team)-[r:PLACED]->(c:Contest) WHERE r.rank = $rank RETURN t\n```\nParameters: {\"rank\": 1}";
        let (_, parsed) = interpret(text).unwrap();
        assert_eq!(parsed.parameters.get("rank"), Some(&json!(1)));
    }

    #[test]
    fn test_code_block_without_hints() {
        let text = "```cypher\nMATCH (p) WHERE p.name = $name RETURN p\n```";
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::CodeBlock);
        assert!(parsed.parameters.is_empty());
        assert_eq!(parsed.confidence, 0.5);
    }

    #[test]
    fn test_clause_extraction() {
        let text = "Sure! MATCH (p:Problem) WHERE p.rating > $min RETURN p.name\n\nThe value min: 1500 filters easy problems.";
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::ClauseExtraction);
        assert_eq!(parsed.query, "MATCH (p:Problem) WHERE p.rating > $min RETURN p.name");
        assert_eq!(parsed.parameters.get("min"), Some(&json!(1500)));
        assert_eq!(parsed.confidence, 0.4);
    }

    #[test]
    fn test_clause_extraction_ignores_prose_keywords() {
        let text = "Here is a query with the filter you asked for: MATCH (p:Problem) RETURN p.name";
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::ClauseExtraction);
        assert_eq!(parsed.query, "MATCH (p:Problem) RETURN p.name");

        let text = "You could unwind the list, then match (p) return p";
        assert_eq!(interpret(text).unwrap_err(), ParseError::NoQueryFound);
    }

    #[test]
    fn test_clause_extraction_stops_at_parameters_line() {
        let text = "Cypher: MATCH (p:Problem {name: $problem}) RETURN p.name AS name LIMIT 10\nParameters: {\"problem\": \"两数之和\"}";
        let (tier, parsed) = interpret(text).unwrap();
        assert_eq!(tier, ParseTier::ClauseExtraction);
        assert_eq!(parsed.query, "MATCH (p:Problem {name: $problem}) RETURN p.name AS name LIMIT 10");
        assert_eq!(parsed.parameters.get("problem"), Some(&json!("两数之和")));
        assert_eq!(parsed.parameters.len(), 1);
    }

    #[test]
    fn test_clause_extraction_fills_unknown_parameters() {
        let (_, parsed) = interpret("MATCH (n) WHERE n.name = $who RETURN n").unwrap();
        assert_eq!(parsed.parameters.get("who"), Some(&json!("")));
    }

    #[test]
    fn test_refusal() {
        assert_eq!(interpret("ERROR").unwrap_err(), ParseError::Refused);
        assert_eq!(interpret("  \"error\". ").unwrap_err(), ParseError::Refused);
        assert_eq!(
            interpret(r#"{"error": "question is ambiguous"}"#).unwrap_err(),
            ParseError::Refused
        );
    }

    #[test]
    fn test_nothing_recognisable() {
        assert_eq!(interpret("   ").unwrap_err(), ParseError::EmptyResponse);
        assert_eq!(
            interpret("I am not sure what you mean.").unwrap_err(),
            ParseError::NoQueryFound
        );
        // a clause without RETURN is not a query
        assert_eq!(interpret("MATCH (n) and then something").unwrap_err(), ParseError::NoQueryFound);
    }

    #[test]
    fn test_to_candidate() {
        let candidate = ResponseInterpreter::new()
            .to_candidate(r#"{"cypher": "MATCH (n) RETURN n", "intent": "all"}"#)
            .unwrap();
        assert_eq!(candidate.source, Strategy::Generative);
        assert_eq!(candidate.intent.as_deref(), Some("all"));
        assert_eq!(candidate.confidence, 0.8);
    }
}
