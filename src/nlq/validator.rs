//! Static Cypher validation
//!
//! Four ordered phases, short-circuiting on the first hard failure:
//! security, syntax, parameters, complexity. Each phase may add non-fatal
//! warnings. Validation never raises: failures are reported as data in
//! [`ValidationOutcome`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use super::types::Parameters;
use crate::config::ValidationConfig;

/// Phase that rejected a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationErrorKind {
    Security,
    Syntax,
    Parameter,
    Complexity,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationErrorKind::Security => "security",
            ValidationErrorKind::Syntax => "syntax",
            ValidationErrorKind::Parameter => "parameter",
            ValidationErrorKind::Complexity => "complexity",
        };
        f.write_str(s)
    }
}

/// Result of validating one query.
///
/// `is_valid == false` always comes with `error_kind` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub error_kind: Option<ValidationErrorKind>,
    pub error_message: String,
    pub warnings: Vec<String>,
    pub complexity_score: u32,
}

impl ValidationOutcome {
    pub fn valid(warnings: Vec<String>, complexity_score: u32) -> Self {
        Self {
            is_valid: true,
            error_kind: None,
            error_message: String::new(),
            warnings,
            complexity_score,
        }
    }

    pub fn invalid(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_kind: Some(kind),
            error_message: message.into(),
            warnings: Vec::new(),
            complexity_score: 0,
        }
    }
}

/// Weights of the static complexity heuristic.
///
/// The numbers are tuning knobs: higher means costlier, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityWeights {
    pub base: u32,
    /// Every MATCH keyword, including the one inside OPTIONAL MATCH
    pub match_clause: u32,
    /// Added on top of `match_clause` for OPTIONAL MATCH
    pub optional_match: u32,
    pub relationship: u32,
    pub where_clause: u32,
    pub boolean_operator: u32,
    pub aggregation: u32,
    pub with_clause: u32,
    pub order_by: u32,
    /// Paren depth allowed before `nesting` is charged per extra level
    pub nesting_threshold: u32,
    pub nesting: u32,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            base: 1,
            match_clause: 1,
            optional_match: 2,
            relationship: 1,
            where_clause: 1,
            boolean_operator: 1,
            aggregation: 1,
            with_clause: 2,
            order_by: 1,
            nesting_threshold: 3,
            nesting: 1,
        }
    }
}

/// Aggregate view over a batch of outcomes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub success_rate: f64,
    pub error_kinds: BTreeMap<ValidationErrorKind, usize>,
    pub avg_complexity: f64,
}

// Ordered so that the two-word forms are reported before their suffixes.
const DANGEROUS_KEYWORDS: &[(&str, &str)] = &[
    ("DETACH DELETE", r"DETACH\s+DELETE\b"),
    ("DELETE", r"DELETE\b"),
    ("SET", r"SET\b"),
    ("REMOVE", r"REMOVE\b"),
    ("CREATE", r"CREATE\b"),
    ("MERGE", r"MERGE\b"),
    ("LOAD CSV", r"LOAD\s+CSV\b"),
    ("CALL apoc.", r"CALL\s+apoc\s*\."),
    ("CALL dbms.", r"CALL\s+dbms\s*\."),
    ("DROP", r"DROP\b"),
    ("FOREACH", r"FOREACH\b"),
];

// A keyword must not be part of a longer identifier, a property access or a parameter.
static DANGEROUS_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DANGEROUS_KEYWORDS
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(&format!(r"(?i)(?:^|[^\w.$]){}", pattern)).unwrap()))
        .collect()
});

static ENTRY_CLAUSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:OPTIONAL\s+MATCH|MATCH|WITH|UNWIND)\b").unwrap());

static MATCH_EQUIVALENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:MATCH|WITH|UNWIND)\b").unwrap());

static RETURN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bRETURN\b").unwrap());

static AFTER_RETURN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(STARTS|ENDS)\s+)?(MATCH|OPTIONAL|WHERE|WITH|UNWIND|CALL|UNION|YIELD)\b").unwrap()
});

// Words that may sit next to an operand without an operator between them
const JOINING_KEYWORDS: &[&str] = &[
    "MATCH", "OPTIONAL", "WHERE", "WITH", "UNWIND", "CALL", "UNION", "YIELD", "RETURN", "AS",
    "DISTINCT", "ORDER", "BY", "SKIP", "LIMIT", "ASC", "ASCENDING", "DESC", "DESCENDING", "AND",
    "OR", "XOR", "NOT", "IS", "NULL", "IN", "STARTS", "ENDS", "CONTAINS", "CASE", "WHEN", "THEN",
    "ELSE", "END", "TRUE", "FALSE", "ALL", "ANY", "NONE", "SINGLE", "EXISTS", "USING", "INDEX",
    "SCAN", "JOIN", "ON", "SHORTEST", "PATH", "PATHS",
];

// Case-sensitive on purpose: only lowercase spellings are flagged.
static LOWERCASE_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:match|optional match|where|return|with|unwind|order by|skip|limit)\b").unwrap()
});

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$(\w+)").unwrap());

static MATCH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bMATCH\b").unwrap());
static OPTIONAL_MATCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bOPTIONAL\s+MATCH\b").unwrap());
static RELATIONSHIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s*<?-\s*(?:\[[^\]]*\])?\s*-\s*>?\s*\(").unwrap());
static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static BOOLEAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(?:AND|OR)\b").unwrap());
static AGGREGATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap());
static WITH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWITH\b").unwrap());
static STRING_PREDICATE_WITH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:STARTS|ENDS)\s+WITH\b").unwrap());
static ORDER_BY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").unwrap());

/// Static, side-effect free query validator
#[derive(Debug, Clone, Default)]
pub struct CypherValidator {
    config: ValidationConfig,
}

impl CypherValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a query against the parameters that will be bound to it
    pub fn validate(&self, query: &str, parameters: &Parameters) -> ValidationOutcome {
        let query = query.trim();
        if query.is_empty() {
            return ValidationOutcome::invalid(ValidationErrorKind::Syntax, "Empty query");
        }

        let stripped = strip_literals(query);
        let mut warnings = Vec::new();

        if self.config.enable_security_check {
            if let Err(message) = check_security(&stripped) {
                debug!("Query rejected by security check: {}", message);
                return ValidationOutcome::invalid(ValidationErrorKind::Security, message);
            }
        }

        if self.config.enable_syntax_check {
            match check_syntax(query, &stripped) {
                Ok(w) => warnings.extend(w),
                Err(message) => {
                    return ValidationOutcome::invalid(ValidationErrorKind::Syntax, message);
                }
            }
        }

        match check_parameters(&stripped, parameters) {
            Ok(w) => warnings.extend(w),
            Err(message) => {
                return ValidationOutcome::invalid(ValidationErrorKind::Parameter, message);
            }
        }

        let mut score = 0;
        if self.config.enable_complexity_check {
            score = complexity_score(&stripped, &self.config.complexity_weights);
            let ceiling = self.config.max_complexity_score;
            if score > ceiling {
                let mut outcome = ValidationOutcome::invalid(
                    ValidationErrorKind::Complexity,
                    format!("Query complexity too high: {} > {}", score, ceiling),
                );
                outcome.complexity_score = score;
                outcome.warnings = warnings;
                return outcome;
            }
            // More than 80% of the ceiling
            if u64::from(score) * 5 > u64::from(ceiling) * 4 {
                warnings.push(format!("High complexity query: {}", score));
            }
        }

        ValidationOutcome::valid(warnings, score)
    }

    pub fn validate_batch(&self, queries: &[(String, Parameters)]) -> Vec<ValidationOutcome> {
        queries.iter().map(|(q, p)| self.validate(q, p)).collect()
    }

    pub fn summarize(outcomes: &[ValidationOutcome]) -> ValidationSummary {
        let total = outcomes.len();
        let valid = outcomes.iter().filter(|o| o.is_valid).count();

        let mut error_kinds = BTreeMap::new();
        for kind in outcomes.iter().filter_map(|o| o.error_kind) {
            *error_kinds.entry(kind).or_insert(0) += 1;
        }

        let (success_rate, avg_complexity) = if total > 0 {
            let sum: u64 = outcomes.iter().map(|o| o.complexity_score as u64).sum();
            (valid as f64 / total as f64, sum as f64 / total as f64)
        } else {
            (0.0, 0.0)
        };

        ValidationSummary {
            total,
            valid,
            invalid: total - valid,
            success_rate,
            error_kinds,
            avg_complexity,
        }
    }

    /// Placeholder names referenced outside string literals and comments
    pub fn placeholders(query: &str) -> BTreeSet<String> {
        let stripped = strip_literals(query);
        PLACEHOLDER_RE
            .captures_iter(&stripped)
            .map(|c| c[1].to_string())
            .collect()
    }
}

/// Remove comments and replace string/backtick literals with a single space
pub fn strip_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let mut escaped = false;
                for s in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if s == '\\' && c != '`' {
                        escaped = true;
                    } else if s == c {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        break;
                    }
                    prev = s;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

fn check_security(stripped: &str) -> Result<(), String> {
    for (name, re) in DANGEROUS_RES.iter() {
        if re.is_match(stripped) {
            return Err(format!("Dangerous operation detected: {}", name));
        }
    }

    let head = stripped.trim_start();
    if !ENTRY_CLAUSE_RE.is_match(head) {
        let first = head.split_whitespace().next().unwrap_or("");
        return Err(format!(
            "Query must start with MATCH, OPTIONAL MATCH, WITH or UNWIND, got: {}",
            first
        ));
    }

    Ok(())
}

fn check_syntax(query: &str, stripped: &str) -> Result<Vec<String>, String> {
    check_balance(query)?;

    if !MATCH_EQUIVALENT_RE.is_match(stripped) {
        return Err("Query must contain a MATCH, WITH or UNWIND clause".to_string());
    }

    let top_level = mask_nested(stripped);
    let last_return = match RETURN_RE.find_iter(&top_level).last() {
        Some(m) => m,
        None => return Err("Query must contain a RETURN clause".to_string()),
    };

    check_adjacent_operands(&top_level, last_return.end())?;

    let mut warnings = Vec::new();
    let mut seen = BTreeSet::new();
    for caps in AFTER_RETURN_RE.captures_iter(&top_level[last_return.end()..]) {
        // STARTS WITH / ENDS WITH are string predicates, not clauses
        if caps.get(1).is_some() {
            continue;
        }
        let keyword = caps[2].to_uppercase();
        if seen.insert(keyword.clone()) {
            warnings.push(format!("Unexpected keyword after RETURN: {}", keyword));
        }
    }

    if LOWERCASE_KEYWORD_RE.is_match(stripped) {
        warnings.push("Consider using uppercase for Cypher keywords".to_string());
    }

    Ok(warnings)
}

/// Two operands with nothing joining them are not Cypher. This catches prose
/// around a query and annotation lines such as `Parameters: {...}` pasted
/// after the projection. `top_level` has brackets and literals blanked out.
fn check_adjacent_operands(top_level: &str, return_end: usize) -> Result<(), String> {
    let mut previous_operand = false;
    let mut start = None;

    let end = (top_level.len(), ' ');
    for (pos, c) in top_level.char_indices().chain(std::iter::once(end)) {
        if c.is_alphanumeric() || c == '_' || c == '$' || c == '.' {
            start.get_or_insert(pos);
            continue;
        }

        if let Some(from) = start.take() {
            let word = &top_level[from..pos];
            let keyword = JOINING_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word));
            if previous_operand && !keyword {
                return Err(if from >= return_end {
                    format!("Unexpected content after RETURN: {}", word)
                } else {
                    format!("Unexpected token: {}", word)
                });
            }
            previous_operand = !keyword;
        }
        if !c.is_whitespace() {
            previous_operand = false;
        }
    }

    Ok(())
}

/// Bracket and quote balance, aware of string literals, escapes and comments
fn check_balance(query: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        break;
                    }
                    prev = s;
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return Err("Mismatched brackets".to_string());
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("Mismatched quotes".to_string());
    }
    if !stack.is_empty() {
        return Err("Mismatched brackets".to_string());
    }
    Ok(())
}

/// Blank out everything enclosed in brackets, keeping byte offsets intact
fn mask_nested(stripped: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(stripped.len());

    for c in stripped.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                out.push(' ');
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                out.push(' ');
            }
            _ if depth > 0 => {
                for _ in 0..c.len_utf8() {
                    out.push(' ');
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn check_parameters(stripped: &str, parameters: &Parameters) -> Result<Vec<String>, String> {
    let referenced: BTreeSet<&str> = PLACEHOLDER_RE
        .captures_iter(stripped)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let missing: Vec<&str> = referenced
        .iter()
        .copied()
        .filter(|name| !parameters.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(format!("Missing parameters: {}", missing.join(", ")));
    }

    let mut warnings = Vec::new();

    let unused: Vec<&str> = parameters
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !referenced.contains(k))
        .collect();
    if !unused.is_empty() {
        warnings.push(format!("Unused parameters: {}", unused.join(", ")));
    }

    for (key, value) in parameters {
        match value {
            serde_json::Value::Null => warnings.push(format!("Parameter '{}' is null", key)),
            serde_json::Value::String(s) if s.trim().is_empty() => {
                warnings.push(format!("Parameter '{}' is an empty string", key))
            }
            _ => {}
        }
    }

    Ok(warnings)
}

/// Weighted heuristic score of a literal-free query text
pub fn complexity_score(stripped: &str, weights: &ComplexityWeights) -> u32 {
    let count = |re: &Regex| re.find_iter(stripped).count() as u32;

    let mut score = weights.base;
    score += count(&MATCH_RE) * weights.match_clause;
    score += count(&OPTIONAL_MATCH_RE) * weights.optional_match;
    score += count(&RELATIONSHIP_RE) * weights.relationship;
    score += count(&WHERE_RE) * weights.where_clause;
    score += count(&BOOLEAN_RE) * weights.boolean_operator;
    score += count(&AGGREGATION_RE) * weights.aggregation;

    let with_clauses = count(&WITH_RE).saturating_sub(count(&STRING_PREDICATE_WITH_RE));
    score += with_clauses * weights.with_clause;

    if ORDER_BY_RE.is_match(stripped) {
        score += weights.order_by;
    }

    let depth = max_paren_depth(stripped);
    if depth > weights.nesting_threshold {
        score += (depth - weights.nesting_threshold) * weights.nesting;
    }

    score
}

fn max_paren_depth(stripped: &str) -> u32 {
    let mut depth = 0u32;
    let mut max = 0u32;
    for c in stripped.chars() {
        match c {
            '(' => {
                depth += 1;
                max = max.max(depth);
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}
