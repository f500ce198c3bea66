//! Pattern intent resolver
//!
//! An ordered table of `(intent, regex, slot names)`. The first pattern that
//! matches the question decides the intent; ordering encodes priority among
//! overlapping patterns.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Intent tag returned when no pattern matches
pub const UNKNOWN_INTENT: &str = "unknown";

/// Classified question: intent tag plus named slot values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub intent: String,
    pub slots: BTreeMap<String, String>,
}

impl ParsedIntent {
    pub fn unknown() -> Self {
        Self {
            intent: UNKNOWN_INTENT.to_string(),
            slots: BTreeMap::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.intent == UNKNOWN_INTENT
    }
}

/// One row of the resolver table
#[derive(Debug, Clone)]
pub struct IntentPattern {
    pub intent: String,
    pub pattern: Regex,
    pub slots: Vec<String>,
}

impl IntentPattern {
    /// Compile a pattern. Matching is always case-insensitive.
    pub fn new(intent: &str, pattern: &str, slots: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            intent: intent.to_string(),
            pattern: Regex::new(&format!("(?i){}", pattern))?,
            slots: slots.iter().map(|s| s.to_string()).collect(),
        })
    }
}

// ICPC knowledge-graph question shapes, highest priority first.
const BUILTIN_PATTERNS: &[(&str, &str, &[&str])] = &[
    (
        "get_problem_difficulty",
        r#"(?:题目|problem)\s*["'“‘]?([^"'”’]+?)["'”’]?\s*(?:的)?\s*(?:难度|rating|difficulty)"#,
        &["problem"],
    ),
    (
        "list_problems_by_tag",
        r"(?:有哪些|列出|给我).*?(?:关于|涉及|含有)\s*([^\s，。的]+)",
        &["tag"],
    ),
    (
        "get_contest_winner",
        r"(?:谁是|冠军|第一名).*(\d{4}|20\d{2}|[^\s，。]+赛)",
        &["year_or_name"],
    ),
    (
        "get_team_by_contest_rank",
        r#"(?:比赛|contest)\s*["'“‘]?([^"'”’]+)["'”’]?.*?(?:第|rank)\s*(\d+)(?:名)?"#,
        &["contest_name", "rank"],
    ),
    (
        "get_solutions_by_author",
        r"(?:作者(?:是|为)?|由)\s*([^\s，。的]+?)(?:写|编写|提交|的|[\s，。？?]|$)",
        &["author"],
    ),
    (
        "find_problems_using_algorithm",
        r"(?:使用|用到|涉及)了?\s*([^\s，。的]+?)\s*(?:算法|的|[\s，。？?]|$)",
        &["algo"],
    ),
    (
        "get_problem_info",
        r#"(?:题目|problem)\s*["'“‘]?([^"'”’的？?]+?)["'”’]?\s*(?:的[^？?。!！]*|(?:信息|详情|是什么)+)?\s*[？?。!！吧呢]*$"#,
        &["problem"],
    ),
];

static BUILTIN_TABLE: LazyLock<Vec<IntentPattern>> = LazyLock::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|(intent, pattern, slots)| IntentPattern::new(intent, pattern, slots).unwrap())
        .collect()
});

/// Ordered, first-match-wins intent classifier
#[derive(Debug, Clone)]
pub struct IntentResolver {
    patterns: Vec<IntentPattern>,
}

impl Default for IntentResolver {
    fn default() -> Self {
        Self::builtin()
    }
}

impl IntentResolver {
    /// Resolver over the built-in ICPC question table
    pub fn builtin() -> Self {
        Self {
            patterns: BUILTIN_TABLE.clone(),
        }
    }

    /// Resolver over a caller-supplied table; order is preserved
    pub fn with_patterns(patterns: Vec<IntentPattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[IntentPattern] {
        &self.patterns
    }

    /// Classify a question. Never fails: unmatched input yields `unknown`.
    pub fn resolve(&self, question: &str) -> ParsedIntent {
        let q = question.trim();

        for entry in &self.patterns {
            if let Some(caps) = entry.pattern.captures(q) {
                let slots = entry
                    .slots
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        // Group 0 is the whole match
                        let value = caps
                            .get(i + 1)
                            .map(|m| m.as_str().trim().to_string())
                            .unwrap_or_default();
                        (name.clone(), value)
                    })
                    .collect();

                return ParsedIntent {
                    intent: entry.intent.clone(),
                    slots,
                };
            }
        }

        ParsedIntent::unknown()
    }
}
