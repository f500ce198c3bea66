//! Intent → parameterized Cypher template table
//!
//! Templates are data. When the backend schema changes, update this table;
//! the resolver does not need to know.

use std::collections::HashMap;

use super::intent::ParsedIntent;
use super::types::Parameters;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "get_problem_difficulty",
        "MATCH (p:Problem) WHERE toLower(p.name) CONTAINS toLower($problem) \
         RETURN p.name AS name, p.rating AS rating LIMIT 10",
    ),
    (
        "list_problems_by_tag",
        "MATCH (p:Problem)-[:HAS_TAG]->(t:Tag) WHERE toLower(t.name)=toLower($tag) \
         RETURN p.name AS name, p.rating AS rating LIMIT 100",
    ),
    (
        "get_contest_winner",
        "MATCH (tm:Team)-[r:PLACED]->(c:Contest) WHERE toLower(c.name) CONTAINS toLower($year_or_name) \
         AND (r.rank IN [1,'1','1st','冠军'] OR toString(r.rank) IN ['1','1st','冠军']) \
         RETURN tm.name AS team, r.rank AS rank, r.region AS region LIMIT 5",
    ),
    (
        "get_team_by_contest_rank",
        "MATCH (t:Team)-[r:PLACED]->(c:Contest) WHERE toLower(c.name) = toLower($contest_name) \
         AND (r.rank = toInteger($rank) OR toString(r.rank) = $rank) \
         RETURN t.name AS team_name, r.rank AS rank, r.region AS region LIMIT 1",
    ),
    (
        "get_solutions_by_author",
        "MATCH (pr:Person {name:$author})<-[:AUTHOR]-(s:Solution)<-[:HAS_SOLUTION]-(p:Problem) \
         RETURN p.name AS problem, s.id AS sid, substring(s.content,0,300) AS snippet LIMIT 50",
    ),
    (
        "find_problems_using_algorithm",
        "MATCH (p:Problem)-[:HAS_TAG]->(t:Tag) WHERE toLower(t.name) CONTAINS toLower($algo) \
         RETURN p.name AS name, p.rating AS rating LIMIT 100",
    ),
    (
        "get_problem_info",
        "MATCH (p:Problem) WHERE toLower(p.name) CONTAINS toLower($problem) \
         OPTIONAL MATCH (p)-[:HAS_TAG]->(t:Tag) \
         OPTIONAL MATCH (p)-[:HAS_SOLUTION]->(s:Solution) \
         RETURN p.name AS name, p.rating AS rating, collect(distinct t.name) AS tags, \
         collect(distinct s.id) AS solutions LIMIT 5",
    ),
];

/// Read-only intent → query skeleton map
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<String, String>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateStore {
    pub fn builtin() -> Self {
        Self::from_pairs(BUILTIN_TEMPLATES.iter().copied())
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            templates: pairs
                .into_iter()
                .map(|(intent, template)| (intent.to_string(), template.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, intent: &str) -> Option<&str> {
        self.templates.get(intent).map(|t| t.as_str())
    }

    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(|k| k.as_str())
    }

    /// Template plus slot values as query parameters.
    ///
    /// Returns `("", {})` when the intent has no template.
    pub fn render(&self, parsed: &ParsedIntent) -> (String, Parameters) {
        match self.get(&parsed.intent) {
            Some(template) => {
                let params = parsed
                    .slots
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                (template.to_string(), params)
            }
            None => (String::new(), Parameters::new()),
        }
    }
}
