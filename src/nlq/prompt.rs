//! Prompt construction for the generative path

use serde_json::json;
use std::fmt::Write as _;

/// Default system instructions
pub const SYSTEM_PROMPT: &str = r#"You are a Neo4j Cypher expert. Given a user's natural-language question (often in Chinese) and the graph schema, write an accurate, efficient and safe read-only Cypher query.

Requirements:
1. Use only the node labels, relationship types and properties present in the schema.
2. Parameterize every entity value taken from the question using $parameter syntax.
3. Compare strings case-insensitively with toLower().
4. Return only the query and its parameters, without any explanation.
5. If the question is ambiguous or cannot be answered from the schema, reply with ERROR.

Response format (strict JSON):
{
  "cypher": "the Cypher query",
  "parameters": {"param1": "value1"},
  "intent": "optional intent label"
}

Safety rules:
- Never use DELETE, DETACH DELETE, REMOVE, SET, CREATE, MERGE or any other write clause.
- Never use LOAD CSV, CALL apoc.* or CALL dbms.*.
- Only MATCH, OPTIONAL MATCH, WHERE, RETURN, WITH, UNWIND, ORDER BY, SKIP and LIMIT are allowed."#;

/// A worked question → query pair included in every prompt
#[derive(Debug, Clone)]
pub struct FewShotExample {
    pub question: &'static str,
    pub cypher: &'static str,
    pub parameters: serde_json::Value,
}

pub fn few_shot_examples() -> Vec<FewShotExample> {
    vec![
        FewShotExample {
            question: "题目\"两数之和\"的难度",
            cypher: "MATCH (p:Problem) WHERE toLower(p.name) CONTAINS toLower($problem) \
                     RETURN p.name AS name, p.rating AS rating LIMIT 10",
            parameters: json!({"problem": "两数之和"}),
        },
        FewShotExample {
            question: "有哪些关于动态规划的题目",
            cypher: "MATCH (p:Problem)-[:HAS_TAG]->(t:Tag) WHERE toLower(t.name)=toLower($tag) \
                     RETURN p.name AS name, p.rating AS rating LIMIT 100",
            parameters: json!({"tag": "动态规划"}),
        },
        FewShotExample {
            question: "谁是2023年ICPC世界冠军",
            cypher: "MATCH (tm:Team)-[r:PLACED]->(c:Contest) WHERE toLower(c.name) CONTAINS toLower($year_or_name) \
                     AND r.rank IN ['1','1st','冠军'] RETURN tm.name AS team, r.rank AS rank, r.region AS region LIMIT 5",
            parameters: json!({"year_or_name": "2023"}),
        },
        FewShotExample {
            question: "张三写了哪些题解",
            cypher: "MATCH (pr:Person {name:$author})<-[:AUTHOR]-(s:Solution)<-[:HAS_SOLUTION]-(p:Problem) \
                     RETURN p.name AS problem, s.id AS sid, substring(s.content,0,300) AS snippet LIMIT 50",
            parameters: json!({"author": "张三"}),
        },
    ]
}

/// User message: question, schema and worked examples. `schema_text` carries
/// its own heading, as rendered by [`GraphSchema::to_text`].
///
/// [`GraphSchema::to_text`]: super::schema::GraphSchema::to_text
pub fn build_user_prompt(question: &str, schema_text: &str) -> String {
    let mut prompt = format!(
        "Question:\n{}\n\n{}\n\nExamples:\n",
        question.trim(),
        schema_text
    );

    for (i, example) in few_shot_examples().iter().enumerate() {
        if i > 0 {
            prompt.push('\n');
        }
        let _ = writeln!(
            prompt,
            "Question: {}\nCypher: {}\nParameters: {}",
            example.question, example.cypher, example.parameters
        );
    }

    prompt.push_str("\nNow write the Cypher query for the question.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlq::schema::GraphSchema;
    use crate::nlq::types::Parameters;
    use crate::nlq::validator::CypherValidator;

    #[test]
    fn test_prompt_contains_all_parts() {
        let prompt = build_user_prompt("  谁是冠军  ", "Graph schema:\n1. Team");
        assert!(prompt.starts_with("Question:\n谁是冠军\n"));
        assert!(prompt.contains("1. Team"));
        assert!(prompt.contains("Parameters: {\"author\":\"张三\"}"));
        assert!(prompt.ends_with("Now write the Cypher query for the question."));
    }

    #[test]
    fn test_schema_heading_appears_once() {
        let schema = GraphSchema::builtin_default().to_text();
        let prompt = build_user_prompt("谁是冠军", &schema);
        assert_eq!(prompt.matches("Graph schema:").count(), 1);
        assert!(prompt.contains("谁是冠军\n\nGraph schema:\n\nNode types:\n"));
    }

    #[test]
    fn test_examples_are_safe() {
        let validator = CypherValidator::default();
        for example in few_shot_examples() {
            let params: Parameters = example
                .parameters
                .as_object()
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default();
            let outcome = validator.validate(example.cypher, &params);
            assert!(outcome.is_valid, "{}: {}", example.question, outcome.error_message);
        }
    }
}
