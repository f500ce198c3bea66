//! Graph schema description for prompt grounding
//!
//! A [`SchemaSource`] lists node and relationship types; the
//! [`SchemaContextBuilder`] renders them as stable text and caches it until
//! [`SchemaContextBuilder::refresh`] is called.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema source error: {0}")]
    SourceError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Schema parse error: {0}")]
    ParseError(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

fn default_type_name() -> String {
    "String".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type", default = "default_type_name")]
    pub type_name: String,
}

impl PropertyInfo {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
    pub label: String,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
    #[serde(default)]
    pub approximate_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub type_name: String,
    #[serde(default)]
    pub start_labels: Vec<String>,
    #[serde(default)]
    pub end_labels: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    #[serde(default)]
    pub node_types: Vec<NodeType>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl GraphSchema {
    /// Schema of the ICPC knowledge graph, used when no source is reachable
    pub fn builtin_default() -> Self {
        let props = |names: &[(&str, &str)]| {
            names
                .iter()
                .map(|(n, t)| PropertyInfo::new(n, t))
                .collect::<Vec<_>>()
        };
        let node = |label: &str, properties: Vec<PropertyInfo>, count: u64| NodeType {
            label: label.to_string(),
            properties,
            approximate_count: count,
        };
        let rel = |type_name: &str, start: &str, end: &str, properties: Vec<PropertyInfo>| RelationshipType {
            type_name: type_name.to_string(),
            start_labels: vec![start.to_string()],
            end_labels: vec![end.to_string()],
            properties,
        };

        Self {
            node_types: vec![
                node(
                    "Problem",
                    props(&[("id", "String"), ("name", "String"), ("rating", "Integer"), ("source", "String")]),
                    2000,
                ),
                node("Tag", props(&[("id", "String"), ("name", "String")]), 150),
                node("Contest", props(&[("id", "String"), ("name", "String")]), 50),
                node("Team", props(&[("id", "String"), ("name", "String")]), 300),
                node("Person", props(&[("id", "String"), ("name", "String")]), 500),
                node(
                    "Solution",
                    props(&[("id", "String"), ("writer", "String"), ("content", "String")]),
                    800,
                ),
            ],
            relationship_types: vec![
                rel("HAS_TAG", "Problem", "Tag", Vec::new()),
                rel("HAS_SOLUTION", "Problem", "Solution", Vec::new()),
                rel("AUTHOR", "Solution", "Person", Vec::new()),
                rel("PARTICIPATED_IN", "Team", "Contest", Vec::new()),
                rel("PLACED", "Team", "Contest", props(&[("rank", "String"), ("region", "String")])),
            ],
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn from_json_str(s: &str) -> SchemaResult<Self> {
        serde_json::from_str(s).map_err(|e| SchemaError::ParseError(e.to_string()))
    }

    pub fn from_yaml_str(s: &str) -> SchemaResult<Self> {
        serde_yaml::from_str(s).map_err(|e| SchemaError::ParseError(e.to_string()))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(SchemaError::ParseError(format!(
                "unsupported schema file extension: {:?}",
                other
            ))),
        }
    }

    /// Render as prompt text. Output does not depend on input ordering.
    pub fn to_text(&self) -> String {
        let mut nodes: Vec<&NodeType> = self.node_types.iter().collect();
        nodes.sort_by(|a, b| a.label.cmp(&b.label));
        let mut rels: Vec<&RelationshipType> = self.relationship_types.iter().collect();
        rels.sort_by(|a, b| a.type_name.cmp(&b.type_name));

        let mut out = String::from("Graph schema:\n\nNode types:\n");
        for (i, node) in nodes.iter().enumerate() {
            if node.approximate_count > 0 {
                let _ = writeln!(out, "{}. {} (~{} nodes)", i + 1, node.label, node.approximate_count);
            } else {
                let _ = writeln!(out, "{}. {}", i + 1, node.label);
            }
            write_properties(&mut out, &node.properties);
        }

        out.push_str("\nRelationship types:\n");
        for (i, rel) in rels.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {}: {} -> {}",
                i + 1,
                rel.type_name,
                join_labels(&rel.start_labels),
                join_labels(&rel.end_labels)
            );
            write_properties(&mut out, &rel.properties);
        }

        for (title, items) in [("Constraints", &self.constraints), ("Indexes", &self.indexes)] {
            if items.is_empty() {
                continue;
            }
            let mut sorted: Vec<&String> = items.iter().collect();
            sorted.sort();
            let _ = writeln!(out, "\n{}:", title);
            for item in sorted {
                let _ = writeln!(out, "- {}", item);
            }
        }

        out.trim_end().to_string()
    }
}

fn write_properties(out: &mut String, properties: &[PropertyInfo]) {
    let mut sorted: Vec<&PropertyInfo> = properties.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for prop in sorted {
        let _ = writeln!(out, "   - {}: {}", prop.name, prop.type_name);
    }
}

fn join_labels(labels: &[String]) -> String {
    if labels.is_empty() {
        return "Any".to_string();
    }
    let mut sorted: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();
    sorted.sort_unstable();
    sorted.join(", ")
}

/// Read-only view of the graph's structure
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn node_types(&self) -> SchemaResult<Vec<NodeType>>;

    async fn relationship_types(&self) -> SchemaResult<Vec<RelationshipType>>;

    async fn constraints(&self) -> SchemaResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn indexes(&self) -> SchemaResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn load(&self) -> SchemaResult<GraphSchema> {
        Ok(GraphSchema {
            node_types: self.node_types().await?,
            relationship_types: self.relationship_types().await?,
            constraints: self.constraints().await?,
            indexes: self.indexes().await?,
        })
    }
}

/// Serves a fixed schema, e.g. one loaded from a file at startup
#[derive(Debug, Clone)]
pub struct StaticSchemaSource {
    schema: GraphSchema,
}

impl StaticSchemaSource {
    pub fn new(schema: GraphSchema) -> Self {
        Self { schema }
    }

    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        Ok(Self::new(GraphSchema::from_file(path)?))
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn node_types(&self) -> SchemaResult<Vec<NodeType>> {
        Ok(self.schema.node_types.clone())
    }

    async fn relationship_types(&self) -> SchemaResult<Vec<RelationshipType>> {
        Ok(self.schema.relationship_types.clone())
    }

    async fn constraints(&self) -> SchemaResult<Vec<String>> {
        Ok(self.schema.constraints.clone())
    }

    async fn indexes(&self) -> SchemaResult<Vec<String>> {
        Ok(self.schema.indexes.clone())
    }
}

/// Renders and caches schema text for the generative path
pub struct SchemaContextBuilder {
    source: Option<Arc<dyn SchemaSource>>,
    cached: RwLock<Option<Arc<str>>>,
}

impl SchemaContextBuilder {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source: Some(source),
            cached: RwLock::new(None),
        }
    }

    /// Builder that always renders the built-in default schema
    pub fn builtin() -> Self {
        Self {
            source: None,
            cached: RwLock::new(None),
        }
    }

    /// Rendered schema text, loading it from the source on first use.
    ///
    /// A failing source degrades to the built-in default schema; that text is
    /// cached like any other until the next refresh.
    pub async fn schema_text(&self) -> Arc<str> {
        if let Some(text) = self.cached.read().ok().and_then(|guard| guard.clone()) {
            return text;
        }

        let schema = match &self.source {
            Some(source) => match source.load().await {
                Ok(schema) => {
                    info!(
                        "Loaded graph schema: {} node types, {} relationship types",
                        schema.node_types.len(),
                        schema.relationship_types.len()
                    );
                    schema
                }
                Err(e) => {
                    warn!("Failed to load graph schema, using built-in default: {}", e);
                    GraphSchema::builtin_default()
                }
            },
            None => GraphSchema::builtin_default(),
        };

        let text: Arc<str> = Arc::from(schema.to_text());
        if let Ok(mut guard) = self.cached.write() {
            *guard = Some(text.clone());
        }
        text
    }

    /// Drop the cached text; the next use re-renders from the source
    pub fn refresh(&self) {
        match self.cached.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        info!("Schema cache cleared");
    }

    pub fn is_cached(&self) -> bool {
        self.cached.read().map(|guard| guard.is_some()).unwrap_or(false)
    }
}
