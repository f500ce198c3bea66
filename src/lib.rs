//! KGQA
//!
//! Natural-language question answering over a competitive-programming
//! knowledge graph. A question becomes a safe, parameterized, read-only
//! OpenCypher query; executing it is left to the caller.
//!
//! # Architecture
//!
//! - Pattern strategy: regex intent resolution plus fixed query templates
//! - Generative strategy: schema-grounded LLM prompting with a tolerant
//!   response interpreter
//! - Static Cypher validator gating every candidate
//! - Hybrid coordinator: strategy selection, one fallback hop, TTL cache,
//!   per-request metrics
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use kgqa::config::NLQConfig;
//! use kgqa::nlq::HybridCoordinator;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NLQConfig::load(None)?;
//! let coordinator = HybridCoordinator::from_config(&config, None)?;
//!
//! let generated = coordinator.generate("有哪些关于动态规划的题目", None).await?;
//! println!("{}", generated.candidate.query);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod nlq;

pub use config::{ConfigError, ConfigResult, LLMProvider, NLQConfig};
pub use nlq::{
    CypherValidator, GeneratedQuery, GenerationError, GenerationResult, HybridCoordinator, Parameters,
    QueryCandidate, QueryMode, Strategy, ValidationOutcome,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
