//! Hybrid decision coordinator
//!
//! Per request: cache check, strategy selection, generation, validation, at
//! most one fallback hop to the other strategy, cache store, metrics.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cache::{CacheEntry, CacheKey, QueryCache};
use super::client::GenerativeClient;
use super::intent::IntentResolver;
use super::metrics::{MetricsRecord, MetricsRecorder, MetricsSummary};
use super::schema::{SchemaContextBuilder, SchemaSource};
use super::strategy::{GenerativeStrategy, PatternStrategy, QueryStrategy};
use super::templates::TemplateStore;
use super::types::{GeneratedQuery, QueryCandidate, QueryMode, Strategy};
use super::validator::{CypherValidator, ValidationOutcome};
use super::{BackendError, GenerationError, GenerationResult, StrategyFailure};
use crate::config::{NLQConfig, StrategyConfig};

/// Question-derived signal for strategy selection.
///
/// Distinct from the validator's score, which is computed from query text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityMetrics {
    pub entity_count: u32,
    pub relation_depth: u32,
    pub condition_count: u32,
    pub has_aggregation: bool,
    pub has_sorting: bool,
    pub pattern_match_confidence: f32,
}

impl ComplexityMetrics {
    pub fn complexity_score(&self) -> u32 {
        let mut score = 0;
        if self.entity_count > 2 {
            score += (self.entity_count - 2) * 2;
        }
        score += self.relation_depth.saturating_sub(1) * 3;
        score += self.condition_count.saturating_sub(1) * 2;
        if self.has_aggregation {
            score += 3;
        }
        if self.has_sorting {
            score += 1;
        }
        if self.pattern_match_confidence < 0.5 {
            score += 5;
        }
        score
    }
}

const MAX_RELATION_DEPTH: u32 = 5;

const RELATION_WORDS_ZH: &[&str] = &["的", "和", "或者", "以及", "相关", "关于"];
const CONDITION_WORDS_ZH: &[&str] = &["哪些", "什么", "多少", "如何", "为什么", "是否"];
const AGGREGATION_WORDS_ZH: &[&str] = &["总共", "一共", "数量", "个数", "统计", "平均", "最多", "最少"];
const SORTING_WORDS_ZH: &[&str] = &["排序", "排列", "最", "前", "后", "顺序"];

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'“‘「]([^"'”’」]*)["'”’」]"#).unwrap());
static CAPITALIZED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*").unwrap());
static CONDITION_EN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:which|what|how|why|whether)\b").unwrap());
static RELATION_EN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:of|and|or|related|about)\b").unwrap());
static AGGREGATION_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:total|count|number of|how many|average|sum|most|least)\b").unwrap()
});
static SORTING_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:sort|sorted|order|ordered|rank|ranked|top|highest|lowest|most|least)\b").unwrap()
});

/// Derive selection metrics from the raw question, resolving intent once
pub fn analyze_question(question: &str, resolver: &IntentResolver) -> ComplexityMetrics {
    let lower = question.to_lowercase();

    let mut entities: HashSet<&str> = QUOTED_RE
        .captures_iter(question)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    entities.extend(CAPITALIZED_RE.find_iter(question).map(|m| m.as_str()));
    let entity_count = if entities.is_empty() { 1 } else { entities.len() as u32 };

    let connectors = RELATION_WORDS_ZH.iter().map(|w| lower.matches(w).count()).sum::<usize>()
        + RELATION_EN_RE.find_iter(&lower).count();
    let relation_depth = (1 + connectors as u32).min(MAX_RELATION_DEPTH);

    let english_conditions: HashSet<&str> = CONDITION_EN_RE.find_iter(&lower).map(|m| m.as_str()).collect();
    let conditions = CONDITION_WORDS_ZH.iter().filter(|w| lower.contains(**w)).count() + english_conditions.len();
    let condition_count = (conditions as u32).max(1);

    let has_aggregation =
        AGGREGATION_WORDS_ZH.iter().any(|w| lower.contains(w)) || AGGREGATION_EN_RE.is_match(&lower);
    let has_sorting = SORTING_WORDS_ZH.iter().any(|w| lower.contains(w)) || SORTING_EN_RE.is_match(&lower);

    let pattern_match_confidence = if resolver.resolve(question).is_unknown() { 0.1 } else { 0.9 };

    ComplexityMetrics {
        entity_count,
        relation_depth,
        condition_count,
        has_aggregation,
        has_sorting,
        pattern_match_confidence,
    }
}

/// Pure selection rule for hybrid mode
pub fn select_strategy(metrics: &ComplexityMetrics, threshold: u32) -> Strategy {
    let score = metrics.complexity_score();
    if metrics.pattern_match_confidence > 0.8 && score <= threshold {
        return Strategy::Pattern;
    }
    if score > threshold || metrics.pattern_match_confidence < 0.5 {
        return Strategy::Generative;
    }
    Strategy::Pattern
}

/// Per-mode result of [`HybridCoordinator::compare_strategies`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeReport {
    pub total: usize,
    pub succeeded: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

struct Resolution {
    strategy: Strategy,
    candidate: QueryCandidate,
    validation: ValidationOutcome,
    fallback_used: bool,
}

/// Top-level NLQ orchestrator; share it as `Arc<HybridCoordinator>`
pub struct HybridCoordinator {
    config: StrategyConfig,
    validator: CypherValidator,
    resolver: Arc<IntentResolver>,
    pattern: Arc<dyn QueryStrategy>,
    generative: Option<Arc<dyn QueryStrategy>>,
    cache: Option<QueryCache>,
    metrics: MetricsRecorder,
}

impl HybridCoordinator {
    pub fn new(
        config: StrategyConfig,
        validator: CypherValidator,
        pattern: Arc<dyn QueryStrategy>,
        generative: Option<Arc<dyn QueryStrategy>>,
    ) -> Self {
        let cache = config
            .cache_enabled
            .then(|| QueryCache::new(config.cache_capacity, config.cache_ttl()));
        let metrics = MetricsRecorder::new(config.metrics_capacity);

        Self {
            config,
            validator,
            resolver: Arc::new(IntentResolver::builtin()),
            pattern,
            generative,
            cache,
            metrics,
        }
    }

    /// Resolver used for pattern confidence during hybrid selection
    pub fn with_resolver(mut self, resolver: Arc<IntentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Wire the built-in pattern path and, when usable, the HTTP generative path
    pub fn from_config(
        config: &NLQConfig,
        schema_source: Option<Arc<dyn SchemaSource>>,
    ) -> Result<Self, BackendError> {
        let resolver = Arc::new(IntentResolver::builtin());
        let pattern: Arc<dyn QueryStrategy> =
            Arc::new(PatternStrategy::new(resolver.clone(), TemplateStore::builtin()));

        let generative: Option<Arc<dyn QueryStrategy>> = if config.generation.is_usable() {
            let client = GenerativeClient::from_config(&config.generation)?;
            let schema = match schema_source {
                Some(source) => SchemaContextBuilder::new(source),
                None => SchemaContextBuilder::builtin(),
            };
            Some(Arc::new(GenerativeStrategy::new(client, schema)))
        } else {
            info!(
                "Generative strategy disabled ({:?} without usable credentials), running pattern-only",
                config.generation.provider
            );
            None
        };

        let coordinator = Self::new(
            config.strategy.clone(),
            CypherValidator::new(config.validation.clone()),
            pattern,
            generative,
        )
        .with_resolver(resolver);

        info!("Initialized NLQ coordinator with mode: {}", coordinator.effective_mode());
        Ok(coordinator)
    }

    pub fn has_generative(&self) -> bool {
        self.generative.is_some()
    }

    /// Configured mode, degraded to pattern-only without a generative path
    pub fn effective_mode(&self) -> QueryMode {
        if self.generative.is_none() {
            QueryMode::Pattern
        } else {
            self.config.mode
        }
    }

    pub fn validator(&self) -> &CypherValidator {
        &self.validator
    }

    pub fn analyze(&self, question: &str) -> ComplexityMetrics {
        analyze_question(question, &self.resolver)
    }

    /// Translate a question into a validated query. `mode` overrides the
    /// configured mode for this request only.
    pub async fn generate(&self, question: &str, mode: Option<QueryMode>) -> GenerationResult<GeneratedQuery> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GenerationError::EmptyQuestion);
        }

        let request_id = Uuid::new_v4().to_string();
        let mode = mode.unwrap_or_else(|| self.effective_mode());
        let span = info_span!("nlq_request", request_id = %request_id, mode = %mode);

        self.run(question, mode, request_id).instrument(span).await
    }

    async fn run(&self, question: &str, mode: QueryMode, request_id: String) -> GenerationResult<GeneratedQuery> {
        let start = Instant::now();
        let key = CacheKey::new(mode, question);

        if let Some(hit) = self.cache_lookup(&key) {
            debug!("Cache hit for question: {}", question);
            let mut record = MetricsRecord::new(hit.candidate.source, true, start.elapsed());
            record.fallback_used = hit.fallback_used;
            record.validation_passed = true;
            record.complexity_score = hit.validation.complexity_score;
            record.from_cache = true;
            self.metrics.record(record);

            return Ok(GeneratedQuery {
                request_id,
                candidate: hit.candidate,
                validation: hit.validation,
                mode,
                fallback_used: hit.fallback_used,
                from_cache: true,
            });
        }

        match self.resolve(question, mode).await {
            Ok(Resolution { strategy, candidate, validation, fallback_used }) => {
                let mut record = MetricsRecord::new(strategy, true, start.elapsed());
                record.fallback_used = fallback_used;
                record.validation_passed = true;
                record.complexity_score = validation.complexity_score;
                self.metrics.record(record);

                self.cache_store(key, &candidate, &validation, fallback_used);

                info!(
                    "Generated query via {} (fallback: {}, complexity: {})",
                    strategy, fallback_used, validation.complexity_score
                );
                Ok(GeneratedQuery {
                    request_id,
                    candidate,
                    validation,
                    mode,
                    fallback_used,
                    from_cache: false,
                })
            }
            Err(attempts) => {
                let strategy = attempts.last().map(|a| a.strategy).unwrap_or(Strategy::Pattern);
                let mut record = MetricsRecord::new(strategy, false, start.elapsed());
                record.fallback_used = attempts.len() > 1;
                if let Some(StrategyFailure { error: GenerationError::Invalid { outcome, .. }, .. }) = attempts.last() {
                    record.complexity_score = outcome.complexity_score;
                }
                self.metrics.record(record);

                Err(GenerationError::Exhausted { attempts })
            }
        }
    }

    /// Try the primary strategy, then at most one fallback. Touches neither
    /// the cache nor the metrics recorder.
    async fn resolve(&self, question: &str, mode: QueryMode) -> Result<Resolution, Vec<StrategyFailure>> {
        let mut strategy = self.primary_strategy(question, mode);
        let mut attempts: Vec<StrategyFailure> = Vec::new();

        loop {
            match self.attempt(strategy, question).await {
                Ok((candidate, validation)) => {
                    return Ok(Resolution {
                        strategy,
                        candidate,
                        validation,
                        fallback_used: !attempts.is_empty(),
                    });
                }
                Err(error) => {
                    warn!("{} strategy failed: {}", strategy, error);
                    attempts.push(StrategyFailure { strategy, error });

                    // Exactly one hop
                    if attempts.len() > 1 || !self.fallback_enabled(strategy) {
                        return Err(attempts);
                    }
                    strategy = strategy.other();
                    info!("Falling back to {} strategy", strategy);
                }
            }
        }
    }

    fn primary_strategy(&self, question: &str, mode: QueryMode) -> Strategy {
        match mode {
            QueryMode::Pattern => Strategy::Pattern,
            QueryMode::Generative => Strategy::Generative,
            QueryMode::Hybrid => {
                let metrics = self.analyze(question);
                let selected = select_strategy(&metrics, self.config.complexity_threshold);
                debug!(
                    "Selected {} strategy, question complexity {}",
                    selected,
                    metrics.complexity_score()
                );
                selected
            }
        }
    }

    fn fallback_enabled(&self, failed: Strategy) -> bool {
        match failed {
            Strategy::Pattern => self.config.pattern_fallback_enabled && self.generative.is_some(),
            Strategy::Generative => self.config.generative_fallback_enabled,
        }
    }

    /// Generate with one strategy and validate the result
    async fn attempt(
        &self,
        strategy: Strategy,
        question: &str,
    ) -> GenerationResult<(QueryCandidate, ValidationOutcome)> {
        let candidate = match strategy {
            Strategy::Pattern => self.pattern.generate(question).await?,
            Strategy::Generative => match &self.generative {
                Some(generative) => generative.generate(question).await?,
                None => {
                    return Err(GenerationError::Unavailable(
                        "no generative backend configured".to_string(),
                    ))
                }
            },
        };

        let validation = self.validator.validate(&candidate.query, &candidate.parameters);
        if !validation.is_valid {
            return Err(GenerationError::Invalid {
                strategy,
                candidate: Box::new(candidate),
                outcome: validation,
            });
        }
        for warning in &validation.warnings {
            debug!("Validation warning: {}", warning);
        }

        Ok((candidate, validation))
    }

    fn cache_lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Query cache unavailable, bypassing: {}", e);
                None
            }
        }
    }

    fn cache_store(&self, key: CacheKey, candidate: &QueryCandidate, validation: &ValidationOutcome, fallback_used: bool) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.insert(key, candidate.clone(), validation.clone(), fallback_used) {
                warn!("Failed to cache query: {}", e);
            }
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            match cache.clear() {
                Ok(()) => info!("Query cache cleared"),
                Err(e) => warn!("Failed to clear query cache: {}", e),
            }
        }
    }

    /// Invalidate schema text held by the strategies and every cached query
    pub fn refresh_schema(&self) {
        self.pattern.refresh();
        if let Some(generative) = &self.generative {
            generative.refresh();
        }
        self.clear_cache();
        info!("Schema refreshed");
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn metrics_summary(&self, last_n: Option<usize>) -> MetricsSummary {
        self.metrics.summary(last_n)
    }

    /// Run every question under each available mode. Diagnostic only: the
    /// query cache and the metrics recorder are left untouched.
    pub async fn compare_strategies(&self, questions: &[&str]) -> BTreeMap<QueryMode, ModeReport> {
        let mut modes = vec![QueryMode::Pattern];
        if self.has_generative() {
            modes.push(QueryMode::Generative);
            modes.push(QueryMode::Hybrid);
        }

        let mut reports = BTreeMap::new();
        for mode in modes {
            let mut report = ModeReport::default();
            let mut total_ms = 0.0;
            for question in questions {
                let start = Instant::now();
                let question = question.trim();
                let ok = !question.is_empty() && self.resolve(question, mode).await.is_ok();
                total_ms += start.elapsed().as_secs_f64() * 1000.0;
                report.total += 1;
                if ok {
                    report.succeeded += 1;
                }
            }
            if report.total > 0 {
                report.success_rate = report.succeeded as f64 / report.total as f64;
                report.avg_latency_ms = total_ms / report.total as f64;
            }
            reports.insert(mode, report);
        }
        reports
    }
}
