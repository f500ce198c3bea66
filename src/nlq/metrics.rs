//! Per-request metrics in a bounded ring buffer

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::types::Strategy;

/// One request's outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRecord {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Strategy that produced the final answer, or the last one tried
    pub strategy: Strategy,
    pub success: bool,
    pub latency: Duration,
    pub fallback_used: bool,
    pub validation_passed: bool,
    pub complexity_score: u32,
    pub from_cache: bool,
}

impl MetricsRecord {
    pub fn new(strategy: Strategy, success: bool, latency: Duration) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            strategy,
            success,
            latency,
            fallback_used: false,
            validation_passed: false,
            complexity_score: 0,
            from_cache: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyStats {
    pub count: usize,
    pub success_count: usize,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub success_count: usize,
    pub success_rate: f64,
    pub fallback_count: usize,
    pub fallback_rate: f64,
    pub cache_hits: usize,
    pub avg_latency_ms: f64,
    pub strategies: BTreeMap<Strategy, StrategyStats>,
}

pub struct MetricsRecorder {
    records: Mutex<VecDeque<MetricsRecord>>,
    capacity: usize,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated, so
    // the data is still usable after poisoning.
    fn lock(&self) -> MutexGuard<'_, VecDeque<MetricsRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record, evicting the oldest past capacity
    pub fn record(&self, record: MetricsRecord) {
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the history, oldest first
    pub fn snapshot(&self) -> Vec<MetricsRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Aggregate over the whole history, or only the newest `last_n` records
    pub fn summary(&self, last_n: Option<usize>) -> MetricsSummary {
        let records = self.lock();
        let skip = match last_n {
            Some(n) => records.len().saturating_sub(n),
            None => 0,
        };
        summarize(records.iter().skip(skip))
    }
}

fn avg_ms(total: Duration, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}

fn summarize<'a>(records: impl Iterator<Item = &'a MetricsRecord>) -> MetricsSummary {
    let mut summary = MetricsSummary::default();
    let mut total_latency = Duration::ZERO;
    let mut per_strategy: BTreeMap<Strategy, (usize, usize, Duration)> = BTreeMap::new();

    for r in records {
        summary.total += 1;
        total_latency += r.latency;
        if r.success {
            summary.success_count += 1;
        }
        if r.fallback_used {
            summary.fallback_count += 1;
        }
        if r.from_cache {
            summary.cache_hits += 1;
        }

        let entry = per_strategy.entry(r.strategy).or_default();
        entry.0 += 1;
        if r.success {
            entry.1 += 1;
        }
        entry.2 += r.latency;
    }

    if summary.total > 0 {
        summary.success_rate = summary.success_count as f64 / summary.total as f64;
        summary.fallback_rate = summary.fallback_count as f64 / summary.total as f64;
    }
    summary.avg_latency_ms = avg_ms(total_latency, summary.total);
    summary.strategies = per_strategy
        .into_iter()
        .map(|(strategy, (count, success_count, latency))| {
            (
                strategy,
                StrategyStats {
                    count,
                    success_count,
                    avg_latency_ms: avg_ms(latency, count),
                },
            )
        })
        .collect();

    summary
}
