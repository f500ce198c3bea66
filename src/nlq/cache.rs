//! TTL-bounded cache of validated queries

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::types::{QueryCandidate, QueryMode};
use super::validator::ValidationOutcome;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    Poisoned,
    #[error("Refusing to cache a query that failed validation")]
    InvalidOutcome,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Resolution mode plus case-folded, trimmed question
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub mode: QueryMode,
    pub question: String,
}

impl CacheKey {
    pub fn new(mode: QueryMode, question: &str) -> Self {
        Self {
            mode,
            question: question.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub candidate: QueryCandidate,
    pub validation: ValidationOutcome,
    pub fallback_used: bool,
    /// `None` when the TTL reaches past what `Instant` can represent
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl QueryCache {
    /// A zero capacity is bumped to one entry
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, LruCache<CacheKey, CacheEntry>>> {
        self.entries.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Fresh entry for the key; an expired entry is evicted and reported as a miss
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        match entries.get(key).cloned() {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry)),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Store a validated candidate. Invalid outcomes are rejected.
    pub fn insert(
        &self,
        key: CacheKey,
        candidate: QueryCandidate,
        validation: ValidationOutcome,
        fallback_used: bool,
    ) -> CacheResult<()> {
        if !validation.is_valid {
            return Err(CacheError::InvalidOutcome);
        }

        let entry = CacheEntry {
            candidate,
            validation,
            fallback_used,
            expires_at: Instant::now().checked_add(self.ttl),
        };
        self.lock()?.put(key, entry);
        Ok(())
    }

    pub fn clear(&self) -> CacheResult<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Number of stored entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlq::types::{Parameters, Strategy};
    use crate::nlq::validator::ValidationErrorKind;

    fn candidate(query: &str) -> QueryCandidate {
        QueryCandidate::new(query, Parameters::new(), Strategy::Pattern).with_confidence(0.9)
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(
            CacheKey::new(QueryMode::Hybrid, "  Who WON  "),
            CacheKey::new(QueryMode::Hybrid, "who won")
        );
        assert_ne!(
            CacheKey::new(QueryMode::Hybrid, "who won"),
            CacheKey::new(QueryMode::Pattern, "who won")
        );
    }

    #[test]
    fn test_insert_and_get() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        let key = CacheKey::new(QueryMode::Pattern, "q");
        cache
            .insert(key.clone(), candidate("MATCH (n) RETURN n"), ValidationOutcome::valid(Vec::new(), 2), false)
            .unwrap();

        let entry = cache.get(&key).unwrap().unwrap();
        assert_eq!(entry.candidate.query, "MATCH (n) RETURN n");
        assert_eq!(entry.validation.complexity_score, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_outcome_rejected() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        let err = cache
            .insert(
                CacheKey::new(QueryMode::Pattern, "q"),
                candidate("MATCH (n) DELETE n"),
                ValidationOutcome::invalid(ValidationErrorKind::Security, "Dangerous operation detected: DELETE"),
                false,
            )
            .unwrap_err();
        assert_eq!(err, CacheError::InvalidOutcome);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let cache = QueryCache::new(10, Duration::from_millis(10));
        let key = CacheKey::new(QueryMode::Pattern, "q");
        cache
            .insert(key.clone(), candidate("MATCH (n) RETURN n"), ValidationOutcome::valid(Vec::new(), 2), false)
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&key).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let cache = QueryCache::new(10, Duration::MAX);
        let key = CacheKey::new(QueryMode::Pattern, "q");
        cache
            .insert(key.clone(), candidate("MATCH (n) RETURN n"), ValidationOutcome::valid(Vec::new(), 2), false)
            .unwrap();

        let entry = cache.get(&key).unwrap().unwrap();
        assert!(entry.expires_at.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_and_clear() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        for q in ["a", "b", "c"] {
            cache
                .insert(
                    CacheKey::new(QueryMode::Pattern, q),
                    candidate("MATCH (n) RETURN n"),
                    ValidationOutcome::valid(Vec::new(), 2),
                    false,
                )
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new(QueryMode::Pattern, "a")).unwrap().is_none());

        cache.clear().unwrap();
        assert!(cache.is_empty());
    }
}
