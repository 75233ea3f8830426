//! In-memory vector index shared by the ingestion and query paths.
//!
//! Entries live in insertion order inside a `VecDeque` behind a
//! `std::sync::RwLock`. Writers (insert + retention eviction) take the write
//! guard; a query scores every entry under a single read guard, so it sees a
//! point-in-time view and never a half-written entry. Guards are never held
//! across an `.await`: every method here is synchronous.
//!
//! Search is a brute-force linear scan, `O(n·d)`. The corpus is bounded by
//! the retention cap and the feed's ingestion rate, which keeps `n` in the
//! tens of thousands at most.

use std::collections::{HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::embedding::{dot, l2_normalize};
use crate::models::{Document, ScoredDocument};

/// How query vectors are compared against stored vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Dot product of L2-normalized vectors.
    #[default]
    Cosine,
    /// Raw dot product; for providers that already emit unit vectors.
    InnerProduct,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    #[error("vector dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot index an empty vector")]
    EmptyVector,
}

/// Result of [`VectorIndex::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An entry with the same document id was already present; nothing changed.
    Duplicate,
}

/// Construction options for a [`VectorIndex`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub metric: SimilarityMetric,
    /// Retention cap. Oldest entries are evicted first once exceeded.
    pub max_entries: Option<usize>,
    /// Fix the dimension up front. Otherwise the first insert decides it.
    pub dimension: Option<usize>,
}

struct IndexEntry {
    document: Document,
    vector: Vec<f32>,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<IndexEntry>,
    ids: HashSet<String>,
    next_seq: u64,
    dimension: Option<usize>,
    evicted: u64,
}

/// Append-only, thread-safe collection of (document, vector) pairs.
pub struct VectorIndex {
    inner: RwLock<Inner>,
    metric: SimilarityMetric,
    max_entries: Option<usize>,
}

impl VectorIndex {
    /// An unbounded cosine index whose dimension is set by the first insert.
    pub fn new() -> Self {
        Self::with_options(IndexOptions::default())
    }

    pub fn with_options(options: IndexOptions) -> Self {
        Self {
            inner: RwLock::new(Inner {
                dimension: options.dimension,
                ..Inner::default()
            }),
            metric: options.metric,
            max_entries: options.max_entries,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a document unless its id is already indexed.
    ///
    /// Re-inserting an existing id is a no-op that reports
    /// [`InsertOutcome::Duplicate`]; the stored entry is left untouched.
    /// When a retention cap is configured, the oldest entries are evicted
    /// under the same write guard.
    pub fn insert(
        &self,
        document: Document,
        vector: Vec<f32>,
    ) -> Result<InsertOutcome, IndexError> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        let stored = match self.metric {
            SimilarityMetric::Cosine => l2_normalize(&vector),
            SimilarityMetric::InnerProduct => vector,
        };

        let mut inner = self.write();
        if inner.ids.contains(&document.id) {
            return Ok(InsertOutcome::Duplicate);
        }
        match inner.dimension {
            Some(expected) if expected != stored.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: stored.len(),
                });
            }
            Some(_) => {}
            None => inner.dimension = Some(stored.len()),
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.ids.insert(document.id.clone());
        inner.entries.push_back(IndexEntry {
            document,
            vector: stored,
            seq,
        });

        if let Some(cap) = self.max_entries {
            while inner.entries.len() > cap {
                if let Some(old) = inner.entries.pop_front() {
                    inner.ids.remove(&old.document.id);
                    inner.evicted += 1;
                    debug!(id = %old.document.id, "evicted oldest index entry");
                }
            }
        }

        Ok(InsertOutcome::Inserted)
    }

    /// Return the `k` entries most similar to `vector`, best first.
    ///
    /// Equal scores are ordered by insertion, earliest first. An empty index
    /// (or `k == 0`) yields an empty result.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredDocument>, IndexError> {
        let probe = match self.metric {
            SimilarityMetric::Cosine => l2_normalize(vector),
            SimilarityMetric::InnerProduct => vector.to_vec(),
        };

        let inner = self.read();
        if k == 0 || inner.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = inner.dimension {
            if expected != probe.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: probe.len(),
                });
            }
        }

        let mut scored: Vec<(f32, u64, usize)> = inner
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (dot(&probe, &entry.vector), entry.seq, pos))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, _, pos)| ScoredDocument {
                document: inner.entries[pos].document.clone(),
                score,
            })
            .collect())
    }

    /// Current number of entries.
    pub fn size(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().ids.contains(id)
    }

    /// Up to `limit` documents, most recently inserted first.
    pub fn recent(&self, limit: usize) -> Vec<Document> {
        self.read()
            .entries
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.document.clone())
            .collect()
    }

    /// Vector dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.read().dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Number of entries dropped by the retention cap so far.
    pub fn evicted(&self) -> u64 {
        self.read().evicted
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}
