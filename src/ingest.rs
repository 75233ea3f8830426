//! Continuous ingestion: feed → embeddings → vector index.
//!
//! One background task repeats a cycle every `feed.poll_interval_secs`:
//!
//! ```text
//! poll feed ──▶ new documents ──▶ embed (N in flight) ──▶ insert, in feed order
//!     │                                  │
//!     └─ FeedError: log, next cycle      └─ EmbeddingError: log, skip, forget id
//! ```
//!
//! A failing poll or a failing document never ends the loop. The index
//! lock is only taken inside [`VectorIndex::insert`], which is synchronous,
//! so queries keep being served while a cycle waits on the network.
//!
//! # States
//!
//! ```text
//! Stopped ─start─▶ Starting ─▶ Polling ⇄ Embedding
//!    ▲                            │
//!    └──────── Stopping ◀──stop───┘
//! ```
//!
//! Stopping cancels the inter-poll sleep. A cycle already in progress runs
//! to completion; every call inside it is bounded by a timeout.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use newsdesk_core::index::{InsertOutcome, VectorIndex};

use crate::connector_news::FeedConnector;
use crate::embedding::EmbeddingProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum IngestState {
    Stopped = 0,
    Starting = 1,
    Polling = 2,
    Embedding = 3,
    Stopping = 4,
}

impl IngestState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IngestState::Starting,
            2 => IngestState::Polling,
            3 => IngestState::Embedding,
            4 => IngestState::Stopping,
            _ => IngestState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Stopped => "stopped",
            IngestState::Starting => "starting",
            IngestState::Polling => "polling",
            IngestState::Embedding => "embedding",
            IngestState::Stopping => "stopping",
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub query: Option<String>,
    pub fetched: usize,
    pub new_documents: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub embed_failures: usize,
    pub index_failures: usize,
    pub poll_error: Option<String>,
    pub index_size: usize,
}

/// Totals since the process started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub cycles: u64,
    pub poll_failures: u64,
    pub fetched: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub embed_failures: u64,
    pub index_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A single ingestion cycle and the state it reports.
pub struct IngestPipeline {
    connector: Arc<FeedConnector>,
    processor: Arc<EmbeddingProcessor>,
    index: Arc<VectorIndex>,
    concurrency: usize,
    state: AtomicU8,
    stats: Mutex<IngestStats>,
}

impl IngestPipeline {
    pub fn new(
        connector: Arc<FeedConnector>,
        processor: Arc<EmbeddingProcessor>,
        index: Arc<VectorIndex>,
        concurrency: usize,
    ) -> Self {
        Self {
            connector,
            processor,
            index,
            concurrency: concurrency.max(1),
            state: AtomicU8::new(IngestState::Stopped as u8),
            stats: Mutex::new(IngestStats::default()),
        }
    }

    pub fn state(&self) -> IngestState {
        IngestState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: IngestState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move to `state` unless a stop is in progress.
    fn advance(&self, state: IngestState) {
        let _ = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            if current == IngestState::Stopping as u8 {
                None
            } else {
                Some(state as u8)
            }
        });
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Poll once, embed what is new, and insert it.
    ///
    /// Never fails: problems are logged and reported in the [`CycleReport`].
    pub async fn run_cycle(&self) -> CycleReport {
        let resting = match self.state() {
            IngestState::Stopped => IngestState::Stopped,
            _ => IngestState::Polling,
        };
        self.advance(IngestState::Polling);
        let mut report = CycleReport::default();

        let batch = match self.connector.poll_once().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "news feed poll failed; retrying next cycle");
                report.poll_error = Some(e.to_string());
                report.index_size = self.index.size();
                self.record(&report);
                self.advance(resting);
                return report;
            }
        };
        report.query = Some(batch.query.clone());
        report.fetched = batch.fetched;
        report.new_documents = batch.documents.len();

        if !batch.documents.is_empty() {
            self.advance(IngestState::Embedding);
        }

        let processor = &self.processor;
        let mut embedded = stream::iter(batch.documents)
            .map(|document| async move {
                let result = processor.embed_document(&document).await;
                (document, result)
            })
            .buffered(self.concurrency);

        while let Some((document, result)) = embedded.next().await {
            let id = document.id.clone();
            let vector = match result {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping document: embedding failed");
                    report.embed_failures += 1;
                    self.connector.forget(&id);
                    continue;
                }
            };
            match self.index.insert(document, vector) {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,
                Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping document: index rejected vector");
                    report.index_failures += 1;
                    self.connector.forget(&id);
                }
            }
        }

        report.index_size = self.index.size();
        info!(
            fetched = report.fetched,
            new = report.new_documents,
            inserted = report.inserted,
            duplicates = report.duplicates,
            embed_failures = report.embed_failures,
            index_size = report.index_size,
            "ingestion cycle complete"
        );
        self.record(&report);
        self.advance(resting);
        report
    }

    fn record(&self, report: &CycleReport) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.cycles += 1;
        stats.fetched += report.fetched as u64;
        stats.inserted += report.inserted as u64;
        stats.duplicates += report.duplicates as u64;
        stats.embed_failures += report.embed_failures as u64;
        stats.index_failures += report.index_failures as u64;
        stats.last_cycle_at = Some(Utc::now());
        if let Some(e) = &report.poll_error {
            stats.poll_failures += 1;
            stats.last_error = Some(e.clone());
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the background task that repeats [`IngestPipeline::run_cycle`].
pub struct Ingestion {
    pipeline: Arc<IngestPipeline>,
    interval: Duration,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl Ingestion {
    pub fn new(pipeline: Arc<IngestPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    /// Spawn the loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return false;
        }

        self.pipeline.set_state(IngestState::Starting);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.pipeline),
            self.interval,
            cancel.clone(),
        ));
        *worker = Some(Worker { cancel, handle });
        info!(interval_secs = self.interval.as_secs(), "ingestion started");
        true
    }

    /// Stop the loop and wait for it to exit. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let mut worker = self.worker.lock().await;
        let Some(Worker { cancel, handle }) = worker.take() else {
            return false;
        };

        self.pipeline.set_state(IngestState::Stopping);
        cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "ingestion task ended abnormally");
        }
        self.pipeline.set_state(IngestState::Stopped);
        info!("ingestion stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }
}

async fn run_loop(pipeline: Arc<IngestPipeline>, interval: Duration, cancel: CancellationToken) {
    pipeline.advance(IngestState::Polling);
    while !cancel.is_cancelled() {
        pipeline.run_cycle().await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
