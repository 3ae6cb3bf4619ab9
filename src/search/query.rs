//! Query engine: one logical query at a time.
//!
//! Every submission takes a new generation from a shared counter; a query
//! whose generation is no longer the latest is cancelled. Cancellation is
//! observed before embedding, before the index search and at every walked hit,
//! and a cancelled query never yields a partial list.

use crate::core::error::Result;
use crate::search::model::Embedder;
use crate::storage::index::VectorIndex;
use crate::storage::metadata::MetadataStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Chunks fetched per requested file, so files with many close chunks
/// do not crowd out the rest after deduplication
pub const OVERSCAN_FACTOR: usize = 5;

/// One ranked file
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub file_path: String,
    /// Distance of the file's closest chunk
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Completed(Vec<SearchHit>),
    /// Superseded by a newer query
    Cancelled,
    Failed(String),
}

/// Cancellation token: live while the shared counter still equals its generation
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl CancelToken {
    /// A token nothing can cancel
    pub fn never() -> Self {
        Self {
            generation: 0,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.generation
    }
}

/// Issues tokens; issuing one cancels every earlier token
#[derive(Debug, Clone, Default)]
pub struct Generations {
    latest: Arc<AtomicU64>,
}

impl Generations {
    pub fn next(&self) -> CancelToken {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        CancelToken {
            generation,
            latest: self.latest.clone(),
        }
    }
}

/// Runs a single search against the shared store and index
pub struct Searcher {
    store: Arc<MetadataStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Searcher {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
        }
    }

    /// Rank files for `text`. `top_n = None` ranks every indexed file.
    pub fn search(&self, text: &str, top_n: Option<usize>, token: &CancelToken) -> QueryOutcome {
        match self.try_search(text, top_n, token) {
            Ok(Some(hits)) => QueryOutcome::Completed(hits),
            Ok(None) => {
                tracing::debug!("Query {} cancelled", token.generation());
                QueryOutcome::Cancelled
            }
            Err(e) => {
                tracing::warn!("Query failed: {}", e);
                QueryOutcome::Failed(e.to_string())
            }
        }
    }

    /// `Ok(None)` when cancelled
    fn try_search(
        &self,
        text: &str,
        top_n: Option<usize>,
        token: &CancelToken,
    ) -> Result<Option<Vec<SearchHit>>> {
        if token.is_cancelled() {
            return Ok(None);
        }

        let (top_n, overscan) = match top_n {
            Some(n) => (n, n.saturating_mul(OVERSCAN_FACTOR)),
            None => {
                let files = self.store.file_count()?;
                (files, files)
            }
        };
        if top_n == 0 {
            return Ok(Some(Vec::new()));
        }

        let query = self.embedder.embed_query(text)?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let neighbors = self.index.search(&query, overscan)?;
        tracing::debug!("{} candidate chunks for {} files", neighbors.len(), top_n);

        let mut seen = HashSet::new();
        let mut hits = Vec::with_capacity(top_n.min(neighbors.len()));
        for neighbor in neighbors {
            if token.is_cancelled() {
                return Ok(None);
            }
            let file_path = match self.store.file_path_of(neighbor.id)? {
                Some(path) => path,
                None => {
                    // Removed between the index search and now
                    tracing::debug!("Skipping unresolved chunk {}", neighbor.id);
                    continue;
                }
            };
            if seen.insert(file_path.clone()) {
                hits.push(SearchHit {
                    file_path,
                    distance: neighbor.distance,
                });
                if hits.len() == top_n {
                    break;
                }
            }
        }

        Ok(Some(hits))
    }
}

struct QueryJob {
    text: String,
    top_n: Option<usize>,
    token: CancelToken,
    reply: Sender<QueryOutcome>,
}

/// Pending result of a submitted query
pub struct QueryHandle {
    token: CancelToken,
    rx: Receiver<QueryOutcome>,
}

impl QueryHandle {
    pub fn generation(&self) -> u64 {
        self.token.generation()
    }

    /// Whether a newer query has been submitted since this one
    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Block until the query finishes. A superseded query reports `Cancelled`
    /// even if the worker completed it.
    pub fn wait(self) -> QueryOutcome {
        let outcome = self
            .rx
            .recv()
            .unwrap_or_else(|_| QueryOutcome::Failed("Query worker has stopped".to_string()));
        if self.token.is_cancelled() {
            QueryOutcome::Cancelled
        } else {
            outcome
        }
    }
}

/// Worker thread answering queries, newest first
pub struct QueryWorker {
    tx: Option<Sender<QueryJob>>,
    generations: Generations,
    thread: Option<JoinHandle<()>>,
}

impl QueryWorker {
    pub fn spawn(searcher: Searcher) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("semfind-query".to_string())
            .spawn(move || run(searcher, rx))?;

        Ok(Self {
            tx: Some(tx),
            generations: Generations::default(),
            thread: Some(thread),
        })
    }

    /// Submit a query, cancelling every earlier one
    pub fn submit(&self, text: impl Into<String>, top_n: Option<usize>) -> QueryHandle {
        let token = self.generations.next();
        let (reply, rx) = mpsc::channel();
        let job = QueryJob {
            text: text.into(),
            top_n,
            token: token.clone(),
            reply,
        };

        match &self.tx {
            Some(tx) => {
                if let Err(mpsc::SendError(job)) = tx.send(job) {
                    let _ = job
                        .reply
                        .send(QueryOutcome::Failed("Query worker has stopped".to_string()));
                }
            }
            None => {
                let _ = job
                    .reply
                    .send(QueryOutcome::Failed("Query worker has stopped".to_string()));
            }
        }

        QueryHandle { token, rx }
    }

    /// Cancel the in-flight query without submitting a new one
    pub fn cancel(&self) {
        self.generations.next();
    }
}

impl Drop for QueryWorker {
    fn drop(&mut self) {
        self.cancel();
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Query worker panicked");
            }
        }
    }
}

fn run(searcher: Searcher, rx: Receiver<QueryJob>) {
    while let Ok(mut job) = rx.recv() {
        // Only the newest pending job is worth running
        while let Ok(newer) = rx.try_recv() {
            let _ = job.reply.send(QueryOutcome::Cancelled);
            job = newer;
        }
        let outcome = searcher.search(&job.text, job.top_n, &job.token);
        let _ = job.reply.send(outcome);
    }
}
