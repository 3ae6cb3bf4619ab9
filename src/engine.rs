//! Wires the store, the index and both workers together.

use crate::core::config::Config;
use crate::core::error::Result;
use crate::indexing::events::{FileEvent, IndexEvent, Notifier};
use crate::indexing::extractor::Extractor;
use crate::indexing::sync::SyncEngine;
use crate::indexing::worker::IndexWorker;
use crate::search::model::Embedder;
use crate::search::query::{QueryHandle, QueryWorker, Searcher};
use crate::storage::index::VectorIndex;
use crate::storage::metadata::MetadataStore;
use crate::ui::watch::FileWatcher;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// First indexing pass queued when the engine opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Sync the configured directories against the store
    #[default]
    Reconcile,
    /// Drop everything and re-embed the configured directories
    FullRescan,
    /// Serve the stored corpus as is
    Idle,
}

pub struct Engine {
    // Field order is drop order: stop feeding events before stopping the workers
    watcher: Option<FileWatcher>,
    queries: QueryWorker,
    indexer: IndexWorker,
    notifier: Notifier,
    store: Arc<MetadataStore>,
    index: Arc<VectorIndex>,
    config: Config,
}

impl Engine {
    pub fn open(
        config: Config,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        Self::open_with(config, embedder, extractor, StartMode::default())
    }

    pub fn open_with(
        config: Config,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        mode: StartMode,
    ) -> Result<Self> {
        let store = Arc::new(MetadataStore::open(&config)?);

        let fingerprint = format!("{}:{}", embedder.model_id(), embedder.dimension());
        match store.model_fingerprint()? {
            Some(previous) if previous == fingerprint => {}
            Some(previous) => {
                tracing::warn!(
                    "Embedding model changed ({} -> {}), discarding stored vectors",
                    previous,
                    fingerprint
                );
                store.clear()?;
                store.set_model_fingerprint(&fingerprint)?;
            }
            None => store.set_model_fingerprint(&fingerprint)?,
        }

        // The index is derived state: rebuild it before any query is served
        let index = Arc::new(VectorIndex::new(
            embedder.dimension(),
            config.settings.metric,
        ));
        let loaded = index.rebuild(store.load_all()?)?;
        tracing::info!(
            "Loaded {} chunks from {}",
            loaded,
            config.store_path.display()
        );

        let notifier = Notifier::new();
        let sync = SyncEngine::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            extractor,
            notifier.clone(),
        );
        let roots = config.settings.directories.clone();
        let indexer = IndexWorker::spawn(sync, roots.clone(), config.rescan_interval())?;
        let queries = QueryWorker::spawn(Searcher::new(store.clone(), index.clone(), embedder))?;

        match mode {
            StartMode::Reconcile => indexer.handle().reconcile()?,
            StartMode::FullRescan => indexer.handle().full_rescan(roots)?,
            StartMode::Idle => {}
        }

        Ok(Self {
            watcher: None,
            queries,
            indexer,
            notifier,
            store,
            index,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Receive a notification for every change to the searchable corpus
    pub fn subscribe(&self) -> Receiver<IndexEvent> {
        self.notifier.subscribe()
    }

    /// Queue a full rebuild of `directories`; queries keep running on partial results meanwhile
    pub fn force_full_rescan(&self, directories: Vec<PathBuf>) -> Result<()> {
        self.indexer.handle().full_rescan(directories)
    }

    pub fn reconcile(&self) -> Result<()> {
        self.indexer.handle().reconcile()
    }

    pub fn send_event(&self, event: FileEvent) -> Result<()> {
        self.indexer.handle().send_event(event)
    }

    /// Block until every queued indexing command has been applied
    pub fn wait_idle(&self) -> Result<()> {
        self.indexer.handle().wait_idle()
    }

    /// Start a query, cancelling the previous one
    pub fn submit_query(&self, text: impl Into<String>, top_n: Option<usize>) -> QueryHandle {
        self.queries.submit(text, top_n)
    }

    /// Watch the configured directories and feed changes to the indexing worker
    pub fn watch(&mut self) -> Result<()> {
        if self.watcher.is_none() {
            let watcher = FileWatcher::start(
                &self.config.settings.directories,
                self.config.debounce(),
                self.indexer.handle(),
            )?;
            self.watcher = Some(watcher);
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop watching, cancel queries and let the indexing worker finish its queue
    pub fn shutdown(self) {
        let Engine {
            watcher,
            queries,
            indexer,
            ..
        } = self;
        drop(watcher);
        drop(queries);
        indexer.shutdown();
    }
}
