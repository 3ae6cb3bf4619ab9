// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
}

// Persistent metadata and the derived vector index
pub mod storage {
    pub mod index;
    pub mod metadata;
}

// Indexing pipeline
pub mod indexing {
    pub mod discovery;
    pub mod events;
    pub mod extractor;
    pub mod sync;
    pub mod worker;
}

// Search & ML
pub mod search {
    pub mod model;
    pub mod query;
}

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod watch;
}

pub mod engine;

pub use ui::cli;

// Re-export commonly used types
pub use core::config::{Config, Settings};
pub use core::error::{Error, Result};
pub use engine::{Engine, StartMode};
pub use indexing::discovery::{discover_all, discover_files};
pub use indexing::events::{FileEvent, IndexEvent, Notifier};
pub use indexing::extractor::{Extractor, TextExtractor};
pub use indexing::sync::{calculate_file_hash, file_modified_time, SyncEngine, SyncReport, UpdateOutcome};
pub use indexing::worker::{IndexCommand, IndexWorker, IndexerHandle};
pub use search::model::{BertEmbedder, Embedder};
pub use search::query::{CancelToken, QueryHandle, QueryOutcome, QueryWorker, SearchHit, Searcher};
pub use storage::index::{Metric, Neighbor, VectorIndex};
pub use storage::metadata::{ChunkId, FileEntry, MetadataStore, UpsertOutcome};
pub use ui::watch::FileWatcher;
