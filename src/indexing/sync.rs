//! Keeps the vector index in lockstep with the metadata store.
//!
//! Every mutation goes through [`SyncEngine`], which is owned by the single
//! indexing worker. A file update writes the store first (one transaction per
//! file) and then swaps the file's ids in the index under one write guard, so
//! queries observe either the old or the new state of a file.

use crate::core::error::{Error, Result};
use crate::indexing::discovery::{discover_all, discover_files, path_key};
use crate::indexing::events::{FileEvent, IndexEvent, Notifier};
use crate::indexing::extractor::Extractor;
use crate::search::model::Embedder;
use crate::storage::index::VectorIndex;
use crate::storage::metadata::{ChunkId, MetadataStore};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a single-file update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing written
    Skipped,
    /// Content unchanged; only the watermark moved
    Touched,
    Indexed { chunks: usize },
    Removed { chunks: usize },
}

/// Summary of a batch of updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub processed: usize,
    pub indexed: usize,
    pub touched: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failed: usize,
    /// The index was rebuilt from the store
    pub rebuilt: bool,
}

impl SyncReport {
    fn record(&mut self, path: &Path, result: Result<UpdateOutcome>) {
        self.processed += 1;
        match result {
            Ok(UpdateOutcome::Skipped) => self.skipped += 1,
            Ok(UpdateOutcome::Touched) => self.touched += 1,
            Ok(UpdateOutcome::Indexed { .. }) => self.indexed += 1,
            Ok(UpdateOutcome::Removed { .. }) => self.removed += 1,
            Err(e) => {
                tracing::warn!("Failed to sync {}: {}", path.display(), e);
                self.failed += 1;
            }
        }
    }

    fn merge(&mut self, other: SyncReport) {
        self.processed += other.processed;
        self.indexed += other.indexed;
        self.touched += other.touched;
        self.skipped += other.skipped;
        self.removed += other.removed;
        self.failed += other.failed;
        self.rebuilt |= other.rebuilt;
    }
}

/// Engine for synchronizing files to the store and the index
pub struct SyncEngine {
    store: Arc<MetadataStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    notifier: Notifier,
    needs_rebuild: bool,
}

impl SyncEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            extractor,
            notifier,
            needs_rebuild: false,
        }
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    /// Whether the index must be rebuilt before it can be trusted again
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Bring one file's chunks up to date.
    ///
    /// Without `force`, a file whose mtime is not newer than the stored
    /// watermark is skipped without any write, and a file whose content hash
    /// is unchanged only gets its watermark bumped.
    pub fn update_file(&mut self, path: &Path, force: bool) -> Result<UpdateOutcome> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.remove_file(path),
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Ok(UpdateOutcome::Skipped);
        }

        let key = path_key(path);
        let mtime = modified_secs(&metadata)?;
        let stored = self.store.file_entry(&key)?;

        if !force {
            if let Some(entry) = &stored {
                if mtime <= entry.last_modified {
                    return Ok(UpdateOutcome::Skipped);
                }
            }
        }

        if !self.extractor.is_indexable(path) {
            return match stored {
                Some(_) => self.remove_file(path),
                None => Ok(UpdateOutcome::Skipped),
            };
        }

        let hash = calculate_file_hash(path)?;
        if !force {
            if let Some(entry) = &stored {
                if entry.content_hash.as_deref() == Some(hash.as_str()) {
                    self.store.touch(&key, mtime)?;
                    tracing::debug!("Unchanged content, bumped watermark: {}", key);
                    return Ok(UpdateOutcome::Touched);
                }
            }
        }

        let text = self.extractor.extract(path)?;
        let vectors = if text.trim().is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&text)?
        };

        if vectors.is_empty() && stored.is_none() {
            return Ok(UpdateOutcome::Skipped);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.index.dimension()) {
            return Err(Error::Embedding(format!(
                "Embedder returned {} components, expected {}",
                bad.len(),
                self.index.dimension()
            )));
        }

        let outcome = self.store.upsert_chunks(&key, &vectors, mtime, Some(&hash))?;
        if let Err(e) = self.index.replace(&outcome.removed, &outcome.ids, &vectors) {
            self.needs_rebuild = true;
            return Err(e);
        }

        if vectors.is_empty() {
            tracing::debug!("Pruned {} chunks of emptied file {}", outcome.removed.len(), key);
            self.notifier.notify(IndexEvent::FileRemoved { path: key });
            Ok(UpdateOutcome::Removed {
                chunks: outcome.removed.len(),
            })
        } else {
            tracing::debug!("Indexed {} ({} chunks)", key, outcome.ids.len());
            self.notifier.notify(IndexEvent::FileIndexed {
                path: key,
                chunks: outcome.ids.len(),
            });
            Ok(UpdateOutcome::Indexed {
                chunks: outcome.ids.len(),
            })
        }
    }

    /// Remove a file, or every stored file below a directory, from the store and the index
    pub fn remove_file(&mut self, path: &Path) -> Result<UpdateOutcome> {
        let key = path_key(path);
        let mut targets = vec![key.clone()];
        targets.extend(self.store.files_under(&key)?);

        let mut total = 0;
        for file in targets {
            let removed = self.store.delete_file(&file)?;
            if removed.is_empty() {
                continue;
            }
            self.remove_from_index(&removed)?;
            total += removed.len();
            tracing::debug!("Removed {} ({} chunks)", file, removed.len());
            self.notifier.notify(IndexEvent::FileRemoved { path: file });
        }

        if total == 0 {
            Ok(UpdateOutcome::Skipped)
        } else {
            Ok(UpdateOutcome::Removed { chunks: total })
        }
    }

    /// Apply one file-system event
    pub fn handle_event(&mut self, event: FileEvent) -> SyncReport {
        let mut report = SyncReport::default();
        match event {
            FileEvent::Created(path) | FileEvent::Modified(path) => {
                self.update_path(&path, &mut report);
            }
            FileEvent::Deleted(path) => {
                let result = self.remove_file(&path);
                report.record(&path, result);
            }
            FileEvent::Moved { from, to } => {
                let result = self.remove_file(&from);
                report.record(&from, result);
                self.update_path(&to, &mut report);
            }
        }
        report
    }

    /// Files are force-updated; a directory has its tree synced against the watermarks
    fn update_path(&mut self, path: &Path, report: &mut SyncReport) {
        if path.is_dir() {
            let files = match discover_files(path, self.extractor.as_ref()) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!("Failed to walk {}: {}", path.display(), e);
                    report.failed += 1;
                    return;
                }
            };
            for file in files {
                let result = self.update_file(&file, false);
                report.record(&file, result);
            }
        } else {
            let result = self.update_file(path, true);
            report.record(path, result);
        }
    }

    /// Drop everything and re-embed every indexable file under `directories`
    pub fn full_rescan(&mut self, directories: &[PathBuf]) -> Result<SyncReport> {
        tracing::info!("Full rescan of {} directories", directories.len());
        self.store.clear()?;
        if let Err(e) = self.index.reset() {
            self.needs_rebuild = true;
            return Err(e);
        }
        self.needs_rebuild = false;

        let mut report = SyncReport::default();
        for file in discover_all(directories, self.extractor.as_ref()) {
            let result = self.update_file(&file, true);
            report.record(&file, result);
        }

        tracing::info!(
            "Full rescan done: {} indexed, {} failed",
            report.indexed,
            report.failed
        );
        self.notifier.notify(IndexEvent::RescanCompleted);
        Ok(report)
    }

    /// Repair the index if needed, then sync the store with what is on disk
    pub fn reconcile(&mut self, roots: &[PathBuf]) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if self.needs_rebuild || !self.index_matches_store()? {
            self.rebuild_index()?;
            report.rebuilt = true;
        }

        let on_disk = discover_all(roots, self.extractor.as_ref());
        let on_disk_keys: BTreeSet<String> = on_disk.iter().map(|p| path_key(p)).collect();

        let mut stale = SyncReport::default();
        for stored in self.store.list_distinct_files()? {
            if !on_disk_keys.contains(&stored) {
                let path = PathBuf::from(&stored);
                let result = self.remove_file(&path);
                stale.record(&path, result);
            }
        }
        report.merge(stale);

        for file in &on_disk {
            let result = self.update_file(file, false);
            report.record(file, result);
        }

        tracing::info!(
            "Reconciled: {} indexed, {} touched, {} removed, {} failed",
            report.indexed,
            report.touched,
            report.removed,
            report.failed
        );
        self.notifier.notify(IndexEvent::Reconciled);
        Ok(report)
    }

    /// Reload the index from the store
    pub fn rebuild_index(&mut self) -> Result<usize> {
        let loaded = self.index.rebuild(self.store.load_all()?)?;
        self.needs_rebuild = false;
        tracing::info!("Rebuilt vector index with {} chunks", loaded);
        self.notifier.notify(IndexEvent::IndexRebuilt);
        Ok(loaded)
    }

    /// Whether the index holds exactly the store's ids
    pub fn index_matches_store(&self) -> Result<bool> {
        let stored = self.store.chunk_ids()?;
        let indexed = self.index.ids()?;
        Ok(stored.len() == indexed.len() && stored.into_iter().eq(indexed))
    }

    fn remove_from_index(&mut self, ids: &[ChunkId]) -> Result<()> {
        if let Err(e) = self.index.remove(ids) {
            self.needs_rebuild = true;
            return Err(e);
        }
        Ok(())
    }
}

/// Calculate SHA256 hash of file contents
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Get file modification time as fractional Unix seconds
pub fn file_modified_time(path: &Path) -> Result<f64> {
    modified_secs(&std::fs::metadata(path)?)
}

fn modified_secs(metadata: &std::fs::Metadata) -> Result<f64> {
    let modified = metadata.modified()?;
    let duration = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to get modification time: {}", e),
            ))
        })?;
    Ok(duration.as_secs_f64())
}
