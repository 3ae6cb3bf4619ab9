use crate::core::config::Config;
use crate::core::error::{db_err, Error, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Globally unique chunk identifier. Issued from a persisted counter and never reused.
pub type ChunkId = u64;

/// Key: chunk id, Value: JSON serialized ChunkRecord
const CHUNKS_TABLE: TableDefinition<u64, &str> = TableDefinition::new("chunks");
/// Key: chunk id, Value: little-endian f32 components
const EMBEDDINGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("embeddings");
/// Key: file path, Value: JSON serialized FileEntry
const FILES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("files");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const NEXT_CHUNK_ID_KEY: &str = "next_chunk_id";
// Used to detect embedding model changes and force re-index.
const MODEL_FINGERPRINT_KEY: &str = "model_fingerprint";

/// Persisted metadata of one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub file_path: String,
    pub chunk_index: u32,
    /// File modification time (Unix seconds) when the chunk was written
    pub last_modified: f64,
}

/// Per-file entry, written in the same transaction as the file's chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Chunk ids ordered by chunk index
    pub chunk_ids: Vec<ChunkId>,
    /// Freshness watermark (max over the chunks' last_modified)
    pub last_modified: f64,
    /// SHA256 of the file contents that produced the chunks
    pub content_hash: Option<String>,
}

/// Result of replacing a file's chunks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOutcome {
    /// New ids, ordered by chunk index
    pub ids: Vec<ChunkId>,
    /// Previous ids of the file that no longer exist
    pub removed: Vec<ChunkId>,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Database(format!("Failed to serialize record: {}", e)))
}

fn from_json<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| Error::Database(format!("Failed to deserialize record: {}", e)))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Database(format!(
            "Corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Durable chunk table; the source of truth the vector index is derived from
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Open or create the metadata store
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.store_path)
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path.exists() {
            Database::open(path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Database("Metadata store is locked. Another semfind process may be running. Close other instances and try again.".to_string())
                } else {
                    Error::Database(format!("Failed to open metadata store: {}", e))
                }
            })?
        } else {
            Database::create(path).map_err(db_err("Failed to create metadata store"))?
        };

        // Initialize tables (safe even if they already exist)
        let write_txn = db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            write_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;
            write_txn
                .open_table(EMBEDDINGS_TABLE)
                .map_err(db_err("Failed to open embeddings table"))?;
            write_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;
            write_txn
                .open_table(COUNTERS_TABLE)
                .map_err(db_err("Failed to open counters table"))?;
            write_txn.open_table(META_TABLE).map_err(db_err("Failed to open meta table"))?;
        }
        write_txn.commit().map_err(db_err("Failed to commit transaction"))?;

        Ok(Self { db })
    }

    /// Replace every chunk of `file_path` with `embeddings`, in one transaction.
    ///
    /// All chunks get freshly issued ids; every previous id of the file is reported
    /// in `removed`. An empty `embeddings` removes the file entirely.
    pub fn upsert_chunks(
        &self,
        file_path: &str,
        embeddings: &[Vec<f32>],
        last_modified: f64,
        content_hash: Option<&str>,
    ) -> Result<UpsertOutcome> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;

        let outcome = {
            let mut files = write_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;
            let mut chunks = write_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;
            let mut vectors = write_txn
                .open_table(EMBEDDINGS_TABLE)
                .map_err(db_err("Failed to open embeddings table"))?;
            let mut counters = write_txn
                .open_table(COUNTERS_TABLE)
                .map_err(db_err("Failed to open counters table"))?;

            let previous: Option<FileEntry> = files
                .get(file_path)
                .map_err(db_err("Failed to read file entry"))?
                .map(|guard| from_json(guard.value()))
                .transpose()?;
            let removed = previous.map(|entry| entry.chunk_ids).unwrap_or_default();

            for id in &removed {
                chunks.remove(*id).map_err(db_err("Failed to remove chunk"))?;
                vectors.remove(*id).map_err(db_err("Failed to remove embedding"))?;
            }

            let next_id = counters
                .get(NEXT_CHUNK_ID_KEY)
                .map_err(db_err("Failed to read id counter"))?
                .map(|guard| guard.value())
                .unwrap_or(1);
            let ids: Vec<ChunkId> = (next_id..next_id + embeddings.len() as u64).collect();

            for (chunk_index, (id, embedding)) in ids.iter().zip(embeddings).enumerate() {
                let record = ChunkRecord {
                    file_path: file_path.to_string(),
                    chunk_index: chunk_index as u32,
                    last_modified,
                };
                let json = to_json(&record)?;
                chunks
                    .insert(*id, json.as_str())
                    .map_err(db_err("Failed to insert chunk"))?;
                let blob = encode_vector(embedding);
                vectors
                    .insert(*id, blob.as_slice())
                    .map_err(db_err("Failed to insert embedding"))?;
            }

            if ids.is_empty() {
                files.remove(file_path).map_err(db_err("Failed to remove file entry"))?;
            } else {
                counters
                    .insert(NEXT_CHUNK_ID_KEY, next_id + ids.len() as u64)
                    .map_err(db_err("Failed to advance id counter"))?;
                let entry = FileEntry {
                    chunk_ids: ids.clone(),
                    last_modified,
                    content_hash: content_hash.map(str::to_string),
                };
                let json = to_json(&entry)?;
                files
                    .insert(file_path, json.as_str())
                    .map_err(db_err("Failed to insert file entry"))?;
            }

            UpsertOutcome { ids, removed }
        };

        write_txn.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(outcome)
    }

    /// Remove every chunk of a file; returns the removed ids (possibly empty)
    pub fn delete_file(&self, file_path: &str) -> Result<Vec<ChunkId>> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;

        let removed = {
            let mut files = write_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;
            let mut chunks = write_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;
            let mut vectors = write_txn
                .open_table(EMBEDDINGS_TABLE)
                .map_err(db_err("Failed to open embeddings table"))?;

            let entry: Option<FileEntry> = files
                .remove(file_path)
                .map_err(db_err("Failed to remove file entry"))?
                .map(|guard| from_json(guard.value()))
                .transpose()?;
            let removed = entry.map(|e| e.chunk_ids).unwrap_or_default();

            for id in &removed {
                chunks.remove(*id).map_err(db_err("Failed to remove chunk"))?;
                vectors.remove(*id).map_err(db_err("Failed to remove embedding"))?;
            }
            removed
        };

        if removed.is_empty() {
            write_txn.abort().map_err(db_err("Failed to abort transaction"))?;
        } else {
            write_txn.commit().map_err(db_err("Failed to commit transaction"))?;
        }
        Ok(removed)
    }

    /// Bump a file's watermark without touching its chunks' ids or vectors
    pub fn touch(&self, file_path: &str, last_modified: f64) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;

        let touched = {
            let mut files = write_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;
            let mut chunks = write_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;

            let entry: Option<FileEntry> = files
                .get(file_path)
                .map_err(db_err("Failed to read file entry"))?
                .map(|guard| from_json(guard.value()))
                .transpose()?;

            match entry {
                Some(mut entry) => {
                    for id in &entry.chunk_ids {
                        let record: Option<ChunkRecord> = chunks
                            .get(*id)
                            .map_err(db_err("Failed to read chunk"))?
                            .map(|guard| from_json(guard.value()))
                            .transpose()?;
                        if let Some(mut record) = record {
                            record.last_modified = last_modified;
                            let json = to_json(&record)?;
                            chunks
                                .insert(*id, json.as_str())
                                .map_err(db_err("Failed to update chunk"))?;
                        }
                    }
                    entry.last_modified = last_modified;
                    let json = to_json(&entry)?;
                    files
                        .insert(file_path, json.as_str())
                        .map_err(db_err("Failed to update file entry"))?;
                    true
                }
                None => false,
            }
        };

        write_txn.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(touched)
    }

    /// Remove every chunk and file entry. The id counter is kept so ids are never reused.
    pub fn clear(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let mut files = write_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;
            let mut chunks = write_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;
            let mut vectors = write_txn
                .open_table(EMBEDDINGS_TABLE)
                .map_err(db_err("Failed to open embeddings table"))?;

            let mut paths = Vec::new();
            for item in files.iter().map_err(db_err("Failed to iterate files"))? {
                let (key, _value) = item.map_err(db_err("Failed to read file entry"))?;
                paths.push(key.value().to_string());
            }
            for path in &paths {
                files.remove(path.as_str()).map_err(db_err("Failed to remove file entry"))?;
            }

            let mut ids = Vec::new();
            for item in chunks.iter().map_err(db_err("Failed to iterate chunks"))? {
                let (key, _value) = item.map_err(db_err("Failed to read chunk"))?;
                ids.push(key.value());
            }
            for id in ids {
                chunks.remove(id).map_err(db_err("Failed to remove chunk"))?;
                vectors.remove(id).map_err(db_err("Failed to remove embedding"))?;
            }
        }
        write_txn.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }

    /// Get the entry of a file, if it has any chunks
    pub fn file_entry(&self, file_path: &str) -> Result<Option<FileEntry>> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;

        let entry = table
            .get(file_path)
            .map_err(db_err("Failed to read file entry"))?
            .map(|guard| from_json(guard.value()))
            .transpose()?;
        Ok(entry)
    }

    /// Freshness watermark of a file, or None if the file is unknown
    pub fn get_last_modified(&self, file_path: &str) -> Result<Option<f64>> {
        Ok(self.file_entry(file_path)?.map(|entry| entry.last_modified))
    }

    /// Metadata of a single chunk
    pub fn chunk(&self, id: ChunkId) -> Result<Option<ChunkRecord>> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;

        let record = table
            .get(id)
            .map_err(db_err("Failed to read chunk"))?
            .map(|guard| from_json(guard.value()))
            .transpose()?;
        Ok(record)
    }

    /// Resolve a chunk id to its file path
    pub fn file_path_of(&self, id: ChunkId) -> Result<Option<String>> {
        Ok(self.chunk(id)?.map(|record| record.file_path))
    }

    pub fn list_distinct_files(&self) -> Result<BTreeSet<String>> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;

        let mut files = BTreeSet::new();
        for item in table.iter().map_err(db_err("Failed to iterate files"))? {
            let (key, _value) = item.map_err(db_err("Failed to read file entry"))?;
            files.insert(key.value().to_string());
        }
        Ok(files)
    }

    /// Stored files located under `dir`
    pub fn files_under(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}{}", dir.trim_end_matches(std::path::MAIN_SEPARATOR), std::path::MAIN_SEPARATOR);
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;

        // Keys sharing the prefix are contiguous
        let mut files = Vec::new();
        for item in table.range(prefix.as_str()..).map_err(db_err("Failed to scan files"))? {
            let (key, _value) = item.map_err(db_err("Failed to read file entry"))?;
            let path = key.value();
            if !path.starts_with(&prefix) {
                break;
            }
            files.push(path.to_string());
        }
        Ok(files)
    }

    /// Number of distinct files with at least one chunk
    pub fn file_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(FILES_TABLE).map_err(db_err("Failed to open files table"))?;
        let count = table.len().map_err(db_err("Failed to count files"))?;
        Ok(count as usize)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;
        let count = table.len().map_err(db_err("Failed to count chunks"))?;
        Ok(count as usize)
    }

    /// Every chunk id in the store
    pub fn chunk_ids(&self) -> Result<BTreeSet<ChunkId>> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(CHUNKS_TABLE).map_err(db_err("Failed to open chunks table"))?;

        let mut ids = BTreeSet::new();
        for item in table.iter().map_err(db_err("Failed to iterate chunks"))? {
            let (key, _value) = item.map_err(db_err("Failed to read chunk"))?;
            ids.insert(key.value());
        }
        Ok(ids)
    }

    /// Every (id, vector) pair, used to rebuild the vector index
    pub fn load_all(&self) -> Result<Vec<(ChunkId, Vec<f32>)>> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(EMBEDDINGS_TABLE)
            .map_err(db_err("Failed to open embeddings table"))?;

        let mut items = Vec::new();
        for item in table.iter().map_err(db_err("Failed to iterate embeddings"))? {
            let (key, value) = item.map_err(db_err("Failed to read embedding"))?;
            items.push((key.value(), decode_vector(value.value())?));
        }
        Ok(items)
    }

    pub fn model_fingerprint(&self) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn.open_table(META_TABLE).map_err(db_err("Failed to open meta table"))?;

        let value = table
            .get(MODEL_FINGERPRINT_KEY)
            .map_err(db_err("Failed to get model fingerprint"))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    pub fn set_model_fingerprint(&self, fingerprint: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let mut table = write_txn.open_table(META_TABLE).map_err(db_err("Failed to open meta table"))?;
            table
                .insert(MODEL_FINGERPRINT_KEY, fingerprint)
                .map_err(db_err("Failed to store model fingerprint"))?;
        }
        write_txn.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> MetadataStore {
        let config = Config::new(Some(temp_dir.path().join("test_semfind"))).unwrap();
        config.init().unwrap();
        MetadataStore::open(&config).unwrap()
    }

    fn vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32, 1.0, -0.5]).collect()
    }

    #[test]
    fn test_vector_blob_encoding() {
        let v = vec![0.1f32, -2.5, f32::MAX, 0.0];
        assert_eq!(decode_vector(&encode_vector(&v)).unwrap(), v);
        assert!(decode_vector(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_upsert_issues_ordered_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let outcome = store.upsert_chunks("/notes/a.txt", &vectors(2), 10.0, None).unwrap();
        assert_eq!(outcome.ids, vec![1, 2]);
        assert!(outcome.removed.is_empty());

        let outcome = store.upsert_chunks("/notes/b.txt", &vectors(1), 11.0, None).unwrap();
        assert_eq!(outcome.ids, vec![3]);

        let record = store.chunk(2).unwrap().unwrap();
        assert_eq!(record.file_path, "/notes/a.txt");
        assert_eq!(record.chunk_index, 1);
        assert_eq!(store.file_path_of(3).unwrap().as_deref(), Some("/notes/b.txt"));
        assert_eq!(store.file_path_of(42).unwrap(), None);
    }

    #[test]
    fn test_upsert_shrink_reports_removed() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let first = store.upsert_chunks("/notes/a.txt", &vectors(5), 10.0, None).unwrap();
        let second = store.upsert_chunks("/notes/a.txt", &vectors(2), 20.0, None).unwrap();

        assert_eq!(second.ids.len(), 2);
        assert_eq!(second.removed, first.ids);
        assert!(second.ids.iter().all(|id| !first.ids.contains(id)));
        assert_eq!(store.chunk_count().unwrap(), 2);
        assert_eq!(
            store.chunk_ids().unwrap(),
            second.ids.iter().copied().collect::<BTreeSet<_>>()
        );
        assert_eq!(store.get_last_modified("/notes/a.txt").unwrap(), Some(20.0));
    }

    #[test]
    fn test_upsert_empty_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let first = store.upsert_chunks("/notes/a.txt", &vectors(3), 10.0, None).unwrap();
        let outcome = store.upsert_chunks("/notes/a.txt", &[], 20.0, None).unwrap();

        assert!(outcome.ids.is_empty());
        assert_eq!(outcome.removed, first.ids);
        assert_eq!(store.get_last_modified("/notes/a.txt").unwrap(), None);
        assert!(store.list_distinct_files().unwrap().is_empty());
    }

    #[test]
    fn test_delete_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert_chunks("/notes/a.txt", &vectors(2), 10.0, None).unwrap();
        store.upsert_chunks("/notes/b.txt", &vectors(1), 10.0, None).unwrap();

        assert_eq!(store.delete_file("/notes/a.txt").unwrap(), vec![1, 2]);
        assert_eq!(store.chunk_ids().unwrap().into_iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(store.load_all().unwrap().len(), 1);

        // Removing an unknown file is not an error
        assert!(store.delete_file("/notes/a.txt").unwrap().is_empty());
    }

    #[test]
    fn test_ids_never_reused_after_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert_chunks("/notes/a.txt", &vectors(3), 10.0, None).unwrap();
        store.clear().unwrap();
        assert_eq!(store.file_count().unwrap(), 0);
        assert_eq!(store.chunk_count().unwrap(), 0);

        let outcome = store.upsert_chunks("/notes/a.txt", &vectors(1), 10.0, None).unwrap();
        assert_eq!(outcome.ids, vec![4]);
    }

    #[test]
    fn test_load_all_returns_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let embeddings = vectors(3);
        let outcome = store.upsert_chunks("/notes/a.txt", &embeddings, 10.0, None).unwrap();

        let mut loaded = store.load_all().unwrap();
        loaded.sort_by_key(|(id, _)| *id);
        let expected: Vec<(ChunkId, Vec<f32>)> = outcome.ids.into_iter().zip(embeddings).collect();
        assert_eq!(loaded, expected);
    }

    #[test]
    fn test_touch_keeps_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let outcome = store
            .upsert_chunks("/notes/a.txt", &vectors(2), 10.0, Some("abc"))
            .unwrap();
        assert!(store.touch("/notes/a.txt", 30.0).unwrap());
        assert!(!store.touch("/notes/missing.txt", 30.0).unwrap());

        let entry = store.file_entry("/notes/a.txt").unwrap().unwrap();
        assert_eq!(entry.chunk_ids, outcome.ids);
        assert_eq!(entry.last_modified, 30.0);
        assert_eq!(entry.content_hash.as_deref(), Some("abc"));
        assert_eq!(store.chunk(outcome.ids[1]).unwrap().unwrap().last_modified, 30.0);
    }

    #[test]
    fn test_distinct_files_and_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let sep = std::path::MAIN_SEPARATOR;
        let a = format!("{sep}notes{sep}a.txt");
        let b = format!("{sep}notes{sep}sub{sep}b.txt");
        let c = format!("{sep}notes-other{sep}c.txt");
        for path in [&a, &b, &c] {
            store.upsert_chunks(path, &vectors(2), 10.0, None).unwrap();
        }

        assert_eq!(store.file_count().unwrap(), 3);
        assert_eq!(store.list_distinct_files().unwrap().len(), 3);

        let mut under = store.files_under(&format!("{sep}notes")).unwrap();
        under.sort();
        assert_eq!(under, vec![a, b]);
    }

    #[test]
    fn test_files_under_stops_at_prefix_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let sep = std::path::MAIN_SEPARATOR;
        let inside = format!("{sep}notes{sep}a.txt");
        let keys = [
            format!("{sep}alpha{sep}x.txt"),
            inside.clone(),
            format!("{sep}notes0{sep}d.txt"),
            format!("{sep}zeta{sep}y.txt"),
        ];
        for key in &keys {
            store.upsert_chunks(key, &vectors(1), 10.0, None).unwrap();
        }

        assert_eq!(store.files_under(&format!("{sep}notes{sep}")).unwrap(), vec![inside]);
        assert!(store.files_under(&format!("{sep}missing")).unwrap().is_empty());
    }

    #[test]
    fn test_model_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert_eq!(store.model_fingerprint().unwrap(), None);
        store.set_model_fingerprint("bge:384").unwrap();
        assert_eq!(store.model_fingerprint().unwrap().as_deref(), Some("bge:384"));
    }

    #[test]
    fn test_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(Some(temp_dir.path().join("test_semfind"))).unwrap();
        config.init().unwrap();

        {
            let store = MetadataStore::open(&config).unwrap();
            store.upsert_chunks("/notes/a.txt", &vectors(2), 10.0, None).unwrap();
        }

        let store = MetadataStore::open(&config).unwrap();
        assert_eq!(store.get_last_modified("/notes/a.txt").unwrap(), Some(10.0));
        let outcome = store.upsert_chunks("/notes/b.txt", &vectors(1), 10.0, None).unwrap();
        assert_eq!(outcome.ids, vec![3]);
    }
}
