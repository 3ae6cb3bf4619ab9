use crate::core::error::{Error, Result};
use crate::indexing::events::FileEvent;
use crate::indexing::worker::IndexerHandle;
use notify_debouncer_full::{
    new_debouncer,
    notify::{
        event::{ModifyKind, RenameMode},
        Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    },
    DebounceEventResult, Debouncer, FileIdMap,
};
use std::path::PathBuf;
use std::time::Duration;

/// Forwards debounced file-system changes under the roots to the indexing worker.
/// Watching stops when the value is dropped.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    pub fn start(roots: &[PathBuf], debounce: Duration, indexer: IndexerHandle) -> Result<Self> {
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events.iter().flat_map(|e| translate(&e.event)) {
                        if indexer.send_event(event).is_err() {
                            // Worker gone; nothing left to feed
                            return;
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!("Watch error: {}", error);
                    }
                }
            }
        })
        .map_err(|e| Error::Watcher(format!("Failed to create file watcher: {}", e)))?;

        for root in roots {
            debouncer
                .watcher()
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| {
                    Error::Watcher(format!("Failed to watch {}: {}", root.display(), e))
                })?;
            debouncer.cache().add_root(root, RecursiveMode::Recursive);
            tracing::info!("Watching {}", root.display());
        }

        Ok(Self {
            _debouncer: debouncer,
            roots: roots.to_vec(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Map a raw notify event onto zero or more file events
pub fn translate(event: &Event) -> Vec<FileEvent> {
    let paths = &event.paths;
    match event.kind {
        EventKind::Create(_) => paths.iter().cloned().map(FileEvent::Created).collect(),
        EventKind::Remove(_) => paths.iter().cloned().map(FileEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            vec![FileEvent::Moved {
                from: paths[0].clone(),
                to: paths[1].clone(),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().cloned().map(FileEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().cloned().map(FileEvent::Created).collect()
        }
        // Unpaired rename: the path's current state tells which side it was
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .cloned()
            .map(|path| {
                if path.exists() {
                    FileEvent::Created(path)
                } else {
                    FileEvent::Deleted(path)
                }
            })
            .collect(),
        EventKind::Modify(_) => paths.iter().cloned().map(FileEvent::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_full::notify::event::{
        AccessKind, CreateKind, DataChange, RemoveKind,
    };
    use std::path::Path;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_translate_create_modify_remove() {
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::File), &["/n/a.txt"])),
            vec![FileEvent::Created(PathBuf::from("/n/a.txt"))]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/n/a.txt"]
            )),
            vec![FileEvent::Modified(PathBuf::from("/n/a.txt"))]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::File), &["/n/a.txt", "/n/b.txt"])),
            vec![
                FileEvent::Deleted(PathBuf::from("/n/a.txt")),
                FileEvent::Deleted(PathBuf::from("/n/b.txt")),
            ]
        );
    }

    #[test]
    fn test_translate_renames() {
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/n/a.txt", "/n/b.txt"]
            )),
            vec![FileEvent::Moved {
                from: PathBuf::from("/n/a.txt"),
                to: PathBuf::from("/n/b.txt"),
            }]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/n/a.txt"]
            )),
            vec![FileEvent::Deleted(PathBuf::from("/n/a.txt"))]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/n/b.txt"]
            )),
            vec![FileEvent::Created(PathBuf::from("/n/b.txt"))]
        );
    }

    #[test]
    fn test_translate_unpaired_rename_checks_disk() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("present.txt");
        std::fs::write(&present, "x").unwrap();
        let absent = temp_dir.path().join("absent.txt");

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(present.clone())
            .add_path(absent.clone());
        assert_eq!(
            translate(&rename),
            vec![FileEvent::Created(present), FileEvent::Deleted(absent)]
        );
    }

    #[test]
    fn test_translate_ignores_access() {
        assert!(translate(&event(EventKind::Access(AccessKind::Any), &["/n/a.txt"])).is_empty());
        assert!(translate(&event(EventKind::Any, &["/n/a.txt"])).is_empty());
        assert!(!Path::new("/n/a.txt").exists());
    }
}
