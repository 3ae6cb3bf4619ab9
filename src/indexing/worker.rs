use crate::core::error::{Error, Result};
use crate::indexing::events::FileEvent;
use crate::indexing::sync::SyncEngine;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Work items for the indexing worker, applied in arrival order
#[derive(Debug)]
pub enum IndexCommand {
    Event(FileEvent),
    Reconcile,
    FullRescan(Vec<PathBuf>),
    /// Acknowledged once every earlier command has been applied
    Barrier(Sender<()>),
    Shutdown,
}

/// Cloneable sender side of the indexing worker
#[derive(Clone)]
pub struct IndexerHandle {
    tx: Sender<IndexCommand>,
}

impl IndexerHandle {
    pub fn send(&self, command: IndexCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::Index("Indexing worker has stopped".to_string()))
    }

    pub fn send_event(&self, event: FileEvent) -> Result<()> {
        self.send(IndexCommand::Event(event))
    }

    pub fn reconcile(&self) -> Result<()> {
        self.send(IndexCommand::Reconcile)
    }

    pub fn full_rescan(&self, directories: Vec<PathBuf>) -> Result<()> {
        self.send(IndexCommand::FullRescan(directories))
    }

    /// Block until every command sent before this call has been applied
    pub fn wait_idle(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(IndexCommand::Barrier(ack_tx))?;
        ack_rx
            .recv()
            .map_err(|_| Error::Index("Indexing worker has stopped".to_string()))
    }
}

/// The single thread that owns the [`SyncEngine`] and serializes all mutations
pub struct IndexWorker {
    handle: IndexerHandle,
    thread: Option<JoinHandle<()>>,
}

impl IndexWorker {
    /// Start the worker. With `rescan_interval`, `roots` are reconciled at least
    /// that often, however busy the command channel is.
    pub fn spawn(
        engine: SyncEngine,
        roots: Vec<PathBuf>,
        rescan_interval: Option<Duration>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("semfind-indexer".to_string())
            .spawn(move || run(engine, rx, roots, rescan_interval))?;

        Ok(Self {
            handle: IndexerHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> IndexerHandle {
        self.handle.clone()
    }

    /// Finish pending commands and stop the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.send(IndexCommand::Shutdown);
            if thread.join().is_err() {
                tracing::error!("Indexing worker panicked");
            }
        }
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut engine: SyncEngine,
    rx: Receiver<IndexCommand>,
    roots: Vec<PathBuf>,
    rescan_interval: Option<Duration>,
) {
    tracing::info!("Indexing worker started");
    let mut next_rescan = rescan_interval.map(|interval| Instant::now() + interval);
    loop {
        let command = match next_rescan {
            // A busy channel must not postpone the periodic reconcile
            Some(deadline) if Instant::now() >= deadline => IndexCommand::Reconcile,
            Some(deadline) => match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => IndexCommand::Reconcile,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            IndexCommand::Event(event) => {
                tracing::debug!("Applying {:?}", event);
                let report = engine.handle_event(event);
                if report.failed > 0 {
                    tracing::debug!("{} paths failed to sync", report.failed);
                }
                if engine.needs_rebuild() {
                    if let Err(e) = engine.rebuild_index() {
                        tracing::error!("Failed to rebuild vector index: {}", e);
                    }
                }
            }
            IndexCommand::Reconcile => {
                if let Err(e) = engine.reconcile(&roots) {
                    tracing::warn!("Reconciliation failed: {}", e);
                }
                next_rescan = rescan_interval.map(|interval| Instant::now() + interval);
            }
            IndexCommand::FullRescan(directories) => {
                if let Err(e) = engine.full_rescan(&directories) {
                    tracing::warn!("Full rescan failed: {}", e);
                }
            }
            IndexCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
            IndexCommand::Shutdown => break,
        }
    }
    tracing::info!("Indexing worker stopped");
}
