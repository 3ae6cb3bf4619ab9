#![allow(dead_code)]

use semfind::{Config, Embedder, Engine, Error, Result, StartMode, TextExtractor};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Every non-empty line of a document is one vector of whitespace-separated floats
pub struct LineEmbedder {
    pub dimension: usize,
    pub model: &'static str,
}

impl LineEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "line-embedder",
        }
    }
}

impl Embedder for LineEmbedder {
    fn model_id(&self) -> &str {
        self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.split_whitespace()
                    .map(|x| {
                        x.parse::<f32>()
                            .map_err(|e| Error::Embedding(format!("bad component {:?}: {}", x, e)))
                    })
                    .collect()
            })
            .collect()
    }
}

/// A notes directory plus a semfind base directory inside one TempDir
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("notes");
        fs::create_dir_all(&root)?;

        let mut config = Config::new(Some(temp_dir.path().join("semfind")))?;
        config.settings.directories = vec![root.clone()];
        config.settings.rescan_interval_secs = 0;
        config.init()?;

        Ok(Self {
            temp_dir,
            root,
            config,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Stored key of a file under the notes directory
    pub fn key(&self, name: &str) -> String {
        self.path(name).to_string_lossy().into_owned()
    }

    /// Write a file and pin its mtime so freshness checks are deterministic
    pub fn write(&self, name: &str, content: &str, mtime_secs: u64) -> Result<PathBuf> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        set_mtime(&path, mtime_secs)?;
        Ok(path)
    }

    pub fn open_engine(&self, mode: StartMode) -> Result<Engine> {
        self.open_engine_with(Arc::new(LineEmbedder::new(2)), mode)
    }

    pub fn open_engine_with(&self, embedder: Arc<dyn Embedder>, mode: StartMode) -> Result<Engine> {
        Engine::open_with(
            self.config.clone(),
            embedder,
            Arc::new(TextExtractor::new(vec![self.root.clone()])),
            mode,
        )
    }
}

pub fn set_mtime(path: &Path, secs: u64) -> Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))?;
    Ok(())
}
