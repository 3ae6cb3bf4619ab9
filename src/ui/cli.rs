use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// semfind - Local semantic file search
#[derive(Parser, Debug)]
#[command(name = "semfind")]
#[command(about = "Semantic search over local files with an incrementally synced vector index", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.semfind)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize semfind (create directories, register folders, download model)
    Init {
        /// Directory to index; may be given several times
        #[arg(short, long = "dir", value_name = "PATH")]
        dirs: Vec<PathBuf>,
    },
    /// Bring the index up to date with the configured directories
    Index {
        /// Discard the index and re-embed every file
        #[arg(short, long)]
        force: bool,
    },
    /// Keep the index up to date while files change
    Watch,
    /// Search indexed files
    Search {
        /// Search query
        query: String,
        /// Maximum number of files to return
        #[arg(short, long, conflicts_with = "all")]
        limit: Option<usize>,
        /// Rank every indexed file
        #[arg(short, long)]
        all: bool,
        /// Search the stored index without syncing first
        #[arg(long)]
        no_sync: bool,
    },
    /// Show what is indexed
    Status,
}
