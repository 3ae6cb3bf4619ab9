use anyhow::{bail, Context};
use clap::Parser;
use semfind::cli::{Cli, Commands};
use semfind::{
    BertEmbedder, Config, Engine, IndexEvent, MetadataStore, QueryOutcome, StartMode,
    TextExtractor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("semfind=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = cli.base_dir;

    match cli.command {
        Commands::Init { dirs } => handle_init(base_dir, dirs),
        Commands::Index { force } => handle_index(base_dir, force),
        Commands::Watch => handle_watch(base_dir),
        Commands::Search {
            query,
            limit,
            all,
            no_sync,
        } => handle_search(base_dir, &query, limit, all, no_sync),
        Commands::Status => handle_status(base_dir),
    }
}

fn handle_init(base_dir: Option<PathBuf>, dirs: Vec<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::load(base_dir)?;
    config.init()?;

    for dir in dirs {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("Cannot index {}", dir.display()))?;
        if !config.settings.directories.contains(&dir) {
            config.settings.directories.push(dir);
        }
    }
    config.save()?;

    println!("✓ Configuration directory: {}", config.base_dir.display());
    for dir in &config.settings.directories {
        println!("✓ Indexing: {}", dir.display());
    }

    if BertEmbedder::is_downloaded(&config) {
        println!("✓ Embedding model already present");
    } else {
        BertEmbedder::download(&config)?;
        println!("✓ Embedding model downloaded");
    }

    println!("\nNext steps:");
    println!("  semfind index     build the index");
    println!("  semfind watch     keep it up to date");
    Ok(())
}

/// Load the configuration and open the engine with the BERT embedder
fn open_engine(base_dir: Option<PathBuf>, mode: StartMode) -> anyhow::Result<Engine> {
    let config = Config::load(base_dir)?;
    if !config.is_initialized() {
        bail!("semfind is not initialized. Run 'semfind init --dir <PATH>' first.");
    }
    config.validate()?;

    let embedder = Arc::new(BertEmbedder::init(&config)?);
    let extractor = Arc::new(TextExtractor::new(config.settings.directories.clone()));
    Ok(Engine::open_with(config, embedder, extractor, mode)?)
}

fn handle_index(base_dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let mode = if force {
        StartMode::FullRescan
    } else {
        StartMode::Reconcile
    };
    let engine = open_engine(base_dir, mode)?;
    engine.wait_idle()?;

    println!(
        "Indexed {} files ({} chunks)",
        engine.store().file_count()?,
        engine.store().chunk_count()?
    );
    engine.shutdown();
    Ok(())
}

fn handle_watch(base_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut engine = open_engine(base_dir, StartMode::Reconcile)?;
    let events = engine.subscribe();
    engine.watch()?;
    println!("Watching for changes. Press Ctrl+C to stop.");

    for event in events {
        match event {
            IndexEvent::FileIndexed { path, chunks } => println!("  ✓ {} ({} chunks)", path, chunks),
            IndexEvent::FileRemoved { path } => println!("  ✗ {}", path),
            IndexEvent::Reconciled => println!(
                "Up to date: {} files, {} chunks",
                engine.store().file_count()?,
                engine.store().chunk_count()?
            ),
            IndexEvent::RescanCompleted => println!("Full rescan complete"),
            IndexEvent::IndexRebuilt => println!("Vector index rebuilt from the store"),
        }
    }
    Ok(())
}

fn handle_search(
    base_dir: Option<PathBuf>,
    query: &str,
    limit: Option<usize>,
    all: bool,
    no_sync: bool,
) -> anyhow::Result<()> {
    let mode = if no_sync {
        StartMode::Idle
    } else {
        StartMode::Reconcile
    };
    let engine = open_engine(base_dir, mode)?;
    engine.wait_idle()?;

    let top_n = if all {
        None
    } else {
        limit.or(engine.config().settings.default_top_n)
    };

    match engine.submit_query(query, top_n).wait() {
        QueryOutcome::Completed(hits) if hits.is_empty() => println!("No results found."),
        QueryOutcome::Completed(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                println!("{:>3}. {} (distance: {:.4})", i + 1, hit.file_path, hit.distance);
            }
        }
        QueryOutcome::Cancelled => println!("Search cancelled."),
        QueryOutcome::Failed(reason) => bail!("Search failed: {}", reason),
    }

    engine.shutdown();
    Ok(())
}

fn handle_status(base_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load(base_dir)?;
    println!("Base directory: {}", config.base_dir.display());
    if !config.is_initialized() {
        println!("Not initialized. Run 'semfind init --dir <PATH>'.");
        return Ok(());
    }

    if config.settings.directories.is_empty() {
        println!("Directories:    (none)");
    }
    for dir in &config.settings.directories {
        println!("Directory:      {}", dir.display());
    }

    let store = MetadataStore::open(&config)?;
    println!("Files:          {}", store.file_count()?);
    println!("Chunks:         {}", store.chunk_count()?);
    println!(
        "Model:          {}",
        store.model_fingerprint()?.as_deref().unwrap_or("(none)")
    );
    println!(
        "Rescan every:   {}",
        config
            .rescan_interval()
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "disabled".to_string())
    );
    Ok(())
}
