use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use bookmark_reconciler::progress;
use bookmark_reconciler::records::{generate_guid, now_millis, BOOKMARKS_COLLECTION};
use bookmark_reconciler::sync_state::SyncState;
use bookmark_reconciler::validator::validate_store;
use bookmark_reconciler::{
    guids, BookmarkRecord, BookmarkStore, BookmarksRepository, CollectingDelegate, SyncConfig,
};

#[derive(Parser)]
#[command(name = "bookmark-reconciler")]
#[command(about = "Apply synced bookmark records to a local store and reconcile folder order", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (JSON). Missing file means defaults
    #[arg(short, long, global = true, default_value = "bookmark-sync.json")]
    config: PathBuf,

    /// Override the database path from the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply incoming records from a JSON batch file or a directory of them
    Apply {
        /// Batch file, or directory searched for *.json
        path: PathBuf,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print records modified since a timestamp as JSON
    Export {
        /// Milliseconds since epoch (default: last export)
        #[arg(short, long)]
        since: Option<i64>,
    },

    /// Print the folder tree in materialized order
    Tree,

    /// Create a local bookmark or folder
    Add {
        /// Parent folder GUID
        #[arg(short = 'p', long, default_value = "unfiled")]
        parent: String,

        /// Title
        #[arg(short, long)]
        title: String,

        /// URL (required unless --folder)
        #[arg(short, long)]
        url: Option<String>,

        /// Create a folder instead of a bookmark
        #[arg(long)]
        folder: bool,
    },

    /// Check store integrity and tree invariants
    Validate {
        /// Show detailed validation report
        #[arg(short, long)]
        detailed: bool,
    },

    /// Remove every non-reserved record
    Wipe {
        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut config = SyncConfig::load(&cli.config)?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    config.verbose |= cli.verbose;
    config.validate()?;
    debug!("Using {}", config.description());

    let store = BookmarkStore::open(&config.database)
        .with_context(|| format!("Failed to open store {:?}", config.database))?;
    let repository = BookmarksRepository::new(store, &config);

    match cli.command {
        Commands::Apply { path, quiet } => {
            info!("📥 Applying records from {:?}", path);
            apply(&repository, &path, quiet)?;
        }
        Commands::Export { since } => {
            export(&repository, &config, since)?;
        }
        Commands::Tree => {
            let tree = repository.with_store(|store| {
                let mut out = String::new();
                render_tree(store, guids::PLACES, 0, &mut out)?;
                Ok(out)
            })?;
            println!("{}", tree);
        }
        Commands::Add { parent, title, url, folder } => {
            let guid = add(&repository, &parent, &title, url.as_deref(), folder)?;
            info!("✅ Created {} in {}", guid, parent);
            println!("{}", guid);
        }
        Commands::Validate { detailed } => {
            info!("🔍 Validating store...");
            let report = repository.with_store(validate_store)?;
            println!("{}", report.format(detailed));
            if !report.is_valid() {
                std::process::exit(1);
            }
        }
        Commands::Wipe { yes } => {
            if !yes {
                bail!("Refusing to wipe {:?} without --yes", config.database);
            }
            let mut session = repository.create_session();
            session.begin()?;
            session.wipe()?;
            session.finish()?;
            info!("✅ Store wiped");
        }
    }

    Ok(())
}

/// Collect batch files: the path itself, or every *.json below it in name order.
fn batch_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{:?} is neither a file nor a directory", path);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn load_records(path: &Path) -> Result<Vec<BookmarkRecord>> {
    let mut records = Vec::new();
    for file in batch_files(path)? {
        let content = fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
        let batch: Vec<BookmarkRecord> =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", file))?;
        debug!("Read {} records from {:?}", batch.len(), file);
        records.extend(batch);
    }
    Ok(records)
}

fn apply(repository: &BookmarksRepository, path: &Path, quiet: bool) -> Result<()> {
    let records = load_records(path)?;
    info!("📖 Loaded {} incoming records", records.len());

    let delegate = CollectingDelegate::new();
    let mut session = repository.create_session();
    session.set_store_delegate(Box::new(delegate.clone()));
    session.begin()?;

    let pb = if quiet {
        progress::create_hidden_progress_bar(records.len() as u64)
    } else {
        progress::create_record_progress_bar(records.len() as u64, "Applying records")
    };

    for record in records {
        let guid = record.guid.clone();
        if let Err(e) = session.store(record) {
            warn!("⚠️  Skipped {}: {}", guid, e);
        }
        pb.inc(1);
    }

    let tracked = match session.store_done() {
        Ok(tracked) => tracked,
        Err(e) => {
            progress::finish_with_error(&pb, "Failed to finish batch");
            return Err(e.into());
        }
    };
    let stats = session.finish()?;
    progress::finish_with_success(&pb, "Records applied");

    let report = delegate.report();
    if !report.failed.is_empty() {
        warn!("⚠️  {} record(s) failed", report.failed.len());
    }

    let summary = serde_json::json!({
        "stats": stats,
        "tracked": tracked,
        "failed": report.failed,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn export(repository: &BookmarksRepository, config: &SyncConfig, since: Option<i64>) -> Result<()> {
    let mut state = SyncState::load(&config.state_file)?;
    let from = since.unwrap_or_else(|| state.since(BOOKMARKS_COLLECTION));
    info!("📤 Exporting records modified since {}", from);

    let mut session = repository.create_session();
    session.begin()?;
    let records = session.fetch_since(from, None)?;
    session.finish()?;

    println!("{}", serde_json::to_string_pretty(&records)?);

    if since.is_none() {
        if let Some(newest) = records.iter().map(|r| r.last_modified).max() {
            state.advance(BOOKMARKS_COLLECTION, newest);
            state.save(&config.state_file)?;
        }
    }
    info!("✅ Exported {} records", records.len());
    Ok(())
}

fn add(
    repository: &BookmarksRepository,
    parent: &str,
    title: &str,
    url: Option<&str>,
    folder: bool,
) -> Result<String> {
    let guid = generate_guid();
    let now = now_millis();
    let mut record = match (folder, url) {
        (true, _) => BookmarkRecord::folder(&guid, parent, title, &[]),
        (false, Some(url)) => BookmarkRecord::bookmark(&guid, parent, title, url),
        (false, None) => bail!("--url is required for bookmarks"),
    };
    record.last_modified = now;

    let created = repository.with_store(|store| {
        if !store.is_live_folder(parent)? {
            return Ok(false);
        }
        record.parent_name = store.title_of(parent)?;
        record.validate()?;
        store.insert(&record, parent, None, None)?;
        store.append_to_folder(parent, &guid)?;
        store.touch(parent, now)?;
        Ok(true)
    })?;

    if !created {
        bail!("Parent folder {} does not exist", parent);
    }
    Ok(guid)
}

fn render_tree(
    store: &BookmarkStore,
    guid: &str,
    depth: usize,
    out: &mut String,
) -> bookmark_reconciler::Result<()> {
    let Some(row) = store.get(guid)? else {
        return Ok(());
    };
    let indent = "  ".repeat(depth);
    let title = row.title.clone().unwrap_or_default();
    let marker = if row.position.is_none() && depth > 0 { " ⏳" } else { "" };

    if row.kind.is_folder() {
        out.push_str(&format!("{}📁 {} [{}]{}\n", indent, title, row.guid, marker));
        for child in store.rows_with_parent(guid)? {
            render_tree(store, &child, depth + 1, out)?;
        }
    } else {
        let uri = row.uri.clone().unwrap_or_default();
        out.push_str(&format!(
            "{}🔖 {} <{}> [{}]{}\n",
            indent, title, uri, row.guid, marker
        ));
    }
    Ok(())
}
