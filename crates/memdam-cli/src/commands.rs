use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use colored::Colorize;
use memdam_blobstore::LocalFolderBlobstore;
use memdam_eventstore::{Eventstore, SqliteEventstore};
use memdam_recorder::{SyncStores, Synchronizer};
use memdam_types::{Event, Query, QueryFilter};
use tracing::info;
use uuid::Uuid;

use crate::cli::*;
use crate::config::{MemdamConfig, StoreConfig};

pub fn run_command(command: Command, config: &MemdamConfig) -> anyhow::Result<()> {
    match command {
        Command::Sync(args) => cmd_sync(args, config),
        Command::Find(args) => cmd_find(args, config),
        Command::Get(args) => cmd_get(args, config),
        Command::Delete(args) => cmd_delete(args, config),
        Command::Import(args) => cmd_import(args, config),
    }
}

fn open_events(store: &StoreConfig) -> anyhow::Result<SqliteEventstore> {
    SqliteEventstore::open(&store.events)
        .with_context(|| format!("opening eventstore {}", store.events.display()))
}

fn open_blobs(store: &StoreConfig) -> anyhow::Result<LocalFolderBlobstore> {
    LocalFolderBlobstore::open(&store.blobs)
        .with_context(|| format!("opening blobstore {}", store.blobs.display()))
}

fn selected<'a>(config: &'a MemdamConfig, selection: &StoreSelection) -> &'a StoreConfig {
    if selection.archived {
        &config.destination
    } else {
        &config.source
    }
}

fn parse_id(id: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("invalid event id {id:?}"))
}

fn cmd_sync(args: SyncArgs, config: &MemdamConfig) -> anyhow::Result<()> {
    let stores = SyncStores {
        source_events: Arc::new(open_events(&config.source)?),
        source_blobs: Arc::new(open_blobs(&config.source)?),
        dest_events: Arc::new(open_events(&config.destination)?),
        dest_blobs: Arc::new(open_blobs(&config.destination)?),
    };

    if args.once {
        let report = Synchronizer::sync_pending(&stores, &config.sync)?;
        println!(
            "{} Synchronized {} events",
            "✓".green().bold(),
            report.synchronized.to_string().bold()
        );
        if report.failed > 0 {
            println!("  {} {} events left in the source", "!".yellow(), report.failed);
        }
        return Ok(());
    }

    let mut sync = Synchronizer::new(stores, &config.sync);
    sync.start()?;
    info!(
        source = %config.source.events.display(),
        destination = %config.destination.events.display(),
        "synchronizer running"
    );
    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        thread::sleep(config.sync.poll_interval().max(Duration::from_millis(100)));
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }
    sync.stop()?;

    let stats = sync.stats().snapshot();
    println!(
        "{} Synchronized {} events ({} failed attempts)",
        "✓".green().bold(),
        stats.processed.to_string().bold(),
        stats.failed
    );
    Ok(())
}

/// Combine `--query` JSON with the flag shorthands.
pub fn build_query(args: &FindArgs) -> anyhow::Result<Query> {
    let mut query = match &args.query {
        Some(json) => serde_json::from_str(json).context("parsing --query")?,
        None => Query::new(),
    };
    if let Some(ns) = &args.namespace {
        query = query.filter(QueryFilter::namespace(ns));
    }
    for order in &args.order {
        query = query.order_by(&order.field, order.ascending);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    query.plan().context("invalid query")?;
    Ok(query)
}

fn cmd_find(args: FindArgs, config: &MemdamConfig) -> anyhow::Result<()> {
    let query = build_query(&args)?;
    let events = open_events(selected(config, &args.store))?;
    for event in events.find(&query)? {
        println!("{}", event.to_json());
    }
    Ok(())
}

fn cmd_get(args: GetArgs, config: &MemdamConfig) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    let events = open_events(selected(config, &args.store))?;
    let event = events.get(id)?;
    println!("{}", serde_json::to_string_pretty(&event.to_json())?);
    Ok(())
}

fn cmd_delete(args: DeleteArgs, config: &MemdamConfig) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    let events = open_events(selected(config, &args.store))?;
    events.delete(id)?;
    println!("{} Deleted {}", "✓".green().bold(), id.simple().to_string().yellow());
    Ok(())
}

/// Save the canonical events in `text`, a JSON array, to `store`.
pub fn import_events(store: &dyn Eventstore, text: &str) -> anyhow::Result<usize> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let Some(items) = value.as_array() else {
        bail!("expected a JSON array of events");
    };
    let events = items
        .iter()
        .enumerate()
        .map(|(i, item)| Event::from_json(item).with_context(|| format!("event #{i}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    store.save(&events)?;
    Ok(events.len())
}

fn cmd_import(args: ImportArgs, config: &MemdamConfig) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let events = open_events(&config.source)?;
    let count = import_events(&events, &text)?;
    println!(
        "{} Imported {} events into {}",
        "✓".green().bold(),
        count.to_string().bold(),
        config.source.events.display()
    );
    Ok(())
}
