//! flag-sync: batch flag evaluation and tag synchronization runner.
//!
//! Usage:
//!   flag-sync --db flags.db --tags tags.json
//!   flag-sync --db flags.db --tags tags.json --now 2026-03-01 --dry-run
//!   flag-sync --db flags.db --customer 10042
//!   flag-sync --db flags.db --import events.json --tags tags.json --json
//!
//! The tag snapshot (`{"customer_id": ["tag", ...]}`) stands in for the
//! commerce platform. It is read at start and written back after a real run.

use anyhow::Result;
use flagsync_core::{
    clock::RunClock,
    collaborators::Collaborators,
    config::SyncConfig,
    event::{parse_timestamp, CustomerEvent},
    memory::{MemoryTagClient, RecordingSubscriptions},
    report::RunReport,
    store::FlagStore,
    sync::SyncRunner,
    types::CustomerId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_str(&args, "--db").unwrap_or("flags.db");
    let data_dir = arg_str(&args, "--data-dir").unwrap_or("./data");
    let tags_path = arg_str(&args, "--tags").unwrap_or("tags.json");
    let customer = arg_str(&args, "--customer");
    let import = arg_str(&args, "--import");
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let json = args.iter().any(|a| a == "--json");

    let run_id = format!("sync-{}", uuid::Uuid::new_v4());
    let clock = match arg_str(&args, "--now") {
        Some(raw) => {
            let now = parse_timestamp(raw).ok_or_else(|| anyhow::anyhow!("Cannot parse --now '{raw}'"))?;
            RunClock::fixed(run_id, now)
        }
        None => RunClock::system(run_id),
    };

    if !json {
        println!("flag-sync");
        println!("  run:       {}", clock.run_id);
        println!("  now:       {}", clock.now);
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  tags:      {tags_path}");
        println!("  dry_run:   {dry_run}");
        println!();
    }

    let config = SyncConfig::load(data_dir)?;
    let store = FlagStore::open_migrated(db)?;

    if let Some(path) = import {
        let imported = import_events(&store, path)?;
        log::info!("imported {imported} events from {path}");
        if !json {
            println!("Imported {imported} events from {path}");
        }
    }

    let tags = MemoryTagClient::from_snapshot(read_snapshot(tags_path)?);
    let subscriptions = RecordingSubscriptions::new();
    let collab = Collaborators {
        events: &store,
        tags: &tags,
        subscriptions: &subscriptions,
        consent: &store,
        identity: &store,
        audit: &store,
    };
    let runner = SyncRunner::new(clock, config, collab)?;

    if let Some(customer_id) = customer {
        let instances = runner.evaluate_customer(customer_id)?;
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    let report = runner.run_sync(dry_run);

    if !dry_run {
        let snapshot = tags.snapshot();
        write_snapshot(tags_path, &snapshot)?;
        log::info!("wrote tags for {} customers to {tags_path}", snapshot.len());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, subscriptions.calls().len());
    }
    Ok(())
}

fn print_summary(report: &RunReport, subscribe_calls: usize) {
    println!("=== Sync Summary ===");
    println!("  customers:   {}", report.customers.len());
    if report.dry_run {
        println!("  would add:   {}", report.planned_adds());
        println!("  would remove:{}", report.planned_removes());
    } else {
        println!("  added:       {}", report.added());
        println!("  removed:     {}", report.removed());
        println!("  subscribes:  {subscribe_calls}");
    }
    println!("  suppressed:  {}", report.suppressed());
    println!("  failed:      {}", report.failed());

    for failure in report.all_failures() {
        println!(
            "  ! {:?} customer={} rule={} tag={} via={}: {}",
            failure.kind,
            failure.customer_id.as_deref().unwrap_or("-"),
            failure.rule_name.as_deref().unwrap_or("-"),
            failure.tag_name.as_deref().unwrap_or("-"),
            failure.collaborator.as_deref().unwrap_or("-"),
            failure.reason
        );
    }
}

/// Missing snapshot file means "no tags yet".
fn read_snapshot(path: &str) -> Result<BTreeMap<CustomerId, BTreeSet<String>>> {
    if !std::path::Path::new(path).exists() {
        log::warn!("tag snapshot {path} not found, starting with no tags");
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    Ok(serde_json::from_str(&content)?)
}

fn write_snapshot(path: &str, snapshot: &BTreeMap<CustomerId, BTreeSet<String>>) -> Result<()> {
    let content = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, content).map_err(|e| anyhow::anyhow!("Cannot write {path}: {e}"))?;
    Ok(())
}

#[derive(serde::Deserialize)]
struct ImportFile {
    #[serde(default)]
    contacts: Vec<ImportContact>,
    #[serde(default)]
    households: Vec<ImportHousehold>,
    #[serde(default)]
    events: Vec<CustomerEvent>,
}

#[derive(serde::Deserialize)]
struct ImportContact {
    customer_id: String,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(serde::Deserialize)]
struct ImportHousehold {
    parent: String,
    child: String,
}

fn import_events(store: &FlagStore, path: &str) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let file: ImportFile = serde_json::from_str(&content)?;
    for c in &file.contacts {
        store.upsert_contact(&c.customer_id, c.email.as_deref(), c.phone.as_deref())?;
    }
    for h in &file.households {
        store.link_family(&h.parent, &h.child)?;
    }
    for e in &file.events {
        store.append_event(e)?;
    }
    Ok(file.events.len())
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
