//! `gwsync render`: dry run of one cycle.
//!
//! Reads rawdata from `--input` (or fetches it from Traefik), normalizes and
//! builds it with the configured mode, and prints the result. Nothing is
//! written to Consul.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use gwsync_core::{AgentConfig, RawSnapshot, Snapshot};
use gwsync_daemon::TraefikSource;
use gwsync_sync::{fingerprint, prepare, strategy_for, NormalizeOptions, Prepared, SnapshotSource};

use super::{block_on, ConfigArgs};

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Read rawdata JSON from this file instead of the Traefik API.
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Print the built snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "value")]
    value: String,
}

#[derive(Tabled)]
struct TagRow {
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "tag")]
    tag: String,
}

impl RenderArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.resolve()?;
        let raw = match &self.input {
            Some(path) => read_rawdata(path)?,
            None => fetch_rawdata(&config)?,
        };

        let strategy = strategy_for(&config);
        let prepared = prepare(
            &raw,
            &NormalizeOptions::from_config(&config),
            strategy.as_ref(),
            Utc::now(),
        );

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&prepared.snapshot)
                    .context("failed to serialize snapshot")?
            );
            return Ok(());
        }

        print_report(&config, &prepared);
        Ok(())
    }
}

fn read_rawdata(path: &Path) -> Result<RawSnapshot> {
    let body =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&body)
        .with_context(|| format!("{} is not valid rawdata JSON", path.display()))
}

fn fetch_rawdata(config: &AgentConfig) -> Result<RawSnapshot> {
    let source = TraefikSource::from_config(config)?;
    let url = source.url().clone();
    block_on(async move { source.fetch().await })?
        .with_context(|| format!("failed to fetch {url}"))
}

fn print_report(config: &AgentConfig, prepared: &Prepared) {
    let snapshot = &prepared.snapshot;
    println!(
        "gwsync v{} | mode {} | node {} | {} routers | {} middlewares",
        env!("CARGO_PKG_VERSION"),
        config.mode,
        config.node_name,
        prepared.model.routers.len(),
        prepared.model.middlewares.len(),
    );

    if snapshot.entries.is_empty() {
        println!("No keys.");
    } else {
        let rows: Vec<EntryRow> = snapshot
            .entries
            .iter()
            .map(|(key, value)| EntryRow {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    print_tags(snapshot);

    for rejection in &prepared.rejections {
        println!("{} skipped {rejection}", "!".yellow().bold());
    }
    println!(
        "{} keys, {} tags, fingerprint {}",
        snapshot.key_count(),
        snapshot.tag_count(),
        fingerprint(snapshot).as_str().bold()
    );
}

fn print_tags(snapshot: &Snapshot) {
    let rows: Vec<TagRow> = snapshot
        .registrations
        .iter()
        .flat_map(|reg| {
            reg.tags.iter().map(|tag| TagRow {
                service: reg.name.clone(),
                tag: tag.clone(),
            })
        })
        .collect();
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
