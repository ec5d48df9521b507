//! One-shot backend queries: `linewatch fetch`, `lines` and `health`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;

use linewatch::config::LinewatchConfig;
use linewatch::directory::LineDirectory;
use linewatch::fetch::{BackendClient, FetchOutcome};
use linewatch::{Identity, LineType};

fn backend(config: &LinewatchConfig) -> Result<BackendClient> {
    BackendClient::new(config.toml.backend_config()).context("Invalid backend configuration")
}

pub async fn cmd_fetch(config: &LinewatchConfig, identity: Identity) -> Result<()> {
    let outcome = backend(config)?
        .fetch_snapshot(&identity)
        .await
        .with_context(|| format!("Failed to fetch {identity}"))?;
    match outcome {
        FetchOutcome::Data(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        FetchOutcome::Empty => {
            eprintln!("No data for {identity}");
            println!("null");
        }
    }
    Ok(())
}

pub async fn cmd_lines(config: &LinewatchConfig, line_type: Option<LineType>) -> Result<()> {
    let directory = LineDirectory::new(Arc::new(backend(config)?), config.toml.lines_cache_ttl());
    let lines = directory
        .lines(line_type)
        .await
        .context("Failed to load production lines")?;

    if lines.is_empty() {
        println!("No production lines found.");
        return Ok(());
    }
    println!(
        "{}",
        style(format!(
            "{:<12} {:<8} {:<6} {:<6} {:<4} {:>8} {:>8} {:>8}",
            "CODE", "FACTORY", "LINE", "TEAM", "TYPE", "HT%", "PPH%", "RFT"
        ))
        .bold()
    );
    for line in &lines {
        println!(
            "{:<12} {:<8} {:<6} {:<6} {:<4} {:>8} {:>8} {:>8}",
            line.code,
            line.factory,
            line.line,
            line.team,
            line.kind(),
            line.completion_pct,
            line.pph_pct,
            line.rft
        );
    }
    Ok(())
}

pub async fn cmd_health(config: &LinewatchConfig) -> Result<()> {
    let client = backend(config)?;
    let health = client
        .health()
        .await
        .with_context(|| format!("Backend at {} is unreachable", client.base_url()))?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}
