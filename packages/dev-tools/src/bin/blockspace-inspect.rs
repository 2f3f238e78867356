//! Scope Inspection Binary
//!
//! Prints the ordered plugin tree of one (container, language) scope together
//! with its integrity report.
//!
//! # Usage
//!
//! ```bash
//! # Inspect the English scope of a container
//! cargo run --bin blockspace-inspect -- <container_id>
//!
//! # Another language, squashing positions first
//! cargo run --bin blockspace-inspect -- <container_id> de --repair
//! ```
//!
//! # Environment Variables
//!
//! - `BLOCKSPACE_DB`: Database file (default: ./blockspace.db)
//! - `BLOCKSPACE_CONFIG`: Engine config JSON (default: ./blockspace.json)
//! - `BLOCKSPACE_RENUMBER`: Renumber backend override (auto, window_rank, portable)
//! - `RUST_LOG`: Logging level (e.g., "info", "debug")
//!
//! Exits with status 1 when the scope has integrity violations.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use blockspace_core::behaviors::PluginTypeRegistry;
use blockspace_core::config::EngineConfig;
use blockspace_core::models::Scope;
use blockspace_core::services::PluginTreeService;

const DEFAULT_LANGUAGE: &str = "en";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut repair = false;
    let mut positional = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--repair" => repair = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            _ => positional.push(arg),
        }
    }

    let Some(container_id) = positional.first() else {
        bail!("usage: blockspace-inspect <container_id> [language] [--repair]");
    };
    let language = positional.get(1).map(String::as_str).unwrap_or(DEFAULT_LANGUAGE);
    let scope = Scope::new(container_id.as_str(), language);

    let db_path: PathBuf = env::var("BLOCKSPACE_DB")
        .unwrap_or_else(|_| "blockspace.db".to_string())
        .into();
    let config_path: PathBuf = env::var("BLOCKSPACE_CONFIG")
        .unwrap_or_else(|_| "blockspace.json".to_string())
        .into();

    let config = EngineConfig::load(&config_path)
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;
    let service = PluginTreeService::open(
        &db_path,
        Arc::new(PluginTypeRegistry::with_builtin()),
        config,
    )
    .await
    .with_context(|| format!("opening {}", db_path.display()))?;

    tracing::info!(
        "Inspecting {} in {} ({} backend)",
        scope,
        db_path.display(),
        service.renumber_backend()
    );

    if service.get_container(container_id).await?.is_none() {
        bail!("container {} does not exist", container_id);
    }

    if repair {
        let changed = service.repair_positions(&scope).await?;
        tracing::info!("Repaired {}: {} position(s) rewritten", scope, changed);
    }

    let tree = service.get_ordered_tree(&scope).await?;
    let report = service.check_integrity(&scope).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "scope": scope,
            "tree": tree,
            "integrity": report,
        }))?
    );

    if !report.is_intact() {
        eprintln!(
            "{} has {} integrity violation(s)",
            scope,
            report.violations.len()
        );
        std::process::exit(1);
    }

    Ok(())
}
