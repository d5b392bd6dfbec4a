use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autoencode::config::AppConfig;
use autoencode::logging;
use autoencode::pipeline::{FfmpegEncoder, PipelineHandle, PipelineManager, Submission};
use autoencode::services::{DiscoverySource, ServiceContainer, WatchDirDiscovery};
use clap::Parser;
use futures::future::join_all;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Release to process, as `<name>=<locator>`. May be repeated.
    #[arg(short, long = "submit", value_name = "NAME=LOCATOR", value_parser = parse_submission)]
    submissions: Vec<(String, String)>,

    /// Bypass deduplication for submitted releases
    #[arg(short, long)]
    force: bool,
}

fn parse_submission(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, locator)) if !name.trim().is_empty() && !locator.is_empty() => {
            Ok((name.to_string(), locator.to_string()))
        }
        _ => Err(format!("expected <name>=<locator>, got {value}")),
    }
}

async fn wait_for_reports(handles: Vec<PipelineHandle>) {
    for result in join_all(handles.into_iter().map(PipelineHandle::join)).await {
        match result {
            Ok(report) => info!(
                item = %report.display_name,
                outcome = ?report.outcome,
                "Pipeline finished"
            ),
            Err(e) => error!(error = %e, "Pipeline crashed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _logging = logging::init_logging(&config.logging)?;

    let services = ServiceContainer::from_config(&config);
    let encoder = Arc::new(FfmpegEncoder::new(config.encoder.clone()));
    let manager = Arc::new(PipelineManager::new(&config, services, encoder));
    manager.start();

    let mut handles = Vec::new();
    for (name, locator) in cli.submissions {
        handles.push(manager.submit(Submission::new(name, locator).forced(cli.force))?);
    }

    let sources: Vec<Arc<dyn DiscoverySource>> = config
        .discovery
        .watch_dir
        .iter()
        .map(|dir| Arc::new(WatchDirDiscovery::new(dir)) as Arc<dyn DiscoverySource>)
        .collect();
    let discovering = manager.spawn_discovery(sources, &config.discovery);

    if discovering {
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, draining queued work");
    } else {
        tokio::select! {
            _ = wait_for_reports(handles) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupt received, draining queued work"),
        }
    }

    tokio::select! {
        _ = manager.shutdown() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Second interrupt, cancelling all pipelines");
            manager.abort().await;
        }
    }

    Ok(())
}
