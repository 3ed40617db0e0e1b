mod config;
mod crawl;
mod error;
mod grid;
mod models;
mod scrapers;

use chrono::{DateTime, Utc};
use config::{Config, CrawlMode};
use crawl::{CrawlStage, Crawler};
use error::CrawlError;
use models::House;
use scrapers::DivarClient;
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// File written at the end of a crawl
#[derive(Serialize)]
struct CrawlOutput<'a> {
    generated_at: DateTime<Utc>,
    mode: String,
    complete: bool,
    houses: &'a [House],
}

async fn write_output(path: &Path, mode: CrawlMode, complete: bool, houses: &[House]) -> anyhow::Result<()> {
    let output = CrawlOutput {
        generated_at: Utc::now(),
        mode: mode.to_string(),
        complete,
        houses,
    };
    let json = serde_json::to_string_pretty(&output)?;
    tokio::fs::write(path, json).await?;
    info!("💾 Saved {} houses to {}", houses.len(), path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🏠 Divar Scout - apartment price crawler");

    let cfg = Config::from_env()?;
    let plan = cfg.plan().await?;
    let client = DivarClient::new(&cfg.base_url, cfg.timeout, cfg.retry.clone())?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current request");
            on_ctrl_c.cancel();
        }
    });

    info!(mode = %cfg.mode, "Starting crawl");
    let mut crawler = Crawler::new(&client, cfg.settings(), cancel);
    let mut last_data: Vec<House> = Vec::new();
    let mut last_percent = None;

    let result = crawler
        .run(&plan, &cfg.filters, &mut |progress, houses| {
            let percent = (progress.fraction * 100.0).floor() as u32;
            if progress.stage != CrawlStage::Failed && last_percent != Some(percent) {
                last_percent = Some(percent);
                info!("[{:>3}%] {} ({} houses)", percent, progress.label, houses.len());
            }
            if progress.stage == CrawlStage::Failed {
                last_data = houses.to_vec();
            }
        })
        .await;

    match result {
        Ok(houses) => {
            info!("✅ Crawled {} houses", houses.len());
            write_output(&cfg.output_path, cfg.mode, true, &houses).await?;
            Ok(())
        }
        Err(err) => {
            if !last_data.is_empty() {
                write_output(&cfg.output_path, cfg.mode, false, &last_data).await?;
            }
            match err {
                CrawlError::Cancelled => {
                    warn!("Crawl cancelled with {} houses collected", last_data.len());
                    Ok(())
                }
                other => Err(other.into()),
            }
        }
    }
}
