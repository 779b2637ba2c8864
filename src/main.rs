use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

mod auth;
mod cli;
mod config;
mod consistency;
mod embedder;
mod errors;
mod images;
mod index;
mod journal;
mod lifecycle;
mod lock;
mod matcher;
mod photos;
mod report;
mod repository;
mod service;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use report::{ReportId, ReportStatus, ReportView};
use service::MatchService;

const BASE_PATH_ENV: &str = "REUNIFY_BASE_PATH";
const PHOTO_DIR_NAME: &str = "photos";

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/reunify"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("failed to create {}", base_path.display()))?;

    let _lock = lock::DataDirLock::acquire(&base_path)
        .with_context(|| format!("failed to lock {}", base_path.display()))?;

    let mut config = Config::load_with(&base_path)?;

    let service = Arc::new(
        MatchService::open(&config.matching, &base_path).context("startup recovery failed")?,
    );

    match args.command {
        cli::Command::Daemon { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }

            // blocking client must be built outside the async runtime
            let embedder = embedder::RemoteEmbedder::new(&config.embedder, config.matching.dimension)
                .context("failed to build embedder client")?;
            let photo_dir = config.base_path().join(PHOTO_DIR_NAME);
            let photos = photos::PhotoDirectory::new(&photo_dir)?;

            let state = Arc::new(web::SharedState {
                service,
                embedder: Arc::new(embedder),
                photos: Arc::new(photos),
                identity: Arc::new(auth::StaticTokens::from_config(&config.auth)),
                photo_config: config.photos.clone(),
                photo_dir,
            });

            web::start_daemon(config, state)
        }

        cli::Command::Check { checkpoint } => {
            if checkpoint {
                service.checkpoint()?;
            }

            print_json(&serde_json::json!({
                "reconcile": service.reconcile_report(),
                "stats": service.stats()?,
            }))
        }

        cli::Command::List {
            status,
            offset,
            limit,
        } => {
            let status = if status.eq_ignore_ascii_case("all") {
                None
            } else {
                Some(status.parse::<ReportStatus>()?)
            };

            print_json(&service.list_reports(status, offset, limit)?)
        }

        cli::Command::Get { id } => {
            let report = service.get_report(&ReportId::from(id))?;
            print_json(&ReportView::from(&report))
        }

        cli::Command::SetStatus { id, status } => {
            let report = service.update_status(&ReportId::from(id), status.parse()?)?;
            print_json(&ReportView::from(&report))
        }
    }
}
