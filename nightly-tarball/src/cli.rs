//! # nightly-tarball CLI Interface (Module)
//!
//! This module implements the CLI for nightly-tarball: command parsing,
//! argument validation, and the async entrypoint. All pipeline logic
//! (orchestration, history, retention) lives in `nightly-tarball-core`;
//! this module is strictly CLI glue.
//!
//! ## How To Use
//! - For command-line users: use the installed `nightly-tarball` binary
//!   with `--help`.
//! - For programmatic/integration use: call [`run`] with a constructed
//!   [`Cli`].

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nightly_tarball_core::builder::Builder;
use nightly_tarball_core::config::ProjectConfig;
use nightly_tarball_core::contract::{Filer, Notifier};
use nightly_tarball_core::filer::LocalFiler;
use nightly_tarball_core::notify::{BuildReport, LogNotifier};
use nightly_tarball_core::plan::{BuildPlan, DefaultPlan, VersionFilePlan};
use nightly_tarball_core::snapshot::GitSnapshotter;

use crate::load_config::{load_config, CliConfig, PlanSection, StoreSection};
use crate::store::HttpFiler;

/// CLI for nightly-tarball: build and publish nightly snapshots per branch.
#[derive(Parser)]
#[clap(
    name = "nightly-tarball",
    version,
    about = "Nightly build pipeline: snapshot branches, build tarballs, publish and expire artifacts"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one build-and-publish pass over all configured branches
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn select_plan(config: &CliConfig) -> Box<dyn BuildPlan> {
    match &config.plan {
        PlanSection::Default { tarball_builder } => {
            Box::new(DefaultPlan::new(tarball_builder.clone()))
        }
        PlanSection::VersionFile { wrapper } => {
            let very_short = config
                .project_very_short_name
                .as_deref()
                .unwrap_or(&config.project_short_name);
            Box::new(VersionFilePlan::new(very_short, wrapper.clone()))
        }
    }
}

async fn run_pipeline<F: Filer>(
    project: ProjectConfig,
    filer: F,
    plan: Box<dyn BuildPlan>,
) -> BuildReport {
    let builder = Builder::new(project, filer, GitSnapshotter, plan);
    builder.run().await
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "run", "Starting nightly build pass");
            let project = config.to_project_config();
            project.trace_loaded();
            let plan = select_plan(&config);

            let report = match &config.store {
                StoreSection::Local { base } => {
                    run_pipeline(project, LocalFiler::new(base.clone()), plan).await
                }
                StoreSection::Http => {
                    let filer = HttpFiler::new_from_env().map_err(|e| {
                        anyhow::anyhow!("Failed to construct storage client from env: {e}")
                    })?;
                    run_pipeline(project, filer, plan).await
                }
            };

            if let Err(e) = LogNotifier.notify(&report).await {
                tracing::error!(error = %e, "Failed to deliver summary notification");
            }

            if report.is_healthy() {
                tracing::info!(command = "run", subject = %report.subject(), "Build pass complete");
                Ok(())
            } else {
                tracing::error!(command = "run", subject = %report.subject(), "Build pass had failures");
                Err(anyhow::anyhow!(
                    "failed branches: {:?}",
                    report.failed
                ))
            }
        }
    }
}
