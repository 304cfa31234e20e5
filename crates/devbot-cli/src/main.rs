use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use devbot_adapters::FixtureSource;
use devbot_core::{ActionKind, DevelopmentPermit, RecordKind, RezoningApplication};
use devbot_sync::{DevbotConfig, Sources, SyncPipeline, SyncRunSummary};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "devbot")]
#[command(about = "Follows City of Calgary development permits and rezonings for one neighbourhood")]
struct Cli {
    /// Config file; defaults to $DEVBOT_CONFIG, then ./config.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, reconcile, notify and save the new baseline.
    Sync,
    /// Fetch and reconcile only; prints the actions a sync would take.
    Examine {
        /// Read development permits from a saved open-data response.
        #[arg(long)]
        permits_file: Option<PathBuf>,
        /// Read rezoning applications from a saved open-data response.
        #[arg(long)]
        rezonings_file: Option<PathBuf>,
    },
    /// Print the lifecycle of one stored record.
    History { kind: RecordKind, key: String },
    /// Create empty snapshots so the first sync has a baseline.
    Init,
}

fn print_summary(summary: &SyncRunSummary, verbose: bool) {
    for outcome in &summary.kinds {
        println!(
            "{}: fetched={} stored={} create={} update={} close={} skip={}",
            outcome.kind,
            outcome.fetched,
            outcome.stored,
            outcome.count(ActionKind::Create),
            outcome.count(ActionKind::Update),
            outcome.count(ActionKind::Close),
            outcome.count(ActionKind::Skip),
        );
        if verbose {
            for action in outcome.actions.iter().filter(|a| a.kind != ActionKind::Skip) {
                println!("\n[{}] {}\n{}", action.kind, action.key, action.message);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let config = DevbotConfig::from_env_with_path(cli.config)?;
    let mut pipeline = SyncPipeline::new(config)?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = pipeline.run_once().await?;
            print_summary(&summary, false);
            println!(
                "sync complete: run_id={} reports={}",
                summary.run_id,
                summary.reports_dir.as_deref().unwrap_or("-")
            );
        }
        Commands::Examine {
            permits_file,
            rezonings_file,
        } => {
            if permits_file.is_some() || rezonings_file.is_some() {
                pipeline = pipeline.with_sources(Sources {
                    permits: permits_file
                        .map(|p| Box::new(FixtureSource::<DevelopmentPermit>::new(p)) as Box<_>),
                    rezonings: rezonings_file
                        .map(|p| Box::new(FixtureSource::<RezoningApplication>::new(p)) as Box<_>),
                });
            }
            let summary = pipeline.examine().await?;
            print_summary(&summary, true);
        }
        Commands::History { kind, key } => {
            println!("{}", pipeline.history(kind, &key).await?);
        }
        Commands::Init => {
            let created = pipeline.init().await?;
            if created.is_empty() {
                println!("snapshots already present in {}", pipeline.store().root().display());
            }
            for kind in created {
                println!("created {}", pipeline.store().path_for(kind).display());
            }
        }
    }

    Ok(())
}
