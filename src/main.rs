use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod api;
mod cache;
mod compose;
mod compute;
mod config;
mod db;
mod error;
mod models;
mod partial;
mod provider;
mod report;
mod scheduler;
mod store;
mod table;
#[cfg(test)]
mod testing;
mod windows;

use crate::cache::{CachePopulationJob, RunOutcome};
use crate::compose::TreeComposer;
use crate::compute::SummaryComputer;
use crate::config::Config;
use crate::db::Database;

#[derive(Parser)]
#[command(name = "feedback-summary")]
#[command(about = "Course feedback summaries aggregated over the organisation tree", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Serve the read API and run the daily cache population
    Serve {
        /// Populate the cache once at startup
        #[arg(long)]
        production: bool,
    },
    /// Populate the summary cache once and exit
    PopulateCache,
    /// Print the composed summary tree of an organisation as JSON
    Summary {
        #[arg(long)]
        organisation: String,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Generate a markdown report for an organisation
    Report {
        #[arg(long)]
        organisation: String,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

type App = (
    TreeComposer<Database, Database, Database>,
    Arc<CachePopulationJob<Database, Database, Database>>,
);

fn build_app(database: Database, config: &Config) -> anyhow::Result<App> {
    let database = Arc::new(database);
    let computer = Arc::new(SummaryComputer::new(
        database.clone(),
        database.clone(),
        config.summary.upstream_timeout(),
        config.summary.min_feedback_count,
    ));
    let job = Arc::new(CachePopulationJob::new(
        database.clone(),
        computer.clone(),
        config.job_settings()?,
    ));
    let composer = TreeComposer::new(database.clone(), database, computer)
        .with_fallback_concurrency(config.database.max_connections as usize);
    Ok((composer, job))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load(cli.config.as_deref())?;
    let database_url = config.database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Serve { production } => {
            let run_at = config.cache.run_at_time()?;
            let (composer, job) = build_app(Database::new(pool), &config)?;

            let scheduler = scheduler::start(job.clone(), run_at, production || config.cache.run_on_start);
            let state = Arc::new(api::AppState {
                composer,
                job,
                hidden_organisations: config.server.hidden_organisations.iter().cloned().collect(),
            });

            let served = api::serve(state, config.server.port).await;
            scheduler.abort();
            served?;
        }
        Commands::PopulateCache => {
            let (_, job) = build_app(Database::new(pool), &config)?;
            match job.run().await? {
                RunOutcome::Completed(report) => {
                    println!(
                        "Wrote {} summaries for {} organisations across {} windows.",
                        report.documents_written,
                        report.organisations,
                        report.windows.len()
                    );
                    for failure in report.failures.iter() {
                        println!("- {} failed: {}", failure.organisation_id, failure.error);
                    }
                }
                RunOutcome::Skipped => println!("A population run is already in progress."),
            }
        }
        Commands::Summary {
            organisation,
            start_date,
            end_date,
        } => {
            let window =
                windows::window_or_default(start_date.as_deref(), end_date.as_deref(), windows::today())?;
            let (composer, _) = build_app(Database::new(pool), &config)?;
            let tree = composer.compose_organisation_summary(&organisation, window).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Commands::Report {
            organisation,
            start_date,
            end_date,
            out,
        } => {
            let window =
                windows::window_or_default(start_date.as_deref(), end_date.as_deref(), windows::today())?;
            let (composer, _) = build_app(Database::new(pool), &config)?;
            let tree = composer.compose_organisation_summary(&organisation, window).await?;
            let report = report::build_report(&tree, window);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
