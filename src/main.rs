use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod accessor;
mod aggregate;
mod anomaly;
mod archive;
mod cache;
mod config;
mod db;
mod engine;
mod error;
#[cfg(test)]
mod fixtures;
mod forecast;
mod health;
mod logging;
mod models;
mod report;
mod scoring;
mod timeslot;
mod trend;
mod window;

use config::AnalyticsConfig;
use db::PgRecordAccessor;
use engine::{AnalyticsEngine, Freshness};

#[derive(Parser)]
#[command(name = "group-analytics")]
#[command(about = "Engagement, health and anomaly analytics for member groups", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to $GROUP_ANALYTICS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo group with realistic history
    Seed,
    /// Import attendance marks from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Forecast member engagement, most at-risk first
    Forecast {
        #[arg(long)]
        group: Uuid,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Ignore cached results
        #[arg(long)]
        refresh: bool,
    },
    /// Weekly group health indicators
    Health {
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        refresh: bool,
    },
    /// Detect period-over-period anomalies
    Anomalies {
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        refresh: bool,
    },
    /// Rank members by activity points
    Activity {
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        refresh: bool,
    },
    /// Attendance heatmap by weekday and time of day
    TimeSlots {
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        refresh: bool,
    },
    /// Most improved and steadiest members
    Compare {
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        refresh: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        group: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        /// Drop every cached result for the group first
        #[arg(long)]
        refresh: bool,
    },
    /// Recompute the engagement forecast on an interval
    Watch {
        #[arg(long)]
        group: Uuid,
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
        /// Stop after this many refreshes
        #[arg(long)]
        iterations: Option<u64>,
    },
}

fn freshness(refresh: bool) -> Freshness {
    if refresh {
        Freshness::Refetch
    } else {
        Freshness::Cached
    }
}

fn print_result<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text(value));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AnalyticsConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init(&config.logging);

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let engine = AnalyticsEngine::new(PgRecordAccessor::new(pool.clone()), config);
    let json = cli.json;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let group_id = db::seed(&pool).await?;
            println!("Seed data inserted for group {group_id}.");
        }
        Commands::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Imported {written} attendance marks from {}.", csv.display());
        }
        Commands::Forecast {
            group,
            limit,
            refresh,
        } => {
            let forecast = engine.engagement_forecast(group, freshness(refresh)).await?;
            print_result(json, &forecast, |forecast| report::render_forecast(forecast, limit))?;
        }
        Commands::Health { group, refresh } => {
            let trends = engine.health_trends(group, freshness(refresh)).await?;
            print_result(json, &trends, report::render_health)?;
        }
        Commands::Anomalies { group, refresh } => {
            let anomalies = engine.anomalies(group, freshness(refresh)).await?;
            print_result(json, &anomalies, report::render_anomalies)?;
        }
        Commands::Activity { group, refresh } => {
            let activity = engine.activity_scores(group, freshness(refresh)).await?;
            print_result(json, &activity, report::render_activity)?;
        }
        Commands::TimeSlots { group, refresh } => {
            let analysis = engine.time_slots(group, freshness(refresh)).await?;
            print_result(json, &analysis, report::render_time_slots)?;
        }
        Commands::Compare { group, refresh } => {
            let comparison = engine.member_comparison(group, freshness(refresh)).await?;
            print_result(json, &comparison, report::render_comparison)?;
        }
        Commands::Report {
            group,
            out,
            refresh,
        } => {
            if refresh {
                engine.invalidate_group(group).await;
            }
            let (forecast, health, anomalies, activity) = tokio::try_join!(
                engine.engagement_forecast(group, Freshness::Cached),
                engine.health_trends(group, Freshness::Cached),
                engine.anomalies(group, Freshness::Cached),
                engine.activity_scores(group, Freshness::Cached),
            )?;
            let report = report::build_report(&report::ReportInput {
                group_id: group,
                generated_at: forecast.generated_at,
                forecast: &forecast,
                health: &health,
                anomalies: &anomalies,
                activity: &activity,
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Watch {
            group,
            interval_secs,
            iterations,
        } => {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            let mut runs = 0u64;
            loop {
                ticker.tick().await;
                match engine.engagement_forecast(group, Freshness::Cached).await {
                    Ok(forecast) => println!(
                        "{} members, {} at risk (computed {})",
                        forecast.total_count,
                        forecast.risk_count,
                        forecast.generated_at.format("%H:%M:%S")
                    ),
                    Err(error) => tracing::warn!(%error, "scheduled refresh failed"),
                }

                runs += 1;
                if iterations.is_some_and(|limit| runs >= limit) {
                    break;
                }
            }
        }
    }

    Ok(())
}
