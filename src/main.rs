use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod grades;
mod models;
mod report;
mod snapshot;

use config::{CategoryWeights, MissingCategoryPolicy, DEFAULT_THRESHOLD};
use grades::Calculator;
use models::ClassId;
use snapshot::RecordFilter;

#[derive(Parser)]
#[command(name = "grade-aggregates")]
#[command(about = "Weighted grade statistics for Group Scholar classes", long_about = None)]
struct Cli {
    /// Category weights, e.g. exam=0.5,quiz=0.3,homework=0.2
    #[arg(
        long,
        global = true,
        env = "GRADE_WEIGHTS",
        default_value = "exam=0.5,quiz=0.3,homework=0.2"
    )]
    weights: CategoryWeights,

    /// How a category without scores affects the weighted average
    #[arg(long, global = true, value_enum, default_value_t = MissingCategoryPolicy::Zero)]
    missing_category: MissingCategoryPolicy,

    /// Read grade records from a JSON snapshot instead of Postgres
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grades from a CSV or JSON file
    #[command(group(
        ArgGroup::new("source")
            .args(["csv", "json_file"])
            .required(true)
            .multiple(false)
    ))]
    Import {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long = "json-file")]
        json_file: Option<PathBuf>,
    },
    /// Create lookup indexes on learner and class ids
    CreateIndexes,
    /// Count learners whose weighted average is above the threshold
    PassRate {
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
    /// Weighted average of one learner in each of their classes
    LearnerClasses {
        #[arg(long)]
        learner: i64,
    },
    /// Per-entry statistics for one class
    ClassStats {
        #[arg(long)]
        class: ClassId,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
    /// Overall weighted average of every learner
    LearnerAverages,
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<ClassId>,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance (or pass --snapshot)")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_records(
    snapshot_path: Option<&Path>,
    filter: &RecordFilter,
) -> anyhow::Result<Vec<models::GradeRecord>> {
    match snapshot_path {
        Some(path) => {
            let records = snapshot::load(path)?;
            Ok(snapshot::select(&records, filter))
        }
        None => {
            let pool = connect().await?;
            db::fetch_records(&pool, filter).await
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let calculator = Calculator::new(cli.weights, cli.missing_category);
    let snapshot_path = cli.snapshot.as_deref();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} scores written).");
        }
        Commands::Import { csv, json_file } => {
            let pool = connect().await?;
            if let Some(path) = csv {
                let inserted = db::import_csv(&pool, &path).await?;
                println!("Wrote {inserted} scores from {}.", path.display());
            } else if let Some(path) = json_file {
                let inserted = db::import_json(&pool, &path).await?;
                println!("Wrote {inserted} scores from {}.", path.display());
            }
        }
        Commands::CreateIndexes => {
            let pool = connect().await?;
            db::create_indexes(&pool).await?;
            println!("Indexes created.");
        }
        Commands::PassRate { threshold } => {
            let records = load_records(snapshot_path, &RecordFilter::All).await?;
            let count = calculator.pass_rate_above(&records, threshold);
            tracing::info!(records = records.len(), threshold, "computed pass rate");

            if cli.json {
                print_json(&count)?;
            } else {
                println!(
                    "{} learners have a weighted average above {:.1}.",
                    count.learners_above_threshold, threshold
                );
            }
        }
        Commands::LearnerClasses { learner } => {
            let records = load_records(snapshot_path, &RecordFilter::Learner(learner)).await?;
            let averages = calculator.per_class_averages_for_learner(&records);

            if cli.json {
                print_json(&averages)?;
            } else if averages.is_empty() {
                println!("No grade records found for learner {learner}.");
            } else {
                println!("Weighted averages for learner {learner}:");
                for average in averages.iter() {
                    println!("- class {}: {:.2}", average.class_id, average.average);
                }
            }
        }
        Commands::ClassStats { class, threshold } => {
            let records = load_records(snapshot_path, &RecordFilter::Class(class.clone())).await?;

            match grades::class_summary(&class, &records, threshold) {
                Some(summary) if cli.json => print_json(&summary)?,
                Some(summary) => {
                    println!(
                        "Class {}: {} learners, {} above {:.1} ({:.2}%).",
                        summary.class_id,
                        summary.total_learners,
                        summary.above_threshold_count,
                        threshold,
                        summary.above_threshold_percentage
                    );
                }
                None => println!("No data found for class {class}."),
            }
        }
        Commands::LearnerAverages => {
            let records = load_records(snapshot_path, &RecordFilter::All).await?;
            let averages = calculator.learner_averages(&records);

            if cli.json {
                print_json(&averages)?;
            } else if averages.is_empty() {
                println!("No grade records found.");
            } else {
                for average in averages.iter() {
                    println!("- learner {}: {:.2}", average.learner_id, average.average);
                }
            }
        }
        Commands::Report {
            class,
            threshold,
            out,
        } => {
            let filter = class
                .clone()
                .map(RecordFilter::Class)
                .unwrap_or(RecordFilter::All);
            let records = load_records(snapshot_path, &filter).await?;
            let report = report::build_report(
                class.as_ref(),
                threshold,
                chrono::Utc::now().date_naive(),
                &calculator,
                &records,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
