use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tasklist_server::{AppState, ServerConfig};
use tasklist_store::{Database, TaskRepo};
use tasklist_telemetry::{LogQuery, TelemetryConfig};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "tasklist", version, about = "A small server-rendered to-do list")]
struct Cli {
    /// Task database file.
    #[arg(long, global = true, env = "TASKLIST_DB")]
    db: Option<PathBuf>,

    /// Log as newline-delimited JSON.
    #[arg(long, global = true, env = "TASKLIST_LOG_JSON")]
    log_json: bool,

    /// Log database receiving warn+ records.
    #[arg(long, global = true, env = "TASKLIST_LOG_DB")]
    log_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the web app until Ctrl-C.
    Serve {
        #[arg(long, env = "PORT", default_value_t = 7070)]
        port: u16,

        #[arg(long, env = "TASKLIST_BIND", default_value = "0.0.0.0")]
        bind: String,

        #[arg(long, env = "TASKLIST_STATIC_DIR", default_value = "public")]
        static_dir: PathBuf,

        /// Reset the task list to the sample tasks before serving.
        #[arg(long)]
        seed: bool,
    },

    /// Replace every task with the sample tasks.
    Seed,

    /// Print persisted warn+ log records, newest first.
    Logs {
        /// Only records at this level or more severe (warn, error).
        #[arg(long)]
        level: Option<Level>,

        /// Only records raised while handling this task.
        #[arg(long)]
        task: Option<String>,

        /// Only records whose target contains this text, e.g. `store`.
        #[arg(long)]
        target: Option<String>,

        /// Only records logged at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = tasklist_telemetry::init_telemetry(&TelemetryConfig {
        json: cli.log_json,
        log_db_path: Some(
            cli.log_db
                .clone()
                .unwrap_or_else(tasklist_telemetry::default_log_db_path),
        ),
        ..Default::default()
    })?;

    if let Command::Logs {
        level,
        task,
        target,
        since,
        limit,
    } = &cli.command
    {
        let log = telemetry.logs().context("log database is unavailable")?;
        let records = log.query(&LogQuery {
            min_level: *level,
            task_id: task.clone(),
            target: target.clone(),
            since: *since,
            limit: Some(*limit),
        })?;
        for r in records {
            println!(
                "{} {:5} {} [{} {}] {}{}",
                r.logged_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                r.level,
                r.target,
                r.task_id.as_deref().unwrap_or("-"),
                r.operation.as_deref().unwrap_or("-"),
                r.message,
                r.fields.map(|f| format!(" {f}")).unwrap_or_default(),
            );
        }
        return Ok(());
    }

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| tasklist_telemetry::home_dir().join(".tasklist").join("tasks.db"));
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open task database at {}", db_path.display()))?;
    let tasks = TaskRepo::new(db.clone());

    match cli.command {
        Command::Serve {
            port,
            bind,
            static_dir,
            seed,
        } => {
            if seed {
                run_seed(&tasks)?;
            }

            let state = AppState::new(tasks).context("failed to compile templates")?;
            let config = ServerConfig {
                bind,
                port,
                static_dir,
            };
            let handle = tasklist_server::start(config, state)
                .await
                .context("failed to start server")?;
            tracing::info!(port = handle.port, "tasklist ready");

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
            handle.shutdown().await;
        }
        Command::Seed => run_seed(&tasks)?,
        Command::Logs { .. } => {}
    }

    db.close().context("failed to close task database")?;
    Ok(())
}

fn run_seed(tasks: &TaskRepo) -> anyhow::Result<()> {
    let report = tasklist_store::seed(tasks).context("seeding failed")?;
    if !report.is_complete() {
        tracing::warn!(failed = report.failed, "some sample tasks were not inserted");
    }
    println!(
        "seeded {} tasks ({} removed)",
        report.created.len(),
        report.wiped
    );
    Ok(())
}
