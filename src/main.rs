//! Backup job runner
//!
//! Provides CLI interface for running the scheduler and one-off job operations

// backupjobs/src/main.rs
use anyhow::{Context, Result};
use backupjobs::config::AppConfig;
use backupjobs::engine::Engine;
use backupjobs::retention::Sweeper;
use backupjobs::scheduler::Scheduler;
use backupjobs::telemetry::init_logging;
use chrono::Utc;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // A missing .env is fine; everything it can set may also come from the environment.
    let _ = dotenv::dotenv();

    let config_path = AppConfig::default_path();
    let app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;
    init_logging(&app_config.logging);

    let args: Vec<String> = env::args().skip(1).collect();
    let (choice, argument) = if args.is_empty() {
        let input = prompt_choice()?;
        let mut parts = input.split_whitespace().map(str::to_string);
        (parts.next().unwrap_or_default(), parts.next())
    } else {
        (args[0].trim().to_string(), args.get(1).cloned())
    };

    let engine = Arc::new(
        Engine::from_config(app_config)
            .await
            .context("Failed to initialise the backup engine")?,
    );

    match choice.as_str() {
        "1" | "serve" => serve(engine).await?,
        "2" | "run" => {
            let job_id = parse_job_id(argument.as_deref())?;
            let report = engine
                .execute_job(job_id)
                .await
                .with_context(|| format!("Failed to run job {}", job_id))?;
            match &report.reason {
                None => println!("✅ Backup {} of job {} finished.", report.backup_id, job_id),
                Some(reason) => anyhow::bail!("Backup {} failed: {}", report.backup_id, reason),
            }
        }
        "3" | "validate" => {
            let job_id = parse_job_id(argument.as_deref())?;
            match engine.validate_job(job_id).await? {
                None => println!("✅ Job {} is ready to run.", job_id),
                Some(reason) => anyhow::bail!("Job {} is not runnable: {}", job_id, reason),
            }
        }
        "4" | "sweep" => {
            let report = Sweeper::new(Arc::clone(&engine)).tick(Utc::now()).await;
            println!(
                "🧹 Examined {} backups, deleted {}, failed {}.",
                report.examined, report.deleted, report.failed
            );
        }
        "5" | "jobs" => {
            let jobs = engine.list_jobs().await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        _ => {
            println!("❌ Invalid choice. Enter 'serve', 'run <job>', 'validate <job>', 'sweep' or 'jobs'.");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Starts both timers and waits for Ctrl-C.
async fn serve(engine: Arc<Engine>) -> Result<()> {
    let config = engine.config();
    info!(
        scheduler_interval = ?config.scheduler.interval,
        retention_interval = ?config.retention.interval,
        storage_root = %config.storage_root.display(),
        "starting scheduler and retention sweep"
    );
    let scheduler = Scheduler::new(Arc::clone(&engine)).start();
    let sweeper = Sweeper::new(Arc::clone(&engine)).start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    scheduler.abort();
    sweeper.abort();
    Ok(())
}

fn parse_job_id(argument: Option<&str>) -> Result<u64> {
    let raw = argument.context("A job id is required")?;
    raw.parse()
        .with_context(|| format!("Invalid job id: {}", raw))
}

fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Run the scheduler (or type 'serve')");
    println!("2. Run a job now (or type 'run <job>')");
    println!("3. Validate a job (or type 'validate <job>')");
    println!("4. Sweep expired backups (or type 'sweep')");
    println!("5. List jobs (or type 'jobs')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
