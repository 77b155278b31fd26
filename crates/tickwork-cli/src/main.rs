use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tickwork_core::{parse_duration, TickworkConfig};
use tickwork_scheduler::{JobScheduler, Registration, ScheduledTask, StatsMonitor};
use tracing::{debug, info, warn};

mod log_job;

use log_job::LogJob;

/// Run the jobs declared in a tickwork config file.
#[derive(Parser, Debug)]
#[command(name = "tickwork", version)]
struct Args {
    /// Config file (default: $TICKWORK_CONFIG, then ~/.tickwork/tickwork.toml).
    #[arg(long)]
    config: Option<String>,

    /// Print the scheduler status this often, e.g. "30s" or "1min".
    #[arg(long)]
    status_every: Option<String>,

    /// Print status as JSON, including per-job timings.
    #[arg(long)]
    json: bool,

    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long)]
    run_for: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickwork=info,tickwork_scheduler=info".into()),
        )
        .init();

    let args = Args::parse();

    // explicit flag > TICKWORK_CONFIG env > ~/.tickwork/tickwork.toml
    let config_path = args.config.clone().or_else(|| std::env::var("TICKWORK_CONFIG").ok());
    let config = TickworkConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TickworkConfig::default()
    });

    let status_every = args
        .status_every
        .as_deref()
        .map(|literal| parse_duration(Some(literal)))
        .transpose()?
        .map(Duration::from_secs);
    let run_for = args
        .run_for
        .as_deref()
        .map(|literal| parse_duration(Some(literal)))
        .transpose()?
        .map(Duration::from_secs);

    let scheduler = Arc::new(JobScheduler::from_config(&config));
    let monitor = StatsMonitor::new();

    for job in &config.jobs {
        let task = ScheduledTask::with_monitor(LogJob::from_config(job), Arc::new(monitor.clone()));
        let registration = match (&job.every, &job.on) {
            (Some(every), _) => scheduler.every(&task, every),
            (None, Some(on)) => scheduler.on(&task, on),
            (None, None) => continue,
        };
        if let Registration::Failed(e) = &registration {
            warn!(job = %job.name, code = e.code(), "job not registered: {}", e);
        } else if let Some(entry) = registration.entry() {
            debug!(job = %job.name, entry = entry.0, "job registered");
        }
    }

    scheduler.start()?;
    info!(jobs = config.jobs.len(), "tickwork running");

    if let Some(period) = status_every {
        let scheduler = Arc::clone(&scheduler);
        let monitor = monitor.clone();
        let json = args.json;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                print_status(&scheduler, &monitor, json);
            }
        });
    }

    match run_for {
        Some(limit) => tokio::time::sleep(limit).await,
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupt received");
        }
    }

    print_status(&scheduler, &monitor, args.json);
    scheduler.shutdown();
    info!("tickwork stopped");
    Ok(())
}

fn print_status(scheduler: &JobScheduler, monitor: &StatsMonitor, json: bool) {
    let report = scheduler.status();
    if !json {
        println!("{report}");
        return;
    }

    let timings: serde_json::Map<_, _> = monitor
        .snapshot()
        .into_iter()
        .map(|(label, stats)| {
            let value = serde_json::json!({
                "hits": stats.hits,
                "avg_ms": stats.average().as_millis() as u64,
                "min_ms": stats.min.as_millis() as u64,
                "max_ms": stats.max.as_millis() as u64,
                "last_ms": stats.last.as_millis() as u64,
            });
            (label, value)
        })
        .collect();

    match serde_json::to_value(&report) {
        Ok(mut value) => {
            value["timings"] = serde_json::Value::Object(timings);
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{text}"),
                Err(e) => warn!("status serialization failed: {}", e),
            }
        }
        Err(e) => warn!("status serialization failed: {}", e),
    }
}
