mod api;
mod cli;
mod db;
mod router;
mod startup;
mod state;

use std::collections::BTreeSet;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use renec_core::{Config, EntityKind, JobMode, Scope, Shutdown};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    renec_core::config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        None => serve(&config, &cli, false).await,
        Some(Command::Serve { no_scheduler }) => serve(&config, &cli, no_scheduler).await,
        Some(Command::Triggers) => print_triggers(&config, &cli).await,
        Some(Command::Enqueue {
            ref mode,
            ref kinds,
            ref keys,
            ref requested_by,
        }) => enqueue(&config, &cli, mode, kinds, keys, requested_by.clone()).await,
    }
}

async fn serve(config: &Config, cli: &Cli, no_scheduler: bool) -> anyhow::Result<()> {
    config.log_summary();

    let cors = router::cors_layer(&config.server.cors_origin)?;
    let backends = startup::init_backends(config, cli.memory).await?;
    let scheduler = startup::restored_scheduler(config, cli.rules.as_deref(), backends.queue.clone()).await?;
    let pool = startup::build_worker_pool(config, &backends)?;
    let state = startup::app_state(config, &backends, scheduler.clone());

    let shutdown = Shutdown::new();
    let mut tasks = pool.spawn(&shutdown);
    if no_scheduler {
        warn!("scheduler disabled, only on-demand jobs will run");
    } else {
        tasks.push(tokio::spawn(scheduler.run(shutdown.clone())));
    }

    let app = router::build_router(state, cors);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
            signal.trigger();
        })
        .await?;

    // Workers release in-flight jobs back to the queue before exiting.
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    info!("shutdown complete");
    Ok(())
}

async fn print_triggers(config: &Config, cli: &Cli) -> anyhow::Result<()> {
    let backends = startup::init_backends(config, true).await?;
    let scheduler = startup::detached_scheduler(config, cli.rules.as_deref(), backends.queue).await?;

    println!(
        "{:<20} {:<16} {:<16} {:<11} {:<8} {:<26} {}",
        "TRIGGER", "CRON", "MODE", "LANE", "ENABLED", "LAST FIRED", "NEXT FIRE"
    );
    for t in scheduler.triggers(Utc::now()).await {
        println!(
            "{:<20} {:<16} {:<16} {:<11} {:<8} {:<26} {}",
            t.name,
            t.cron,
            t.mode.as_str(),
            t.lane.as_str(),
            t.enabled,
            t.last_fired.map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".into()),
            t.next_fire.map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

async fn enqueue(
    config: &Config,
    cli: &Cli,
    mode: &str,
    kinds: &[String],
    keys: &[String],
    requested_by: Option<String>,
) -> anyhow::Result<()> {
    let mode: JobMode = mode.parse()?;
    let kinds = kinds
        .iter()
        .map(|k| k.parse::<EntityKind>())
        .collect::<Result<BTreeSet<_>, _>>()?;
    let scope = Scope::kinds(kinds).with_keys(keys.iter().cloned());

    let backends = startup::init_backends(config, cli.memory).await?;
    if backends.label == "memory" {
        warn!("enqueueing into an in-memory queue; the job is lost when this command exits");
    }
    let scheduler = startup::detached_scheduler(config, cli.rules.as_deref(), backends.queue).await?;
    let enqueued = scheduler.request_harvest(mode, scope, requested_by).await?;
    println!("{}", enqueued.job_id());
    Ok(())
}
