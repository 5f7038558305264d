//! Lifeguard daemon - polls SQS for autoscaling and alarm notifications and
//! runs the configured plugins for each one.
//!
//! Every configured listener gets its own SDK clients, resolves and configures
//! its queues, then polls them until the process receives SIGINT or SIGTERM.
//! A poll or stats task that ends on its own stops the daemon with an error.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::select_all;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lifeguard::{aws, Config, Directories, Listener, PluginRegistry, SqsQueueClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("lifeguard_starting");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        listeners = config.listeners.len(),
        dry_run = config.settings.dry_run,
        save_failures = config.settings.save_failures,
        listen_timeout_secs = config.settings.listen_timeout().as_secs_f64(),
        stats_interval_secs = config.settings.stats_interval,
        "config_loaded"
    );

    let actions = Arc::new(
        PluginRegistry::builtin()
            .resolve(&config)
            .context("Failed to resolve plugins")?,
    );
    let settings = Arc::new(config.settings.clone());

    let mut tasks = Vec::new();
    for (name, listener_config) in &config.listeners {
        let credentials = config
            .aws_credentials
            .get(&listener_config.credentials)
            .with_context(|| format!("Listener {name} has no usable credentials"))?;
        let sdk_config = aws::sdk_config(credentials, &listener_config.region).await;

        let listener = Listener::new(
            name.clone(),
            listener_config,
            Arc::clone(&settings),
            Arc::new(SqsQueueClient::new(&sdk_config)),
            Directories::aws(&sdk_config),
            Arc::clone(&actions),
        )
        .await
        .with_context(|| format!("Failed to start listener {name}"))?;

        listener
            .configure_queues()
            .await
            .with_context(|| format!("Failed to configure queues for listener {name}"))?;

        tasks.extend(Arc::new(listener).listen());
    }

    info!(tasks = tasks.len(), "lifeguard_ready");

    let outcome = supervise(&mut tasks, shutdown_signal()).await;

    info!("lifeguard_stopping");
    for task in &tasks {
        task.abort();
    }
    info!("lifeguard_shutdown_complete");
    outcome
}

/// Wait for `shutdown`, or fail as soon as any task ends first.
async fn supervise(tasks: &mut [JoinHandle<()>], shutdown: impl Future<Output = ()>) -> Result<()> {
    if tasks.is_empty() {
        shutdown.await;
        return Ok(());
    }

    tokio::select! {
        _ = shutdown => Ok(()),
        (result, index, _) = select_all(tasks.iter_mut()) => {
            match &result {
                Ok(()) => error!(task = index, "listener_task_exited"),
                Err(e) => error!(task = index, error = %e, "listener_task_exited"),
            }
            Err(anyhow!("listener task {index} exited unexpectedly"))
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "sigint_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
