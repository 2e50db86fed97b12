use std::{future::IntoFuture, sync::Arc, time::Duration};

use clap::Parser;
use cwexporter_cloudwatch::{CloudWatchClient, MetricDataApi};
use cwexporter_collector::{
    BuildInfo, Collector, MetricQuerySpec, OwnHealthMetrics, WindowConfig, load_metric_files,
};
use cwexporter_common::time;
use cwexporter_server::{
    AppState, Cli, Command, MetricsCommand, commands, exporter_router, logging::init_tracing,
};
use tokio::sync::oneshot;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    cli.validate()?;
    let window = cli.window_config()?;
    let specs = load_metric_files(&cli.metrics_files)?;

    match &cli.command {
        Some(Command::Metrics(command)) => run_metrics_command(&cli, command, &specs, window).await,
        None => serve(&cli, specs, window).await,
    }
}

async fn run_metrics_command(
    cli: &Cli,
    command: &MetricsCommand,
    specs: &[MetricQuerySpec],
    window: WindowConfig,
) -> anyhow::Result<()> {
    match command {
        MetricsCommand::Display => {
            commands::write_output(&commands::display_descriptors(specs)?, None)
        }
        MetricsCommand::Get(args) => {
            let client = CloudWatchClient::new(cli.cloudwatch_config()?, cli.credential_provider()?)?;
            let output =
                commands::get_metric_data(&client, specs, &window.compute(time::now())).await?;
            let contents = commands::format_output(&output, args.out_format)?;
            commands::write_output(&contents, args.out_file.as_deref())
        }
    }
}

async fn serve(cli: &Cli, specs: Vec<MetricQuerySpec>, window: WindowConfig) -> anyhow::Result<()> {
    let cloudwatch_config = cli.cloudwatch_config()?;
    let shutdown_timeout = cli.shutdown_timeout()?;

    let client = CloudWatchClient::new(cloudwatch_config, cli.credential_provider()?)?;
    info!(
        region = %client.region(),
        endpoint = %client.endpoint(),
        role_arn = cli.role_arn.as_deref().unwrap_or("none"),
        queries = specs.len(),
        period_secs = window.period().as_secs(),
        lookback_secs = window.lookback().as_secs(),
        "cloudwatch client configured"
    );

    let build = BuildInfo::new(
        env!("CARGO_PKG_VERSION"),
        option_env!("CWEXPORTER_GIT_REVISION").unwrap_or("unknown"),
        option_env!("CWEXPORTER_GIT_BRANCH").unwrap_or("unknown"),
    );
    let api: Arc<dyn MetricDataApi> = Arc::new(client);
    let collector = Collector::new(api, specs, window, OwnHealthMetrics::new(&build))?
        .with_max_pages(cli.max_pages);

    let state = Arc::new(AppState {
        collector: Arc::new(collector),
        build,
        metrics_path: cli.metrics_path.clone(),
        health_path: cli.health_path.clone(),
    });
    let app = exporter_router(state);

    let addr = cli.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        %addr,
        metrics_path = %cli.metrics_path,
        health_path = %cli.health_path,
        "aws cloudwatch exporter listening"
    );

    let (stopping_tx, stopping_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining connections");
            drop(stopping_tx.send(()));
        })
        .into_future();

    tokio::select! {
        result = server => result?,
        () = drain_deadline(stopping_rx, shutdown_timeout) => {
            warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "graceful shutdown timed out, exiting"
            );
        }
    }

    info!("aws cloudwatch exporter stopped");
    Ok(())
}

/// Completes `timeout` after shutdown starts; never completes otherwise.
async fn drain_deadline(stopping: oneshot::Receiver<()>, timeout: Duration) {
    if stopping.await.is_ok() {
        tokio::time::sleep(timeout).await;
    } else {
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                None
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
            () = async {
                if let Some(signal) = terminate.as_mut() {
                    signal.recv().await;
                } else {
                    std::future::pending::<()>().await;
                }
            } => {}
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
