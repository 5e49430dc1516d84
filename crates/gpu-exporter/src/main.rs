use anyhow::Result;
use clap::Parser;
use gpu_exporter::config::Cli;
use gpu_exporter::config::Commands;
use gpu_exporter::config::DaemonArgs;
use gpu_exporter::config::ExporterConfig;
use gpu_exporter::config::ScanArgs;
use gpu_exporter::encoders::create_encoder;
use gpu_exporter::exporter::Exporter;
use gpu_exporter::logging;
use gpu_exporter::runtime;
use tokio_util::sync::CancellationToken;
use utils::version;

/// Sets up global panic hooks.
fn setup_panic() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("gpu-exporter panicked: {panic_info}");
        original_hook(panic_info);
    }));
}

fn main() -> Result<()> {
    setup_panic();

    let cli = Cli::parse();

    // a scan abandoned inside a hung native call must not keep the process alive
    runtime::block_on(
        async move {
            match cli.command {
                Commands::Daemon(daemon_args) => run_daemon(daemon_args).await,
                Commands::Scan(scan_args) => run_scan(scan_args).await,
            }
        },
        runtime::SHUTDOWN_GRACE,
    )?
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    utils::logging::init();
    let (metrics_writer, _guard) = logging::metrics_writer(&daemon_args.metrics_file);

    tracing::info!("Starting gpu-exporter daemon {}", &**version::VERSION);

    let exporter = Exporter::new(
        daemon_args.collector.orchestrator(),
        create_encoder(&daemon_args.collector.metrics_format),
        metrics_writer,
        ExporterConfig::from(&daemon_args),
    );

    let token = CancellationToken::new();
    let exporter_task = tokio::spawn(exporter.run(token.clone()));

    shutdown_signal().await?;
    tracing::info!("Shutdown signal received, stopping exporter");
    token.cancel();

    if let Err(e) = exporter_task.await {
        tracing::error!("Exporter task failed during shutdown: {e}");
    }
    Ok(())
}

async fn run_scan(scan_args: ScanArgs) -> Result<()> {
    utils::logging::init();

    let mut exporter = Exporter::new(
        scan_args.collector.orchestrator(),
        create_encoder(&scan_args.collector.metrics_format),
        std::io::stdout(),
        ExporterConfig::from(&scan_args),
    );

    let report = exporter
        .scan_once(&CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    for error in &report.device_errors {
        tracing::warn!("{error}");
    }
    for error in &report.field_errors {
        tracing::warn!("{error}");
    }
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }
    Ok(())
}
