use anyhow::Context;
use clap::Parser;
use cuectl::{Application, Config, telemetry};

/// Resolves on SIGTERM or Ctrl+C
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cleaning up...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, cleaning up...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    cuectl::install_crypto_provider();

    let args = cuectl::config::Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(&config.logging, config.enable_otel_export)?;
    tracing::debug!("{:?}", args);

    let document = config
        .document
        .path
        .clone()
        .context("No document given. Pass a path or set document.path in the config file.")?;

    let app = Application::new(config)?;
    let stdout = std::io::stdout();
    let result = app.run_until(&document, &mut stdout.lock(), shutdown_signal()).await;

    telemetry::shutdown_telemetry();
    result?;
    Ok(())
}
