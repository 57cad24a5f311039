use std::io;
use std::process::ExitCode;
use std::time::Duration;

use imgflow_rust::front::{serve_lines, DEFAULT_POLL_INTERVAL};
use imgflow_rust::{AppConfig, CoreError, Services};
use log::{error, info, warn};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Plazo para soltar la lectura bloqueante de stdin al cerrar el runtime.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };
    let services = match Services::build(config) {
        Ok(s) => s,
        Err(e) => {
            error!("bootstrap failed: {e}");
            return ExitCode::from(3);
        }
    };
    if let Err(e) = services.recover_abandoned() {
        warn!("could not recover abandoned jobs: {e}");
    }
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("tokio runtime failed: {}", CoreError::from(e));
            services.shutdown();
            return ExitCode::from(4);
        }
    };
    let served = runtime.block_on(serve(&services));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    // El ejecutor se drena fuera del runtime: `shutdown` bloquea.
    let report = services.shutdown();
    info!("main-service exit cancelled={} abandoned={}", report.cancelled, report.abandoned);
    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("front failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Lee órdenes de stdin y escribe cada respuesta en stdout en cuanto está
/// lista. Un único escritor serializa la salida.
async fn serve(services: &Services) -> io::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            stdout.write_all(format!("{response}\n").as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<(), io::Error>(())
    });
    info!("main-service ready backend={}", services.backend().as_str());
    let input = BufReader::new(tokio::io::stdin());
    let served = tokio::select! {
        served = serve_lines(services.orchestrator(), input, tx, DEFAULT_POLL_INTERVAL) => served,
        _ = tokio::signal::ctrl_c() => {
            warn!("ctrl-c received, draining");
            Ok(())
        }
    };
    match writer.await {
        Ok(written) => written?,
        Err(e) => return Err(io::Error::other(e)),
    }
    served
}
