use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use gridlock::engine::Engine;
use gridlock::limits::{DEFAULT_LOCK_TTL_SECS, DEFAULT_MAX_CONNECTIONS, DEFAULT_REAP_INTERVAL_SECS};
use gridlock::notify::NotifyHub;
use gridlock::store::MemoryDirectory;
use gridlock::{reaper, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("GRIDLOCK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    gridlock::observability::init(metrics_port);

    let port = std::env::var("GRIDLOCK_PORT").unwrap_or_else(|_| "7433".into());
    let bind = std::env::var("GRIDLOCK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let max_connections: usize = std::env::var("GRIDLOCK_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let lock_ttl = Duration::from_secs(
        std::env::var("GRIDLOCK_LOCK_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LOCK_TTL_SECS),
    );
    let reap_interval = Duration::from_secs(
        std::env::var("GRIDLOCK_REAP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REAP_INTERVAL_SECS),
    );

    let directory = match std::env::var("GRIDLOCK_SEED") {
        Ok(path) => {
            let path = PathBuf::from(path);
            info!("loading seed from {}", path.display());
            Arc::new(MemoryDirectory::load_seed(&path)?)
        }
        Err(_) => Arc::new(MemoryDirectory::new()),
    };

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        directory.clone(),
        directory,
        notify,
        lock_ttl,
    ));
    tokio::spawn(reaper::run_reaper(engine.clone(), reap_interval));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("gridlock listening on {addr}");
    info!("  max_connections: {max_connections}");
    info!("  lock_ttl: {}s", lock_ttl.as_secs());
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight sessions
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(gridlock::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(gridlock::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(gridlock::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until the session ends
                    if let Err(e) = wire::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(gridlock::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight sessions to finish (up to 10s)
    info!("draining sessions...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all sessions drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} sessions still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("gridlock stopped");
    Ok(())
}
