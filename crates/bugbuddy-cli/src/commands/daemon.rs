//! `bugbuddy daemon`

use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use bugbuddy_daemon::{Server, IDLE_CHECK_INTERVAL};
use bugbuddy_protocol::{daemon_addr, ensure_data_dir};
use tracing::{info, warn};

pub async fn execute(port: u16, data_dir: &Path) -> Result<()> {
    ensure_data_dir(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let mut server = Server::bind(daemon_addr(port)).await?;
    // A daemon launched by a peer has no terminal and exits once it is unused.
    if !std::io::stdin().is_terminal() {
        info!("Detached, exiting when idle for {:?}", IDLE_CHECK_INTERVAL);
        server = server.with_idle_check(IDLE_CHECK_INTERVAL);
    }

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Stopping daemon");
        let _ = shutdown.send(());
    });

    server.run().await
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
