//! `bugbuddy lsp`

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Result;
use bugbuddy_lsp::{listen, serve, GatewayConfig};
use tracing::info;

/// Serve editors; returns the process exit code.
pub async fn execute(port: u16, data_dir: &Path, tcp: Option<u16>) -> Result<i32> {
    let config = GatewayConfig::new(port, data_dir);
    match tcp {
        Some(lsp_port) => {
            listen(SocketAddr::from((Ipv4Addr::LOCALHOST, lsp_port)), config).await?;
            Ok(0)
        }
        None => {
            info!("Editor gateway on stdio, daemon port {}", port);
            let stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
            Ok(serve(stdio, config).await)
        }
    }
}
