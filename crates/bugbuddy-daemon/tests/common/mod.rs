//! Shared fixtures for daemon integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use bugbuddy_daemon::{PeerRegistry, Server, VirtualFs};
use bugbuddy_protocol::ClientType;
use bugbuddy_rpc::ConnectionOptions;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A daemon bound to an ephemeral localhost port.
pub struct TestDaemon {
    pub addr: SocketAddr,
    pub registry: Arc<PeerRegistry>,
    pub vfs: Arc<VirtualFs>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestDaemon {
    pub async fn start() -> Result<Self> {
        let server = Server::bind("127.0.0.1:0".parse()?).await?;
        let addr = server.local_addr()?;
        let registry = server.dispatcher().registry().clone();
        let vfs = server.dispatcher().vfs().clone();
        let shutdown_tx = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Ok(Self {
            addr,
            registry,
            vfs,
            shutdown_tx,
            task,
        })
    }

    /// Connection options for a peer of this daemon, with fast retries and no spawning.
    pub fn options(&self, client_type: ClientType, process_id: u32) -> ConnectionOptions {
        ConnectionOptions::new(self.addr, client_type)
            .with_process_id(process_id)
            .with_retry_delay(Duration::from_millis(10))
            .with_should_retry(|attempt, _| attempt < 3)
    }

    /// Wait until `check` holds against the registry, or panic after a second.
    pub async fn wait_for(&self, check: impl Fn(&PeerRegistry) -> bool) {
        for _ in 0..100 {
            if check(&self.registry) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Registry never reached the expected state");
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}
