//! TCP server for the daemon's JSON-RPC plane

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bugbuddy_rpc::{transport, RpcSession};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::analyzer::ErrorAnalyzer;
use crate::dispatcher::Dispatcher;

/// How often a detached daemon checks whether any peer is left.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(15);

pub struct Server {
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: Arc<Dispatcher>,
    idle_check: Option<Duration>,
}

impl Server {
    /// Bind with the built-in analyzer.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::with_dispatcher(addr, Dispatcher::default()).await
    }

    pub async fn bind_with_analyzer(
        addr: SocketAddr,
        analyzer: Arc<dyn ErrorAnalyzer>,
    ) -> Result<Self> {
        Self::with_dispatcher(addr, Dispatcher::new(analyzer)).await
    }

    async fn with_dispatcher(addr: SocketAddr, dispatcher: Dispatcher) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind daemon on {}", addr))?;
        let (shutdown_tx, _) = broadcast::channel(1);

        info!("Daemon listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            shutdown_tx,
            dispatcher: Arc::new(dispatcher),
            idle_check: None,
        })
    }

    /// Exit once no peer is registered, checking every `period`.
    pub fn with_idle_check(mut self, period: Duration) -> Self {
        self.idle_check = Some(period);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a shutdown sender for external shutdown triggers
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run the server until shutdown
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut idle = self.idle_check.map(idle_ticker);
        let mut sessions: Vec<RpcSession> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            if let Err(e) = transport::configure(&stream, Some(transport::KEEPALIVE_PERIOD)) {
                                debug!("Could not configure socket for {}: {}", peer, e);
                            }
                            let session = RpcSession::spawn(stream, self.dispatcher.clone());
                            debug!("Accepted {} as {}", peer, session.id());
                            sessions.retain(|s| !s.is_closed());
                            sessions.push(session);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = tick(&mut idle) => {
                    if self.dispatcher.registry().is_empty() {
                        info!("No peers left, exiting");
                        break;
                    }
                }
            }
        }

        let peers = self.dispatcher.registry().drain();
        debug!("Dropping {} registered peer(s)", peers.len());
        for session in sessions {
            session.close();
        }
        Ok(())
    }
}

fn idle_ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(idle: &mut Option<Interval>) {
    match idle {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugbuddy_protocol::{ClientType, PeerIdentity};
    use tracing_test::traced_test;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_shutdown_handle_stops_run() {
        let server = Server::bind(localhost()).await.unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_idle_check_exits_without_peers() {
        let server = Server::bind(localhost())
            .await
            .unwrap()
            .with_idle_check(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(2), server.run())
            .await
            .unwrap()
            .unwrap();
        assert!(logs_contain("No peers left"));
    }

    #[tokio::test]
    async fn test_idle_check_waits_for_registered_peer() {
        let server = Server::bind(localhost())
            .await
            .unwrap()
            .with_idle_check(Duration::from_millis(20));
        let addr = server.local_addr().unwrap();
        let registry = server.dispatcher().registry().clone();

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        struct Quiet;
        #[async_trait::async_trait]
        impl bugbuddy_rpc::RequestHandler for Quiet {
            async fn handle(
                &self,
                _: &RpcSession,
                _: bugbuddy_protocol::Request,
            ) -> Option<bugbuddy_protocol::Response> {
                None
            }
        }
        let peer = RpcSession::spawn(stream, Arc::new(Quiet));
        registry.insert(PeerIdentity::new(1, ClientType::Lsp), peer.clone());

        let task = tokio::spawn(server.run());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!task.is_finished());

        registry.remove(1);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = Server::bind(localhost()).await.unwrap();
        let taken = first.local_addr().unwrap();
        assert!(Server::bind(taken).await.is_err());
    }
}
