//! Monitor steps against an in-process daemon.
//!
//! Run with: `cargo test -p bugbuddy-cli --test monitor`

#![cfg(unix)]

use std::time::Duration;

use bugbuddy_cli::commands::run::{parse_steps, run_steps};
use bugbuddy_daemon::Server;
use bugbuddy_protocol::{daemon_addr, ClientNotification, ClientType};
use bugbuddy_rpc::{Connection, ConnectionOptions};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn start_daemon() -> (u16, tokio::sync::broadcast::Sender<()>) {
    let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.run());
    (port, shutdown)
}

fn options(port: u16, client_type: ClientType, pid: u32) -> ConnectionOptions {
    ConnectionOptions::new(daemon_addr(port), client_type)
        .with_process_id(pid)
        .with_retry_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn test_each_step_is_collected() {
    let (port, shutdown) = start_daemon().await;
    let dir = TempDir::new().unwrap();

    let (tx, mut reports) = mpsc::unbounded_channel();
    let editor = Connection::with_notification_handler(
        options(port, ClientType::Lsp, 71),
        move |notification| match notification {
            ClientNotification::Report(report) => {
                let _ = tx.send(report);
            }
        },
    );
    editor.connect().await.unwrap();
    let monitor = Connection::new(options(port, ClientType::Monitor, 72));
    monitor.connect().await.unwrap();

    let steps = parse_steps(&[
        "echo \"NameError: name 'x' is not defined\" >&2; exit 2 || true".to_string(),
    ]);
    let summary = run_steps(&steps, dir.path(), Some(&monitor)).await.unwrap();

    assert_eq!(summary.steps_run, 2);
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.recognized, 1);

    let failed = timeout(Duration::from_secs(2), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.error_code, 2);
    assert_eq!(failed.template, "NameError");
    assert_eq!(failed.message, "NameError: name 'x' is not defined\n");

    // The clean `true` step is still reported, with nothing to show.
    let clean = timeout(Duration::from_secs(2), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(clean.error_code, 0);
    assert!(clean.message.is_empty());

    monitor.close().await.unwrap();
    editor.close().await.unwrap();
    let _ = shutdown.send(());
}
