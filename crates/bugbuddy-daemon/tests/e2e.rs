//! End-to-end flow: a monitor collects an error, the editor gets the report.
//!
//! Run with: `cargo test -p bugbuddy-daemon --test e2e`

mod common;

use std::time::Duration;

use bugbuddy_protocol::{ClientNotification, ClientType, CollectPayload, INVALID_PARAMS};
use bugbuddy_rpc::{Connection, ConnectionError};
use common::TestDaemon;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TRACEBACK: &str = "Traceback (most recent call last):\n  File \"hello.py\", line 1, in <module>\n    print(a)\nNameError: name 'a' is not defined\n";

fn collecting(
    daemon: &TestDaemon,
    client_type: ClientType,
    pid: u32,
) -> (Connection, mpsc::UnboundedReceiver<ClientNotification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Connection::with_notification_handler(daemon.options(client_type, pid), move |n| {
        let _ = tx.send(n);
    });
    (conn, rx)
}

#[tokio::test]
async fn test_collected_error_reaches_only_editors() {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let project = TempDir::new().unwrap();
    let working_dir = project.path().to_string_lossy().into_owned();
    let source = project.path().join("hello.py");

    let (monitor, mut monitor_rx) = collecting(&daemon, ClientType::Monitor, 1);
    let (editor, mut editor_rx) = collecting(&daemon, ClientType::Lsp, 2);
    monitor.connect().await.unwrap();
    editor.connect().await.unwrap();

    editor
        .resolve_document(&source.to_string_lossy(), "print(a)\n")
        .await
        .unwrap();

    let counters = monitor
        .collect(CollectPayload {
            error_code: 1,
            command: "python3 hello.py".into(),
            error: TRACEBACK.into(),
            working_dir,
        })
        .await
        .unwrap();
    assert_eq!((counters.recognized, counters.processed), (1, 1));
    assert!(counters.error.is_none());

    let ClientNotification::Report(report) = timeout(Duration::from_secs(2), editor_rx.recv())
        .await
        .expect("no report in time")
        .expect("channel closed");
    assert_eq!(report.message, TRACEBACK);
    assert_eq!(report.template, "NameError");
    assert_eq!(report.language, "python");
    assert_eq!(report.error_code, 1);
    assert!(report.full_message.contains("`a`"));
    let location = report.location.expect("location");
    assert_eq!(location.document_path, source.to_string_lossy());
    assert_eq!((location.start_pos.line, location.start_pos.column), (0, 6));

    // Exactly one report, none for the monitor.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(editor_rx.try_recv().is_err());
    assert!(monitor_rx.try_recv().is_err());

    monitor.close().await.unwrap();
    editor.close().await.unwrap();
    daemon.wait_for(|r| r.is_empty()).await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_document_round_trip() {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let editor = Connection::new(daemon.options(ClientType::Lsp, 40));
    editor.connect().await.unwrap();

    editor.resolve_document("/virtual/a.py", "x = 1").await.unwrap();
    editor.update_document("/virtual/a.py", "x = 2").await.unwrap();
    let doc = editor.retrieve_document("/virtual/a.py").await.unwrap();
    assert_eq!(doc.filepath, "/virtual/a.py");
    assert_eq!(doc.content, "x = 2");

    editor.delete_document("/virtual/a.py").await.unwrap();
    let err = editor.retrieve_document("/virtual/a.py").await.unwrap_err();
    assert!(matches!(err, ConnectionError::Rpc(ref e) if e.code == INVALID_PARAMS));

    editor.close().await.unwrap();
    daemon.stop().await;
}

#[tokio::test]
async fn test_unknown_client_never_registers() {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let stranger = Connection::new(daemon.options(ClientType::Unknown, 77));

    let err = stranger.connect().await.unwrap_err();

    assert!(matches!(err, ConnectionError::Handshake(_)));
    assert!(!daemon.registry.contains(77));
    daemon.stop().await;
}

#[tokio::test]
async fn test_clean_run_still_notifies_editor() {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let (monitor, _monitor_rx) = collecting(&daemon, ClientType::Monitor, 50);
    let (editor, mut editor_rx) = collecting(&daemon, ClientType::Lsp, 51);
    monitor.connect().await.unwrap();
    editor.connect().await.unwrap();

    let counters = monitor
        .collect(CollectPayload {
            error_code: 0,
            command: "python3 ok.py".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!((counters.recognized, counters.processed), (0, 0));

    let ClientNotification::Report(report) = timeout(Duration::from_secs(2), editor_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.error_code, 0);
    assert!(report.message.is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn test_late_editor_receives_earlier_reports() {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let (monitor, _monitor_rx) = collecting(&daemon, ClientType::Monitor, 60);
    monitor.connect().await.unwrap();
    monitor
        .collect(CollectPayload {
            error_code: 1,
            command: "python3 hello.py".into(),
            error: TRACEBACK.into(),
            working_dir: ".".into(),
        })
        .await
        .unwrap();

    let (editor, mut editor_rx) = collecting(&daemon, ClientType::Lsp, 61);
    editor.connect().await.unwrap();

    let ClientNotification::Report(report) = timeout(Duration::from_secs(2), editor_rx.recv())
        .await
        .expect("no replayed report in time")
        .expect("channel closed");
    assert_eq!(report.message, TRACEBACK);
    assert_eq!(report.template, "NameError");

    // A second monitor sees nothing replayed.
    let (late_monitor, mut late_rx) = collecting(&daemon, ClientType::Monitor, 62);
    late_monitor.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(late_rx.try_recv().is_err());

    daemon.stop().await;
}
