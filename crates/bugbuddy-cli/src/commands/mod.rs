//! Subcommand entry points.

pub mod analyze;
pub mod daemon;
pub mod lsp;
pub mod run;
pub mod run_command;

use std::time::Duration;

use anyhow::Result;
use bugbuddy_protocol::{daemon_addr, daemon_port, data_dir as default_data_dir, ClientType};
use bugbuddy_rpc::{ConnectionOptions, ProcessSpawner};

use crate::cli::{Cli, Commands};

/// Options for a monitor connection that launches a daemon when none answers.
pub fn monitor_options(port: u16, data_dir: &std::path::Path) -> ConnectionOptions {
    let spawner = ProcessSpawner::new().with_data_dir(data_dir);
    ConnectionOptions::new(daemon_addr(port), ClientType::Monitor)
        .with_auto_spawn(true)
        .with_spawner(std::sync::Arc::new(spawner))
        .with_retry_delay(Duration::from_millis(500))
}

/// Run the parsed command line, returning the process exit code.
pub async fn execute(cli: Cli) -> Result<i32> {
    let port = cli.port.unwrap_or_else(daemon_port);
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    match cli.command {
        Some(Commands::Run { command }) => {
            run::execute(command, monitor_options(port, &data_dir)).await
        }
        None => run::execute(cli.monitored, monitor_options(port, &data_dir)).await,
        Some(Commands::Daemon) => daemon::execute(port, &data_dir).await.map(|()| 0),
        Some(Commands::Lsp { tcp, lsp_port }) => {
            lsp::execute(port, &data_dir, tcp.then_some(lsp_port)).await
        }
        Some(Commands::RunCommand { language_id, file }) => {
            run_command::execute(&data_dir, &language_id, &file).map(|()| 0)
        }
        Some(Commands::Analyze { working_dir }) => {
            analyze::execute(working_dir.as_deref()).map(|()| 0)
        }
    }
}
