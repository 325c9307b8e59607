use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

use bugbuddy_protocol::DEFAULT_LSP_PORT;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "bugbuddy")]
#[command(about = "bugbuddy - explains the errors your programs print")]
#[command(version)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Command to monitor when no subcommand is given (`bugbuddy -- python3 app.py`)
    #[arg(last = true, value_name = "COMMAND")]
    pub monitored: Vec<String>,

    /// Daemon port (defaults to $BUGBUDDY_DAEMON_PORT or 3434)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Data directory (defaults to $BUGBUDDY_DIR or ~/.bugbuddy)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Set log level (off, error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose logging (shortcut for --log-level=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command and send its errors to the daemon
    Run {
        /// Command line; a single argument may chain steps with && and ||
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Start the daemon in the foreground
    Daemon,

    /// Start the editor gateway
    ///
    /// Speaks LSP over stdin/stdout unless --tcp is given.
    Lsp {
        /// Listen for editors on TCP instead of stdio
        #[arg(long)]
        tcp: bool,

        /// TCP port for --tcp
        #[arg(long, default_value_t = DEFAULT_LSP_PORT)]
        lsp_port: u16,
    },

    /// Print the command an editor would use to run a file
    RunCommand {
        /// Editor language id, e.g. python
        language_id: String,

        file: PathBuf,
    },

    /// Explain an error read from stdin without a daemon
    Analyze {
        /// Directory relative traceback paths are resolved against
        #[arg(short = 'w', long)]
        working_dir: Option<PathBuf>,
    },
}

impl Cli {
    /// Level used when `RUST_LOG` is unset.
    pub fn level(&self) -> LevelFilter {
        if self.verbose {
            return LevelFilter::DEBUG;
        }
        if let Some(level) = self.log_level {
            return level.into();
        }
        match self.command {
            Some(Commands::Daemon) => LevelFilter::INFO,
            _ => LevelFilter::WARN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_bare_command_is_monitored() {
        let cli = parse(&["bugbuddy", "--", "python3", "app.py"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.monitored, ["python3", "app.py"]);
    }

    #[test]
    fn test_run_keeps_hyphenated_args() {
        let cli = parse(&["bugbuddy", "run", "--", "ls", "-la"]);
        match cli.command {
            Some(Commands::Run { command }) => assert_eq!(command, ["ls", "-la"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["bugbuddy", "daemon", "--port", "4000", "--data-dir", "/tmp/bb"]);
        assert!(matches!(cli.command, Some(Commands::Daemon)));
        assert_eq!(cli.port, Some(4000));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/bb")));
        assert_eq!(cli.level(), LevelFilter::INFO);
    }

    #[test]
    fn test_lsp_defaults() {
        let cli = parse(&["bugbuddy", "lsp"]);
        match cli.command {
            Some(Commands::Lsp { tcp, lsp_port }) => {
                assert!(!tcp);
                assert_eq!(lsp_port, 3333);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cli.level(), LevelFilter::WARN);
    }

    #[test]
    fn test_verbose_wins() {
        let cli = parse(&["bugbuddy", "-v", "-l", "error", "analyze"]);
        assert_eq!(cli.level(), LevelFilter::DEBUG);
    }

    #[test]
    fn test_nothing_is_an_error() {
        assert!(Cli::try_parse_from(["bugbuddy"]).is_err());
    }
}
