use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Log to stderr; stdout carries LSP traffic and command output.
///
/// `RUST_LOG` overrides `level` when set.
pub fn init(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
