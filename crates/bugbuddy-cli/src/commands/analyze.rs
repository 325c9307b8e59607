//! `bugbuddy analyze`: explain an error without a daemon.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use bugbuddy_daemon::analyzer::collect;
use bugbuddy_daemon::{PatternAnalyzer, VirtualFs};
use bugbuddy_protocol::CollectPayload;

pub const NO_MATCH: &str = "No matching template";

/// Explanation for `text`, with the failing location on its first line.
pub fn explain(text: &str, working_dir: &Path) -> String {
    let payload = CollectPayload {
        error_code: 1,
        command: String::new(),
        error: text.to_string(),
        working_dir: working_dir.to_string_lossy().into_owned(),
    };
    let (report, response) = collect(&PatternAnalyzer::new(), &VirtualFs::new(), &payload);
    if response.processed == 0 {
        return NO_MATCH.to_string();
    }
    match report.location {
        Some(location) => format!(
            "{}:{}:{}\n\n{}",
            location.document_path,
            location.start_pos.line + 1,
            location.start_pos.column + 1,
            report.full_message
        ),
        None => report.full_message,
    }
}

pub fn execute(working_dir: Option<&Path>) -> Result<()> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read stdin")?;
    let working_dir = match working_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    println!("{}", explain(&text, &working_dir));
    Ok(())
}
