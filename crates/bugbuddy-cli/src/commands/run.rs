//! Monitor: run a command line step by step and hand each step's stderr
//! to the daemon.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use bugbuddy_protocol::CollectPayload;
use bugbuddy_rpc::{Connection, ConnectionOptions};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

static CHAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(&&|\|\|)\s*").expect("chain operator regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// Run only if the previous step succeeded.
    And,
    /// Run only if the previous step failed.
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub command: String,
    /// How this step hangs off the one before it.
    pub after: Option<Chain>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub code: i32,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Exit code of the last step that ran.
    pub exit_code: i32,
    pub steps_run: usize,
    pub recognized: u32,
}

/// Split a command line on `&&` and `||`.
pub fn parse_steps(args: &[String]) -> Vec<Step> {
    let line = args.join(" ");
    let mut steps = Vec::new();
    let mut after = None;
    let mut start = 0;
    for op in CHAIN.find_iter(&line) {
        push_step(&mut steps, &line[start..op.start()], after);
        after = Some(if op.as_str().trim() == "&&" {
            Chain::And
        } else {
            Chain::Or
        });
        start = op.end();
    }
    push_step(&mut steps, &line[start..], after);
    steps
}

fn push_step(steps: &mut Vec<Step>, command: &str, after: Option<Chain>) {
    let command = command.trim().trim_matches('"').trim();
    if command.is_empty() {
        return;
    }
    steps.push(Step {
        command: command.to_string(),
        after: if steps.is_empty() { None } else { after },
    });
}

fn shell(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Run one step through the shell, echoing its stderr while capturing it.
pub async fn run_step(command: &str, working_dir: &Path) -> io::Result<StepOutcome> {
    let mut cmd = shell(command);
    cmd.current_dir(working_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let mut captured = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        let mut echo = tokio::io::stderr();
        let mut buf = [0u8; 4096];
        loop {
            let n = stderr.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            echo.write_all(&buf[..n]).await?;
            captured.extend_from_slice(&buf[..n]);
        }
        echo.flush().await?;
    }

    let status = child.wait().await?;
    Ok(StepOutcome {
        code: exit_code(status),
        stderr: String::from_utf8_lossy(&captured).into_owned(),
    })
}

/// Run `steps` in order, collecting every finished step when a daemon is given.
pub async fn run_steps(
    steps: &[Step],
    working_dir: &Path,
    daemon: Option<&Connection>,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for step in steps {
        let wanted = match step.after {
            None => true,
            Some(Chain::And) => summary.exit_code == 0,
            Some(Chain::Or) => summary.exit_code != 0,
        };
        if !wanted {
            debug!("Skipping {}", step.command);
            continue;
        }

        let outcome = run_step(&step.command, working_dir)
            .await
            .with_context(|| format!("Failed to run {}", step.command))?;
        debug!("{} exited with {}", step.command, outcome.code);
        summary.exit_code = outcome.code;
        summary.steps_run += 1;

        let Some(daemon) = daemon else {
            continue;
        };
        let payload = CollectPayload {
            error_code: outcome.code,
            command: step.command.clone(),
            error: outcome.stderr,
            working_dir: working_dir.to_string_lossy().into_owned(),
        };
        match daemon.collect(payload).await {
            Ok(response) => {
                summary.recognized += response.recognized;
                if let Some(error) = response.error {
                    debug!("Analyzer: {}", error);
                }
            }
            Err(e) => warn!("Failed to collect {}: {}", step.command, e),
        }
    }
    Ok(summary)
}

pub fn summary_line(recognized: u32) -> String {
    format!("Catched {} error/s.", recognized)
}

/// Returns the exit code of the last step.
pub async fn execute(command: Vec<String>, options: ConnectionOptions) -> Result<i32> {
    let steps = parse_steps(&command);
    if steps.is_empty() {
        bail!("No command to run");
    }
    let working_dir = std::env::current_dir().context("Failed to read working directory")?;

    let daemon = Connection::new(options);
    let connected = match daemon.connect().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Daemon unavailable, errors will not be collected: {}", e);
            false
        }
    };
    let summary = run_steps(&steps, &working_dir, connected.then_some(&daemon)).await;
    if connected {
        if let Err(e) = daemon.close().await {
            debug!("Failed to close daemon connection: {}", e);
        }
    }

    let summary = summary?;
    println!("{}", summary_line(summary.recognized));
    Ok(summary.exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        vec![line.to_string()]
    }

    #[test]
    fn test_single_argument_is_split() {
        let steps = parse_steps(&args("gcc a.c -o a && ./a || echo failed"));
        assert_eq!(
            steps,
            vec![
                Step {
                    command: "gcc a.c -o a".into(),
                    after: None
                },
                Step {
                    command: "./a".into(),
                    after: Some(Chain::And)
                },
                Step {
                    command: "echo failed".into(),
                    after: Some(Chain::Or)
                },
            ]
        );
    }

    #[test]
    fn test_quoted_line_and_separate_args() {
        let steps = parse_steps(&args("\"make && ./run\""));
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].command, "make");
        assert_eq!(steps[1].command, "./run");

        let steps = parse_steps(&["python3".to_string(), "app.py".to_string()]);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].command, "python3 app.py");
    }

    #[test]
    fn test_empty_steps_are_dropped() {
        assert!(parse_steps(&args("  ")).is_empty());
        let steps = parse_steps(&args("&& ls"));
        assert_eq!(
            steps,
            vec![Step {
                command: "ls".into(),
                after: None
            }]
        );
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line(2), "Catched 2 error/s.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_step_captures_stderr_and_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let outcome = run_step("echo oops >&2; exit 3", dir.path()).await.unwrap();
        assert_eq!(outcome.code, 3);
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chain_semantics() {
        let dir = tempfile::TempDir::new().unwrap();
        let steps = parse_steps(&args("false && touch skipped || touch rescued"));
        let summary = run_steps(&steps, dir.path(), None).await.unwrap();

        assert_eq!(summary.exit_code, 0);
        assert_eq!(summary.steps_run, 2);
        assert!(!dir.path().join("skipped").exists());
        assert!(dir.path().join("rescued").exists());
    }
}
