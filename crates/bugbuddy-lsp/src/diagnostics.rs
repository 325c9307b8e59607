//! Buffer of daemon error reports and their conversion to editor diagnostics.
//!
//! Reports arrive on the daemon connection's reader; a separate drain task
//! waits on [`ReportBuffer::changed`] and publishes whatever is pending.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bugbuddy_protocol::ErrorReport;
use lsp_types::{
    CodeDescription, Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range, Url,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

pub const DIAGNOSTIC_SOURCE: &str = "BugBuddy";

/// 32-bit FNV-1a.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash: u32, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}

#[derive(Debug, Default)]
struct Pending {
    /// `Some` publishes the report, `None` clears the document.
    reports: HashMap<Url, Option<ErrorReport>>,
    /// Documents that currently show a diagnostic.
    shown: HashSet<Url>,
}

#[derive(Debug, Default)]
pub struct ReportBuffer {
    pending: Mutex<Pending>,
    signal: Notify,
}

impl ReportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report. Returns false when it cannot be placed on a document.
    ///
    /// A failing run replaces the document's report; a clean run clears it,
    /// or clears every shown document when it names no location.
    pub fn push(&self, report: ErrorReport) -> bool {
        let uri = report
            .location
            .as_ref()
            .and_then(|l| Url::from_file_path(&l.document_path).ok());
        let mut pending = self.pending.lock();
        match (uri, report.error_code >= 1) {
            (Some(uri), true) => {
                pending.reports.insert(uri, Some(report));
            }
            (Some(uri), false) => {
                pending.reports.insert(uri, None);
            }
            (None, false) => {
                let shown: Vec<Url> = pending.shown.iter().cloned().collect();
                for uri in shown {
                    pending.reports.insert(uri, None);
                }
            }
            (None, true) => {
                debug!("Dropping report without a file location: {}", report.template);
                return false;
            }
        }
        drop(pending);
        self.signal.notify_one();
        true
    }

    /// Take everything pending, ordered by URI.
    pub fn take(&self) -> Vec<(Url, Option<ErrorReport>)> {
        let mut pending = self.pending.lock();
        let mut taken: Vec<_> = pending.reports.drain().collect();
        for (uri, report) in &taken {
            if report.is_some() {
                pending.shown.insert(uri.clone());
            } else {
                pending.shown.remove(uri);
            }
        }
        drop(pending);
        taken.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        taken
    }

    /// Forget a closed document.
    pub fn forget(&self, uri: &Url) {
        let mut pending = self.pending.lock();
        pending.reports.remove(uri);
        pending.shown.remove(uri);
    }

    /// Resolves after the next [`push`](Self::push), or at once if one
    /// happened since the last wait.
    pub async fn changed(&self) {
        self.signal.notified().await
    }
}

fn position(p: &bugbuddy_protocol::Position) -> Position {
    Position {
        line: p.line,
        character: p.column,
    }
}

pub fn to_diagnostic(report: &ErrorReport, href: Option<Url>) -> Diagnostic {
    let range = report
        .location
        .as_ref()
        .map(|l| Range {
            start: position(&l.start_pos),
            end: position(&l.end_pos),
        })
        .unwrap_or_default();
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        code: Some(NumberOrString::String(format!(
            "{}/{}",
            report.language, report.template
        ))),
        code_description: href.map(|href| CodeDescription { href }),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: format!(
            "{}\n\nClick the error code for more details.",
            report.message
        ),
        ..Default::default()
    }
}

/// Markdown files holding the full explanation behind each diagnostic.
#[derive(Debug, Clone)]
pub struct ExplanationFiles {
    dir: PathBuf,
}

impl ExplanationFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$TMP/bugbuddy`
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join("bugbuddy")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, document: &Url) -> PathBuf {
        self.dir
            .join(format!("bugbuddy-{}.md", fnv1a32(document.as_str().as_bytes())))
    }

    /// Write `content` for `document`, replacing the previous explanation.
    pub fn write(&self, document: &Url, content: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(document);
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn remove_all(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugbuddy_protocol::Location;
    use tempfile::TempDir;

    fn report(path: Option<&str>, error_code: i32) -> ErrorReport {
        ErrorReport {
            message: "NameError: name 'a' is not defined".into(),
            full_message: "# NameError".into(),
            template: "NameError".into(),
            language: "python".into(),
            error_code,
            location: path.map(|p| Location {
                document_path: p.into(),
                start_pos: bugbuddy_protocol::Position { line: 2, column: 6 },
                end_pos: bugbuddy_protocol::Position { line: 2, column: 7 },
            }),
            ..Default::default()
        }
    }

    fn uri(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn test_fnv1a32_known_values() {
        assert_eq!(fnv1a32(b""), 0x811c9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_latest_report_wins_per_document() {
        let buffer = ReportBuffer::new();
        assert!(buffer.push(report(Some("/p/a.py"), 1)));
        let mut second = report(Some("/p/a.py"), 2);
        second.template = "IndexError".into();
        buffer.push(second);

        let taken = buffer.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0, uri("/p/a.py"));
        assert_eq!(taken[0].1.as_ref().unwrap().template, "IndexError");
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_clean_run_clears_shown_documents() {
        let buffer = ReportBuffer::new();
        buffer.push(report(Some("/p/a.py"), 1));
        buffer.push(report(Some("/p/b.py"), 1));
        buffer.take();

        assert!(buffer.push(report(None, 0)));
        let taken = buffer.take();
        assert_eq!(
            taken,
            vec![(uri("/p/a.py"), None), (uri("/p/b.py"), None)]
        );
        // Nothing is shown anymore, so another clean run is a no-op.
        buffer.push(report(None, 0));
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_failure_without_location_is_dropped() {
        let buffer = ReportBuffer::new();
        assert!(!buffer.push(report(None, 1)));
        assert!(buffer.take().is_empty());
    }

    #[tokio::test]
    async fn test_changed_is_not_lost_before_wait() {
        let buffer = ReportBuffer::new();
        buffer.push(report(Some("/p/a.py"), 1));
        tokio::time::timeout(std::time::Duration::from_secs(1), buffer.changed())
            .await
            .unwrap();
    }

    #[test]
    fn test_to_diagnostic_fields() {
        let href = Url::parse("file:///tmp/bugbuddy/x.md").unwrap();
        let diagnostic = to_diagnostic(&report(Some("/p/a.py"), 1), Some(href.clone()));

        assert_eq!(diagnostic.severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(
            diagnostic.code,
            Some(NumberOrString::String("python/NameError".into()))
        );
        assert_eq!(diagnostic.source.as_deref(), Some("BugBuddy"));
        assert_eq!(diagnostic.range.start, Position::new(2, 6));
        assert_eq!(diagnostic.range.end, Position::new(2, 7));
        assert!(diagnostic.message.ends_with("\n\nClick the error code for more details."));
        assert_eq!(diagnostic.code_description.unwrap().href, href);
    }

    #[test]
    fn test_explanation_files_overwrite_and_clear() {
        let tmp = TempDir::new().unwrap();
        let files = ExplanationFiles::new(tmp.path().join("bugbuddy"));
        let doc = uri("/p/a.py");

        let first = files.write(&doc, "one").unwrap();
        let second = files.write(&doc, "two").unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second).unwrap(), "two");

        files.remove_all().unwrap();
        assert!(!files.dir().exists());
        files.remove_all().unwrap();
    }
}
