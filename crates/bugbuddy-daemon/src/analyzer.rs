//! Error analysis seam.
//!
//! The daemon hands every collected error text to an [`ErrorAnalyzer`] and
//! turns the outcome into a `clients/report` notification plus the
//! `$/collect` reply counters.

use std::collections::BTreeMap;
use std::path::Path;

use bugbuddy_protocol::{CollectPayload, CollectResponse, ErrorReport, Location};

use crate::vfs::VirtualFs;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("No template matched the error output")]
    NoTemplateMatched,

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
}

/// Outcome of matching one error text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Analysis {
    pub template: String,
    pub language: String,
    /// Catch-all template that only recognizes the shape of an error.
    pub is_fallback: bool,
    pub location: Option<Location>,
    /// Named captures from the matched template.
    pub details: BTreeMap<String, String>,
}

impl Analysis {
    pub fn is_recognized(&self) -> bool {
        !self.template.is_empty() && !self.is_fallback
    }
}

pub trait ErrorAnalyzer: Send + Sync {
    fn analyze(
        &self,
        fs: &VirtualFs,
        working_dir: &Path,
        text: &str,
    ) -> Result<Analysis, AnalyzerError>;

    fn translate(&self, analysis: &Analysis) -> Result<String, AnalyzerError>;

    /// File extensions (with leading dot) this analyzer understands.
    fn supported_file_extensions(&self) -> Vec<String>;
}

/// Run `analyzer` over a collected error.
///
/// Engine failures end up in the reply's `error` field and the report's
/// `analyzer_error`, never as an `Err`.
pub fn collect(
    analyzer: &dyn ErrorAnalyzer,
    fs: &VirtualFs,
    payload: &CollectPayload,
) -> (ErrorReport, CollectResponse) {
    let mut report = ErrorReport {
        message: payload.error.clone(),
        error_code: payload.error_code,
        received: 1,
        ..Default::default()
    };
    let mut response = CollectResponse::default();

    if payload.error.trim().is_empty() {
        return (report, response);
    }

    let working_dir = Path::new(if payload.working_dir.is_empty() {
        "."
    } else {
        payload.working_dir.as_str()
    });
    match analyzer.analyze(fs, working_dir, &payload.error) {
        Ok(analysis) => {
            response.recognized = analysis.is_recognized() as u32;
            match analyzer.translate(&analysis) {
                Ok(text) if !text.is_empty() => {
                    response.processed = 1;
                    report.full_message = text;
                }
                Ok(_) => {}
                Err(e) => response.error = Some(e.to_string()),
            }
            report.template = analysis.template;
            report.language = analysis.language;
            report.location = analysis.location;
        }
        Err(e) => response.error = Some(e.to_string()),
    }

    report.processed = response.processed;
    report.analyzer_error = response.error.clone();
    (report, response)
}
