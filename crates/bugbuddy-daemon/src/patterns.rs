//! Built-in regex catalogue for common Python runtime errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bugbuddy_protocol::{Location, Position};
use regex::{Captures, Regex};
use tracing::debug;

use crate::analyzer::{Analysis, AnalyzerError, ErrorAnalyzer};
use crate::vfs::VirtualFs;

static TRACEBACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "(?P<path>[^"]+)", line (?P<line>\d+)"#).expect("traceback frame regex")
});

const FALLBACK: &str = "UnknownError";

struct Template {
    name: &'static str,
    pattern: Regex,
    /// Capture whose text is highlighted in the offending source line.
    highlight: Option<&'static str>,
    explanation: &'static str,
}

fn template(
    name: &'static str,
    pattern: &str,
    highlight: Option<&'static str>,
    explanation: &'static str,
) -> Template {
    Template {
        name,
        pattern: Regex::new(pattern).expect("template regex"),
        highlight,
        explanation,
    }
}

static PYTHON_TEMPLATES: LazyLock<Vec<Template>> = LazyLock::new(|| {
    vec![
        template(
            "NameError",
            r"NameError: name '(?P<name>[^']+)' is not defined",
            Some("name"),
            "# NameError\n\
             Your program tried to use `{name}`, but nothing with that name exists at this point.\n\n\
             ## Steps to fix\n\
             1. Check the spelling of `{name}`.\n\
             2. Make sure `{name}` is assigned or imported before this line runs.",
        ),
        template(
            "ZeroDivisionError",
            r"ZeroDivisionError: (?P<reason>.*by zero)",
            Some("/"),
            "# ZeroDivisionError\n\
             The program divided a number by zero ({reason}).\n\n\
             ## Steps to fix\n\
             1. Check the value of the divisor before dividing.\n\
             2. Handle the zero case separately.",
        ),
        template(
            "UnsupportedOperandError",
            r"TypeError: unsupported operand type\(s\) for (?P<op>\S+): '(?P<left>[^']+)' and '(?P<right>[^']+)'",
            Some("op"),
            "# TypeError\n\
             `{op}` cannot combine a `{left}` with a `{right}`.\n\n\
             ## Steps to fix\n\
             1. Convert one side so both values have compatible types.",
        ),
        template(
            "IndexError",
            r"IndexError: (?P<kind>\w+) index out of range",
            None,
            "# IndexError\n\
             The program read a position past the end of a {kind}.\n\n\
             ## Steps to fix\n\
             1. Check the length of the {kind} before indexing.\n\
             2. Remember that indexes start at 0.",
        ),
        template(
            "AttributeError",
            r"AttributeError: '(?P<type>[^']+)' object has no attribute '(?P<attr>[^']+)'",
            Some("attr"),
            "# AttributeError\n\
             Values of type `{type}` have no attribute called `{attr}`.\n\n\
             ## Steps to fix\n\
             1. Check the spelling of `{attr}`.\n\
             2. Make sure the value really is the type you expect.",
        ),
        template(
            FALLBACK,
            r"(?m)^(?P<kind>[A-Z]\w*(?:Error|Exception)): (?P<detail>.*)$",
            None,
            "# {kind}\n{detail}",
        ),
    ]
});

/// Regex-based analyzer for Python tracebacks.
#[derive(Debug, Default, Clone)]
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn locate(
        &self,
        fs: &VirtualFs,
        working_dir: &Path,
        text: &str,
        template: &Template,
        caps: &Captures<'_>,
    ) -> Option<Location> {
        let frame = TRACEBACK_FRAME.captures_iter(text).last()?;
        let raw_path = PathBuf::from(&frame["path"]);
        let path = if raw_path.is_absolute() {
            raw_path
        } else {
            working_dir.join(raw_path)
        };
        let line: u32 = frame["line"].parse::<u32>().ok()?.saturating_sub(1);

        let (start, end) = match fs.open(&path) {
            Ok(file) => file
                .line(line as usize)
                .map(|source| highlight_columns(source, template, caps))
                .unwrap_or((0, 0)),
            Err(e) => {
                debug!("Cannot read {} for location: {}", path.display(), e);
                (0, 0)
            }
        };
        Some(Location {
            document_path: path.to_string_lossy().into_owned(),
            start_pos: Position {
                line,
                column: start,
            },
            end_pos: Position { line, column: end },
        })
    }
}

/// Columns of the highlighted text in `source`, or the whole trimmed line.
fn highlight_columns(source: &str, template: &Template, caps: &Captures<'_>) -> (u32, u32) {
    let needle = template.highlight.map(|name| match caps.name(name) {
        Some(m) => m.as_str(),
        None => name,
    });
    if let Some(needle) = needle {
        if let Some(byte_idx) = find_token(source, needle) {
            let start = source[..byte_idx].chars().count() as u32;
            return (start, start + needle.chars().count() as u32);
        }
    }
    let indent = source.chars().take_while(|c| c.is_whitespace()).count() as u32;
    (indent, source.trim_end().chars().count() as u32)
}

/// Byte offset of `needle` in `source`. Identifiers only match as whole words.
fn find_token(source: &str, needle: &str) -> Option<usize> {
    let is_word = !needle.is_empty() && needle.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_word {
        return source.find(needle);
    }
    Regex::new(&format!(r"\b{}\b", regex::escape(needle)))
        .ok()?
        .find(source)
        .map(|m| m.start())
}

fn render(explanation: &str, details: &BTreeMap<String, String>) -> String {
    details.iter().fold(explanation.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{}}}", key), value)
    })
}

impl ErrorAnalyzer for PatternAnalyzer {
    fn analyze(
        &self,
        fs: &VirtualFs,
        working_dir: &Path,
        text: &str,
    ) -> Result<Analysis, AnalyzerError> {
        for template in PYTHON_TEMPLATES.iter() {
            let Some(caps) = template.pattern.captures(text) else {
                continue;
            };
            let details = template
                .pattern
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect();
            let analysis = Analysis {
                template: template.name.to_string(),
                language: "python".to_string(),
                is_fallback: template.name == FALLBACK,
                location: self.locate(fs, working_dir, text, template, &caps),
                details,
            };
            debug!("Matched template {}", analysis.template);
            return Ok(analysis);
        }
        Err(AnalyzerError::NoTemplateMatched)
    }

    fn translate(&self, analysis: &Analysis) -> Result<String, AnalyzerError> {
        PYTHON_TEMPLATES
            .iter()
            .find(|t| t.name == analysis.template)
            .map(|t| render(t.explanation, &analysis.details))
            .ok_or_else(|| AnalyzerError::UnknownTemplate(analysis.template.clone()))
    }

    fn supported_file_extensions(&self) -> Vec<String> {
        vec![".py".to_string()]
    }
}
