//! Run-command lookup for `$/fetchRunCommand`.
//!
//! Built-in commands per language id can be overridden by `runner.json` in
//! the data directory, mapping a language id to a command string or a list
//! of steps.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;

use crate::error::RunCommandError;

pub const RUNNER_FILE: &str = "runner.json";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("placeholder regex"));

const DEFAULT_RUN_COMMANDS: &[(&str, &[&str])] = &[
    ("python", &["python3 ${filename}"]),
    ("c", &["gcc ${file} -o ${fileNoExt}", "${fileNoExt}"]),
    ("cpp", &["g++ ${file} -o ${fileNoExt}", "${fileNoExt}"]),
    ("java", &["javac ${file}", "java -cp ${dir} ${filenameNoExt}"]),
    ("rust", &["rustc ${file} -o ${fileNoExt}", "${fileNoExt}"]),
    ("go", &["go run ${filename}"]),
    ("javascript", &["node ${filename}"]),
    ("typescript", &["ts-node ${filename}"]),
    ("php", &["php ${filename}"]),
    ("ruby", &["ruby ${filename}"]),
    ("perl", &["perl ${filename}"]),
    ("shellscript", &["bash ${filename}"]),
    ("lua", &["lua ${filename}"]),
    ("r", &["Rscript ${filename}"]),
    ("dart", &["dart ${filename}"]),
    ("elixir", &["elixir ${filename}"]),
    ("julia", &["julia ${filename}"]),
    ("swift", &["swift ${filename}"]),
    ("zig", &["zig run ${filename}"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum RunnerEntry {
    Command(String),
    Steps(Vec<String>),
}

impl From<RunnerEntry> for Vec<String> {
    fn from(entry: RunnerEntry) -> Self {
        match entry {
            RunnerEntry::Command(cmd) => vec![cmd],
            RunnerEntry::Steps(steps) => steps,
        }
    }
}

/// Commands from `<data_dir>/runner.json`; empty when the file does not exist.
pub fn load_overrides(data_dir: &Path) -> Result<HashMap<String, Vec<String>>, RunCommandError> {
    let path = data_dir.join(RUNNER_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(RunCommandError::Io(e)),
    };
    let entries: HashMap<String, RunnerEntry> = serde_json::from_str(&contents)
        .map_err(|source| RunCommandError::Runner { path, source })?;
    Ok(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
}

/// Substitute `${file}`, `${filename}`, `${filenameNoExt}`, `${dir}` and
/// `${fileNoExt}`. Unknown placeholders are left alone.
pub fn expand_placeholders(command: &str, file: &Path) -> String {
    PLACEHOLDER
        .replace_all(command, |caps: &Captures<'_>| {
            let value = match &caps[1] {
                "file" => Some(file.to_string_lossy().into_owned()),
                "filename" => file.file_name().map(|n| n.to_string_lossy().into_owned()),
                "filenameNoExt" => file.file_stem().map(|n| n.to_string_lossy().into_owned()),
                "dir" => file.parent().map(|d| d.to_string_lossy().into_owned()),
                "fileNoExt" => Some(file.with_extension("").to_string_lossy().into_owned()),
                _ => None,
            };
            value.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Full monitor command line for running `file` as `language_id`.
pub fn resolve(
    language_id: &str,
    file: &Path,
    executable: &Path,
    overrides: &HashMap<String, Vec<String>>,
) -> Result<String, RunCommandError> {
    let steps: Vec<String> = match overrides.get(language_id) {
        Some(steps) => steps.clone(),
        None => DEFAULT_RUN_COMMANDS
            .iter()
            .find(|(id, _)| *id == language_id)
            .map(|(_, steps)| steps.iter().map(|s| s.to_string()).collect())
            .ok_or_else(|| RunCommandError::UnknownLanguage(language_id.to_string()))?,
    };
    if steps.iter().all(|s| s.trim().is_empty()) {
        return Err(RunCommandError::UnknownLanguage(language_id.to_string()));
    }

    let mut command = steps
        .iter()
        .map(|step| expand_placeholders(step, file))
        .collect::<Vec<_>>()
        .join(" && ");
    if command.contains("&&") || command.contains("||") {
        command = format!("\"{}\"", command);
    }
    Ok(format!("{} -- {}", executable.display(), command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXE: &str = "/usr/local/bin/bugbuddy";

    #[test]
    fn test_placeholders() {
        let file = Path::new("/work/src/main.c");
        assert_eq!(
            expand_placeholders(
                "${file}|${filename}|${filenameNoExt}|${dir}|${fileNoExt}|${other}",
                file
            ),
            "/work/src/main.c|main.c|main|/work/src|/work/src/main|${other}"
        );
    }

    #[test]
    fn test_builtin_python() {
        let cmd = resolve(
            "python",
            Path::new("/work/hello.py"),
            Path::new(EXE),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(cmd, format!("{} -- python3 hello.py", EXE));
    }

    #[test]
    fn test_multi_step_is_quoted() {
        let cmd = resolve("c", Path::new("/w/a.c"), Path::new(EXE), &HashMap::new()).unwrap();
        assert_eq!(cmd, format!("{} -- \"gcc /w/a.c -o /w/a && /w/a\"", EXE));
    }

    #[test]
    fn test_unknown_language() {
        let err = resolve("cobol", Path::new("/w/a.cob"), Path::new(EXE), &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, RunCommandError::UnknownLanguage(ref id) if id == "cobol"));
    }

    #[test]
    fn test_runner_json_overrides() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(RUNNER_FILE),
            r#"{"python": "python3 -X dev ${filename}", "custom": ["make", "./${filenameNoExt}"]}"#,
        )
        .unwrap();
        let overrides = load_overrides(tmp.path()).unwrap();

        let python = resolve("python", Path::new("/w/x.py"), Path::new(EXE), &overrides).unwrap();
        assert_eq!(python, format!("{} -- python3 -X dev x.py", EXE));
        let custom = resolve("custom", Path::new("/w/x.c"), Path::new(EXE), &overrides).unwrap();
        assert_eq!(custom, format!("{} -- \"make && ./x\"", EXE));
    }

    #[test]
    fn test_missing_runner_json_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_overrides(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_runner_json() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(RUNNER_FILE), "{not json").unwrap();
        let err = load_overrides(tmp.path()).unwrap_err();
        assert!(matches!(err, RunCommandError::Runner { ref path, .. } if *path == tmp.path().join(RUNNER_FILE)));
    }
}
