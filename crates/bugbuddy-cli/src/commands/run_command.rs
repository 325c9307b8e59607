//! `bugbuddy run-command`

use std::path::Path;

use anyhow::{Context, Result};
use bugbuddy_lsp::run_command::{load_overrides, resolve};

pub fn execute(data_dir: &Path, language_id: &str, file: &Path) -> Result<()> {
    let file = std::path::absolute(file)
        .with_context(|| format!("Invalid path {}", file.display()))?;
    let executable = std::env::current_exe()?;
    let overrides = load_overrides(data_dir)?;
    println!("{}", resolve(language_id, &file, &executable, &overrides)?);
    Ok(())
}
