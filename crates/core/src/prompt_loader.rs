use crate::catalog::RoleScenarioCatalog;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads every `*.md` file in `dir_path` into a map keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let path = entry?.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// Builds a catalog from a prompts directory, e.g. `customer.negotiation.md` and
/// `scenario.negotiation.md`.
pub fn load_catalog(dir_path: &Path) -> Result<RoleScenarioCatalog> {
    let prompts = load_prompts(dir_path)?;
    tracing::info!(
        "Loaded {} prompt files from {}",
        prompts.len(),
        dir_path.display()
    );
    RoleScenarioCatalog::from_prompts(prompts)
        .with_context(|| format!("Incomplete prompt set in {}", dir_path.display()))
}
