//! Prompt templates loaded from a directory of markdown files.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Templates keyed by file stem (`interview.md` → `interview`).
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    prompts: HashMap<String, String>,
}

impl PromptLibrary {
    /// Reads every `*.md` file directly under `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut prompts = HashMap::new();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Could not read prompts directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
                let key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem")?
                    .to_string();
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Could not read prompt {}", path.display()))?;
                debug!(prompt = %key, "Loaded prompt");
                prompts.insert(key, content);
            }
        }
        Ok(Self { prompts })
    }

    pub fn from_map(prompts: HashMap<String, String>) -> Self {
        Self { prompts }
    }

    pub fn insert(&mut self, key: impl Into<String>, template: impl Into<String>) {
        self.prompts.insert(key.into(), template.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prompts.get(key).map(String::as_str)
    }

    /// The template with every `{name}` placeholder replaced.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String> {
        let template = self
            .get(key)
            .with_context(|| format!("{key}.md not found in prompts directory"))?;
        Ok(render(template, vars))
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.prompts.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Replaces `{name}` placeholders; unknown placeholders are left alone.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}
