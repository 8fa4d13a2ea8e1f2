//! Prompt template loader
//!
//! One markdown template per AI operation, rendered with `{{var}}`
//! substitution. Templates are loaded on demand, cached by name, and
//! reloadable on operator request. A placeholder left unrendered is a bug in
//! the call site, so rendering fails loudly naming the variable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::AppError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder regex"));

pub const EXCEPTION_CLASSIFICATION: &str = "exception_classification";
pub const ORDER_PROBLEM_DETECTION: &str = "order_problem_detection";
pub const AUTOMATED_RESOLUTION: &str = "automated_resolution";
pub const POLICY_LINTING: &str = "policy_linting";

/// Loader for external prompt templates
pub struct PromptLoader {
    dir: PathBuf,
    cache: DashMap<String, String>,
}

impl PromptLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
        }
    }

    fn template_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.md"))
    }

    /// Load a template, honoring the cache.
    pub fn load(&self, name: &str) -> Result<String, AppError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }

        let content = self.read_from_disk(&self.template_path(name), name)?;
        self.cache.insert(name.to_string(), content.clone());
        Ok(content)
    }

    fn read_from_disk(&self, path: &Path, name: &str) -> Result<String, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Internal(format!(
                "prompt template '{name}' not readable at {}: {e}",
                path.display()
            ))
        })?;
        debug!(template = name, "loaded prompt template");
        Ok(content.trim().to_string())
    }

    /// Render a template, substituting every `{{var}}` placeholder.
    ///
    /// # Errors
    ///
    /// Fails when the template is missing or when any placeholder has no
    /// binding; prompts must never go out half-rendered.
    pub fn render(
        &self,
        name: &str,
        vars: &BTreeMap<&str, String>,
    ) -> Result<String, AppError> {
        let template = self.load(name)?;

        let mut missing: Vec<String> = Vec::new();
        let rendered = PLACEHOLDER.replace_all(&template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value.clone(),
                None => {
                    missing.push(key.to_string());
                    String::new()
                }
            }
        });

        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(AppError::Internal(format!(
                "prompt template '{name}' is missing variables: {}",
                missing.join(", ")
            )));
        }

        Ok(rendered.into_owned())
    }

    /// Drop a cached template so the next load re-reads the file.
    pub fn reload(&self, name: &str) -> Result<String, AppError> {
        self.cache.remove(name);
        self.load(name)
    }

    /// Drop every cached template (operator cache-clear).
    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader_with_template(name: &str, content: &str) -> (TempDir, PromptLoader) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(format!("{name}.md")), content).unwrap();
        let loader = PromptLoader::new(dir.path());
        (dir, loader)
    }

    #[test]
    fn renders_placeholders() {
        let (_dir, loader) =
            loader_with_template("greeting", "Classify {{ reason_code }} for {{order_suffix}}.");

        let mut vars = BTreeMap::new();
        vars.insert("reason_code", "PICK_DELAY".to_string());
        vars.insert("order_suffix", "2345".to_string());

        let rendered = loader.render("greeting", &vars).unwrap();
        assert_eq!(rendered, "Classify PICK_DELAY for 2345.");
    }

    #[test]
    fn missing_variable_fails_loudly() {
        let (_dir, loader) = loader_with_template("strict", "Needs {{ everything }}.");

        let err = loader.render("strict", &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("everything"));
    }

    #[test]
    fn missing_template_is_an_error() {
        let loader = PromptLoader::new("/nonexistent/prompt/dir");
        let err = loader.load("ghost").unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn reload_picks_up_changed_file() {
        let (dir, loader) = loader_with_template("mutable", "version one");
        assert_eq!(loader.load("mutable").unwrap(), "version one");

        std::fs::write(dir.path().join("mutable.md"), "version two").unwrap();
        // Cache still serves the old content until reload.
        assert_eq!(loader.load("mutable").unwrap(), "version one");
        assert_eq!(loader.reload("mutable").unwrap(), "version two");
    }
}
