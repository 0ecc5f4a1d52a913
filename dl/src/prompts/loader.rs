//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to the
//! embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// Override directory (`prompts-dir` in config)
    user_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader; a missing override directory is ignored
    pub fn new(prompts_dir: Option<&Path>) -> Self {
        debug!(?prompts_dir, "PromptLoader::new: called");
        let user_dir = prompts_dir.filter(|d| d.exists()).map(Path::to_path_buf);
        if user_dir.is_none() {
            debug!("PromptLoader::new: no override directory");
        }
        Self {
            hbs: Self::engine(),
            user_dir,
        }
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: Self::engine(),
            user_dir: None,
        }
    }

    fn engine() -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        hbs
    }

    /// Load a template by name
    ///
    /// Checks in order:
    /// 1. Override: `{prompts-dir}/{name}.pmt`
    /// 2. Embedded fallback
    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
            debug!(?path, "PromptLoader::load_template: no override");
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!(%name, "PromptLoader::load_template: found in embedded");
            return Ok(content.to_string());
        }

        debug!(%name, "PromptLoader::load_template: not found anywhere");
        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_embedded_worker() {
        let loader = PromptLoader::embedded_only();
        let text = loader
            .render(
                "worker",
                &json!({
                    "topic": "Dragons & <Knights>",
                    "plan": "- [pending] t1: Research",
                    "subtask_id": "t1",
                    "subtask_title": "Research",
                    "subtask_description": "",
                    "feedback": "Shorter please",
                }),
            )
            .unwrap();
        // No HTML escaping
        assert!(text.contains("Dragons & <Knights>"));
        assert!(text.contains("Revision request: Shorter please"));
        assert!(!text.contains("Write only the content"));
    }

    #[test]
    fn test_reviewer_strict_line() {
        let loader = PromptLoader::embedded_only();
        let strict = loader.render("reviewer", &json!({"strict": true})).unwrap();
        let lenient = loader.render("reviewer", &json!({"strict": false})).unwrap();
        assert!(strict.contains("strict novel critic"));
        assert!(!lenient.contains("strict novel critic"));
    }

    #[test]
    fn test_override_directory() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("coordinator.pmt"), "Custom {{mode}}").unwrap();

        let loader = PromptLoader::new(Some(temp.path()));
        assert_eq!(loader.render("coordinator", &json!({"mode": "execution"})).unwrap(), "Custom execution");
        // Other templates still come from the embedded set
        assert!(loader.render("classifier", &json!({})).unwrap().contains("content_change"));
    }

    #[test]
    fn test_unknown_template() {
        let loader = PromptLoader::embedded_only();
        assert!(loader.render("nope", &json!({})).is_err());
    }
}
