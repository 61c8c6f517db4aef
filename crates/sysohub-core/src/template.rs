//! Template rendering seam

use std::path::Path;

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::CoreError;

/// Renders a named template against a context
pub trait TemplateRenderer: Send + Sync {
    /// Render `template_id` with `context`
    ///
    /// # Errors
    /// Returns `CoreError::TemplateError` if the template is missing or fails to render.
    fn render(&self, template_id: &str, context: &Value) -> Result<String, CoreError>;
}

/// Jinja-compatible renderer backed by minijinja
///
/// Undefined variables are errors, so a template that references a
/// configuration key nobody provides fails loudly instead of rendering blanks.
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    fn base_env() -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        // host config files, never markup
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env
    }

    /// Load templates lazily from a directory
    #[must_use]
    pub fn from_dir(dir: &Path) -> Self {
        let mut env = Self::base_env();
        env.set_loader(minijinja::path_loader(dir.to_path_buf()));
        Self { env }
    }

    /// Build a renderer from in-memory `(name, source)` pairs
    ///
    /// # Errors
    /// Returns `CoreError::TemplateError` if a source fails to parse.
    pub fn from_sources<I>(sources: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env = Self::base_env();
        for (name, source) in sources {
            env.add_template_owned(name.clone(), source)
                .map_err(|e| CoreError::TemplateError {
                    template: name,
                    reason: e.to_string(),
                })?;
        }
        Ok(Self { env })
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, template_id: &str, context: &Value) -> Result<String, CoreError> {
        let to_error = |e: minijinja::Error| CoreError::TemplateError {
            template: template_id.to_string(),
            reason: e.to_string(),
        };
        self.env
            .get_template(template_id)
            .map_err(to_error)?
            .render(context)
            .map_err(to_error)
    }
}
