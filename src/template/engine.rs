//! Template engine wrapping minijinja
//!
//! Uses the stock Jinja delimiters with strict undefined behavior: a
//! template that references a key the context does not provide fails to
//! render instead of producing an empty string, so misspelled parameters
//! surface at render time rather than as broken manifests on the cluster.

use minijinja::{Environment, UndefinedBehavior};
use thiserror::Error;

use super::context::RenderContext;

/// Errors that can occur while rendering a resource template
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template rendering failed: bad syntax, an undefined key, or a failed
    /// filter
    #[error("template render error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Engine that expands resource templates against a [`RenderContext`]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render a single template string.
    ///
    /// Pure: no I/O, no state carried between calls.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template syntax is invalid, a
    /// referenced key is undefined, or a filter fails. Callers treat any
    /// render failure as an authoring bug.
    pub fn render(&self, template: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
        Ok(self.env.render_str(template, ctx.to_value())?)
    }
}
