//! Template rendering
//!
//! Uses minijinja with strict undefined handling so a missing binding is an
//! error instead of an empty string. Auto-escaping is off: the outputs are
//! YAML, nginx and env files, not HTML.

use crate::error::{Error, Result};
use crate::write::{self, FileMode, WriteOutcome};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;
use std::path::Path;

/// Renders registered templates into artifact bytes.
///
/// Rendering is pure: the same template and bindings always give the same
/// bytes, provided the bindings themselves serialize deterministically
/// (use `BTreeMap`, not `HashMap`).
pub struct ConfigRenderer {
    env: Environment<'static>,
}

impl Default for ConfigRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRenderer")
            .field("templates", &self.template_ids())
            .finish()
    }
}

impl ConfigRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Register a template. Syntax errors surface here.
    pub fn add_template(&mut self, id: &'static str, source: &'static str) -> Result<()> {
        self.env
            .add_template(id, source)
            .map_err(|e| Error::Render {
                template: id.to_string(),
                message: e.to_string(),
            })
    }

    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.env.templates().map(|(id, _)| id.to_string()).collect();
        ids.sort();
        ids
    }

    /// Render `id` with `bindings` into artifact bytes
    pub fn render<S: Serialize>(&self, id: &str, bindings: &S) -> Result<Vec<u8>> {
        let template = self
            .env
            .get_template(id)
            .map_err(|_| Error::UnknownTemplate(id.to_string()))?;
        let rendered = template.render(bindings).map_err(|e| Error::Render {
            template: id.to_string(),
            message: e.to_string(),
        })?;
        Ok(rendered.into_bytes())
    }

    /// Atomically write an artifact with the given permission class
    pub fn write(&self, path: &Path, artifact: &[u8], mode: FileMode) -> Result<WriteOutcome> {
        write::write_atomic(path, artifact, mode)
    }

    /// Whether `path` already holds `artifact` with `mode`
    pub fn is_current(&self, path: &Path, artifact: &[u8], mode: FileMode) -> bool {
        write::is_current(path, artifact, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn renderer() -> ConfigRenderer {
        let mut r = ConfigRenderer::new();
        r.add_template(
            "compose.yml",
            "services:\n{% for name, image in images|items %}  {{ name }}:\n    image: \"{{ image }}\"\n{% endfor %}",
        )
        .unwrap();
        r.add_template("greeting", "hello {{ who }}\n").unwrap();
        r
    }

    #[test]
    fn test_render_is_deterministic() {
        let r = renderer();
        let mut images = BTreeMap::new();
        images.insert("proxy", "nginx:1.27-alpine");
        images.insert("db", "mariadb:11");
        let bindings = BTreeMap::from([("images", images)]);

        let first = r.render("compose.yml", &bindings).unwrap();
        let second = r.render("compose.yml", &bindings).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        // Sorted keys; quotes not escaped
        assert!(text.find("db:").unwrap() < text.find("proxy:").unwrap());
        assert!(text.contains("image: \"mariadb:11\""));
    }

    #[test]
    fn test_trailing_newline_kept() {
        let r = renderer();
        let out = r.render("greeting", &BTreeMap::from([("who", "world")])).unwrap();
        assert_eq!(out, b"hello world\n");
    }

    #[test]
    fn test_missing_binding_is_render_error() {
        let r = renderer();
        let err = r
            .render("greeting", &BTreeMap::from([("someone", "else")]))
            .unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }

    #[test]
    fn test_unknown_template() {
        let r = renderer();
        let err = r.render("nope", &BTreeMap::<String, String>::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate(_)));
    }

    #[test]
    fn test_syntax_error_on_add() {
        let mut r = ConfigRenderer::new();
        assert!(r.add_template("broken", "{% if %}").is_err());
    }

    #[test]
    fn test_template_ids_sorted() {
        assert_eq!(renderer().template_ids(), vec!["compose.yml", "greeting"]);
    }
}
