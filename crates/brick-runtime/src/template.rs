//! Template renderers, registered per engine name.
//!
//! The runtime only needs a renderer capability per [`TemplateEngine`]. The
//! built-in [`InterpolationRenderer`] covers the `{{ path }}` interpolation
//! subset shared by mustache, nunjucks, and handlebars; sections, blocks, and
//! filters are rejected so a document never silently renders wrong output.
//! Register a full engine with [`RendererRegistry::register`] when needed.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use brick_types::{BrickError, Result};
use regex::Regex;
use serde_json::{Map, Value};

use crate::expression::TemplateEngine;
use crate::path::{format_value, get_visible_by_path};

/// Renders a template source against the context bindings.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, bindings: &Map<String, Value>) -> Result<String>;
}

static TAG_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_@$][\w@$.?\[\]-]*$").expect("tag path pattern is valid"));

/// `{{ path }}` / `{{{ path }}}` interpolation.
#[derive(Debug, Clone, Copy)]
pub struct InterpolationRenderer {
    engine: TemplateEngine,
}

impl InterpolationRenderer {
    pub fn new(engine: TemplateEngine) -> Self {
        Self { engine }
    }

    fn error(&self, message: impl Into<String>) -> BrickError {
        BrickError::Template {
            engine: self.engine.to_string(),
            message: message.into(),
        }
    }

    fn evaluate(&self, tag: &str, bindings: &Map<String, Value>) -> Result<String> {
        if tag.starts_with('!') {
            return Ok(String::new());
        }
        if tag.starts_with(['#', '^', '/', '>']) {
            return Err(self.error(format!("sections and partials are not supported: '{{{{{tag}}}}}'")));
        }
        if tag.contains('|') {
            return Err(self.error(format!("filters are not supported: '{tag}'")));
        }
        let path = tag.strip_prefix('&').map(str::trim).unwrap_or(tag);
        if !TAG_PATH.is_match(path) {
            return Err(self.error(format!("unsupported expression '{path}'")));
        }
        Ok(get_visible_by_path(bindings, path).map(format_value).unwrap_or_default())
    }
}

impl TemplateRenderer for InterpolationRenderer {
    fn render(&self, template: &str, bindings: &Map<String, Value>) -> Result<String> {
        if template.contains("{%") {
            return Err(self.error("block tags are not supported"));
        }

        let mut output = String::with_capacity(template.len());
        let mut remaining = template;
        while let Some(start) = remaining.find("{{") {
            output.push_str(&remaining[..start]);
            let after_open = &remaining[start + 2..];
            let (body, close) = match after_open.strip_prefix('{') {
                Some(triple) => (triple, "}}}"),
                None => (after_open, "}}"),
            };
            let end = body
                .find(close)
                .ok_or_else(|| self.error(format!("unclosed tag in '{template}'")))?;
            output.push_str(&self.evaluate(body[..end].trim(), bindings)?);
            remaining = &body[end + close.len()..];
        }
        output.push_str(remaining);
        Ok(output)
    }
}

/// Renderers keyed by engine.
#[derive(Clone)]
pub struct RendererRegistry {
    engines: HashMap<TemplateEngine, Arc<dyn TemplateRenderer>>,
}

impl RendererRegistry {
    /// A registry with no engines.
    pub fn empty() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    /// A registry with [`InterpolationRenderer`] bound to every engine.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for engine in [
            TemplateEngine::Mustache,
            TemplateEngine::Nunjucks,
            TemplateEngine::Handlebars,
        ] {
            registry.register(engine, InterpolationRenderer::new(engine));
        }
        registry
    }

    pub fn register(&mut self, engine: TemplateEngine, renderer: impl TemplateRenderer + 'static) {
        self.engines.insert(engine, Arc::new(renderer));
    }

    pub fn get(&self, engine: TemplateEngine) -> Result<&dyn TemplateRenderer> {
        self.engines
            .get(&engine)
            .map(|renderer| renderer.as_ref())
            .ok_or_else(|| BrickError::Template {
                engine: engine.to_string(),
                message: "no renderer registered".into(),
            })
    }

    pub fn has(&self, engine: TemplateEngine) -> bool {
        self.engines.contains_key(&engine)
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(template: &str, ctx: Value) -> Result<String> {
        InterpolationRenderer::new(TemplateEngine::Mustache).render(template, ctx.as_object().unwrap())
    }

    #[test]
    fn interpolates_paths() {
        let out = render(
            "hello, {{@foo.message}} and {{ name }}",
            json!({"@foo": {"message": "bar"}, "name": "Ada"}),
        )
        .unwrap();
        assert_eq!(out, "hello, bar and Ada");
    }

    #[test]
    fn missing_values_render_empty() {
        assert_eq!(render("[{{ nope }}]", json!({})).unwrap(), "[]");
    }

    #[test]
    fn triple_braces_and_ampersand_are_unescaped_paths() {
        let ctx = json!({"html": "<b>x</b>"});
        assert_eq!(render("{{{ html }}}", ctx.clone()).unwrap(), "<b>x</b>");
        assert_eq!(render("{{& html }}", ctx).unwrap(), "<b>x</b>");
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(render("a{{! note }}b", json!({})).unwrap(), "ab");
    }

    #[test]
    fn non_string_values_are_stringified() {
        let out = render("{{ n }}/{{ flag }}/{{ list }}", json!({"n": 3, "flag": false, "list": [1]})).unwrap();
        assert_eq!(out, "3/false/[1]");
    }

    #[test]
    fn service_back_reference_never_leaks() {
        let out = render("{{ svc }}", json!({"svc": {"a": 1, "__service": {"secret": true}}})).unwrap();
        assert_eq!(out, r#"{"a":1}"#);

        let ctx = json!({"svc": {"a": 1, "__service": {"id": "cfg"}}});
        assert_eq!(render("<{{ svc.__service.id }}>", ctx.clone()).unwrap(), "<>");
        assert_eq!(render("<{{{ svc.__service }}}>", ctx).unwrap(), "<>");
    }

    #[test]
    fn unsupported_syntax_is_an_error() {
        assert!(render("{{#items}}x{{/items}}", json!({})).is_err());
        assert!(render("{{ name | upper }}", json!({})).is_err());
        assert!(render("{% if x %}y{% endif %}", json!({})).is_err());
        assert!(render("{{ unclosed", json!({})).is_err());
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render("no tags here", json!({})).unwrap(), "no tags here");
    }

    #[test]
    fn registry_defaults_cover_all_engines() {
        let registry = RendererRegistry::with_defaults();
        assert!(registry.has(TemplateEngine::Mustache));
        assert!(registry.has(TemplateEngine::Nunjucks));
        assert!(registry.has(TemplateEngine::Handlebars));
        assert!(RendererRegistry::empty().get(TemplateEngine::Nunjucks).is_err());
    }
}
