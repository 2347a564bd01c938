//! Argument rendering.
//!
//! A step's declared config is resolved against the current [`Context`] in one
//! of two modes, chosen by the document's API version:
//!
//! - **Explicit** (v3): only tagged template/variable expressions are
//!   interpreted. Plain strings are literals. Pipeline and defer expressions
//!   pass through untouched for the consuming brick. Object entries that
//!   render to `null` are pruned.
//! - **Implicit** (v1/v2): every plain string is interpreted, either as a
//!   bound property path or as a template for the step's engine.
//!
//! There is no default mode; callers always pick one.

use std::sync::Arc;

use brick_types::{BrickError, Context, Result};
use serde_json::{Map, Value};

use crate::expression::{ConfigValue, Expression, TemplateEngine};
use crate::path::{get_visible_by_path, is_simple_path, resolve_service_path, strip_hidden};
use crate::template::RendererRegistry;

/// How plain config values are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Explicit,
    /// Legacy mode; strings are templated with the given engine.
    Implicit(TemplateEngine),
}

impl RenderMode {
    pub fn is_explicit(&self) -> bool {
        matches!(self, RenderMode::Explicit)
    }
}

/// Resolves brick arguments against a context.
#[derive(Clone)]
pub struct ArgumentRenderer {
    renderers: Arc<RendererRegistry>,
}

impl ArgumentRenderer {
    pub fn new(renderers: Arc<RendererRegistry>) -> Self {
        Self { renderers }
    }

    pub fn renderers(&self) -> &RendererRegistry {
        &self.renderers
    }

    /// Render a step's config map into a JSON object of arguments.
    pub fn render_config<'a, I>(&self, config: I, ctx: &Context, mode: RenderMode) -> Result<Value>
    where
        I: IntoIterator<Item = (&'a String, &'a ConfigValue)>,
    {
        let mut args = Map::new();
        for (name, value) in config {
            let rendered = self.render(value, ctx, mode)?;
            if mode.is_explicit() && rendered.is_null() {
                continue;
            }
            args.insert(name.clone(), rendered);
        }
        Ok(Value::Object(args))
    }

    /// Render a single config value.
    pub fn render(&self, value: &ConfigValue, ctx: &Context, mode: RenderMode) -> Result<Value> {
        match mode {
            RenderMode::Explicit => self.render_explicit(value, ctx),
            RenderMode::Implicit(engine) => self.render_implicit(value, ctx, engine),
        }
    }

    pub fn render_explicit(&self, value: &ConfigValue, ctx: &Context) -> Result<Value> {
        match value {
            ConfigValue::Literal(literal) => Ok(literal.clone()),
            ConfigValue::Expression(expression) => self.render_expression(expression, ctx),
            ConfigValue::Array(items) => items
                .iter()
                .map(|item| self.render_explicit(item, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            ConfigValue::Object(entries) => {
                let mut rendered = Map::new();
                for (key, entry) in entries {
                    let value = self.render_explicit(entry, ctx)?;
                    if !value.is_null() {
                        rendered.insert(key.clone(), value);
                    }
                }
                Ok(Value::Object(rendered))
            }
        }
    }

    pub fn render_implicit(
        &self,
        value: &ConfigValue,
        ctx: &Context,
        engine: TemplateEngine,
    ) -> Result<Value> {
        match value {
            ConfigValue::Literal(Value::String(text)) => {
                if is_simple_path(text, ctx.bindings()) {
                    Ok(resolve_service_path(ctx.bindings(), text))
                } else {
                    let rendered = self.renderers.get(engine)?.render(text, ctx.bindings())?;
                    Ok(Value::String(rendered))
                }
            }
            ConfigValue::Literal(literal) => Ok(literal.clone()),
            ConfigValue::Expression(expression) => self.render_expression(expression, ctx),
            ConfigValue::Array(items) => items
                .iter()
                .map(|item| self.render_implicit(item, ctx, engine))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            ConfigValue::Object(entries) => entries
                .iter()
                .map(|(key, entry)| {
                    Ok::<_, BrickError>((key.clone(), self.render_implicit(entry, ctx, engine)?))
                })
                .collect::<Result<Map<_, _>>>()
                .map(Value::Object),
        }
    }

    fn render_expression(&self, expression: &Expression, ctx: &Context) -> Result<Value> {
        match expression {
            Expression::Template { value: None, .. } => Ok(Value::String(String::new())),
            Expression::Template {
                engine,
                value: Some(source),
            } => {
                let rendered = self.renderers.get(*engine)?.render(source, ctx.bindings())?;
                Ok(Value::String(rendered))
            }
            Expression::Variable(None) => Ok(Value::Null),
            Expression::Variable(Some(path)) => Ok(get_visible_by_path(ctx.bindings(), path)
                .map(strip_hidden)
                .unwrap_or(Value::Null)),
            Expression::Pipeline(_) | Expression::Defer(_) => expression.to_json(),
        }
    }
}

impl Default for ArgumentRenderer {
    fn default() -> Self {
        Self::new(Arc::new(RendererRegistry::with_defaults()))
    }
}

/// Loose truthiness used for conditions.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "yes" | "y" | "on" | "1"
        ),
        Value::Array(_) | Value::Object(_) => true,
    }
}
