//! The brick capability and the options bundle handed to it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use brick_types::{Context, RegistryId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::ApiVersion;
use crate::executor::{PipelineExecutor, RunScope};
use crate::expression::{ConfigValue, Expression, PipelineExpression};
use crate::logger::BrickLogger;
use crate::services::ServiceContext;

// ---------------------------------------------------------------------------
// Brick trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Brick: Send + Sync {
    /// Registry identifier (e.g. `@brick/for-each`).
    fn id(&self) -> RegistryId;

    /// JSON Schema the rendered arguments are validated against.
    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    /// Whether running the brick has no side effects.
    fn is_pure(&self) -> bool {
        false
    }

    /// Whether the brick reads the root anchor. Other bricks always receive
    /// [`Root::Document`].
    fn is_root_aware(&self) -> bool {
        false
    }

    async fn run(&self, args: Value, options: &BrickOptions) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Anchor a root-aware brick operates relative to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "selector")]
pub enum Root {
    #[default]
    Document,
    /// An element, identified by selector.
    Element(String),
}

impl Root {
    pub fn parse(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            None | Some("") | Some("document") => Root::Document,
            Some(selector) => Root::Element(selector.to_string()),
        }
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Root::Document => f.write_str("document"),
            Root::Element(selector) => f.write_str(selector),
        }
    }
}

// ---------------------------------------------------------------------------
// BrickOptions
// ---------------------------------------------------------------------------

/// Everything a running brick may use besides its arguments.
pub struct BrickOptions {
    /// Context the step was rendered against.
    pub context: Context,
    pub root: Root,
    pub logger: BrickLogger,
    executor: PipelineExecutor,
    scope: Arc<RunScope>,
}

impl BrickOptions {
    pub(crate) fn new(
        context: Context,
        root: Root,
        logger: BrickLogger,
        executor: PipelineExecutor,
        scope: Arc<RunScope>,
    ) -> Self {
        Self {
            context,
            root,
            logger,
            executor,
            scope,
        }
    }

    /// Run a sub-pipeline with `bindings` added to its context.
    ///
    /// A closure runs against its captured environment; any other pipeline
    /// runs against this brick's context. The caller's context is never
    /// modified.
    pub async fn run_pipeline(
        &self,
        expression: &PipelineExpression,
        bindings: Vec<(String, Value)>,
    ) -> Result<Value> {
        let base = expression
            .environment
            .clone()
            .unwrap_or_else(|| self.context.clone());
        self.executor
            .run_pipeline(&expression.pipeline, base.with_bindings(bindings), &self.scope)
            .await
    }

    /// Close `expression` over this brick's context.
    pub fn capture(&self, expression: &PipelineExpression) -> PipelineExpression {
        PipelineExpression::new(expression.pipeline.clone()).with_environment(self.context.clone())
    }

    /// Render a deferred argument against this brick's context plus `bindings`.
    ///
    /// `value` is the argument as received (a `defer` expression in wire form);
    /// its inner value is rendered in explicit mode. Non-deferred values are
    /// rendered as-is.
    pub fn render_deferred(&self, value: &Value, bindings: Vec<(String, Value)>) -> Result<Value> {
        let parsed = ConfigValue::from_json(value)?;
        let inner = match &parsed {
            ConfigValue::Expression(Expression::Defer(inner)) => inner.as_ref(),
            other => other,
        };
        self.executor
            .renderer()
            .render_explicit(inner, &self.context.with_bindings(bindings))
    }

    pub fn services(&self) -> &ServiceContext {
        &self.scope.services
    }

    pub fn api_version(&self) -> ApiVersion {
        self.scope.api_version
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.scope.deployment_id.as_deref()
    }

    pub fn run_id(&self) -> Uuid {
        self.scope.run_id
    }
}

impl fmt::Debug for BrickOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrickOptions")
            .field("context", &self.context)
            .field("root", &self.root)
            .field("run_id", &self.scope.run_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_parse() {
        assert_eq!(Root::parse(None), Root::Document);
        assert_eq!(Root::parse(Some(" document ")), Root::Document);
        assert_eq!(Root::parse(Some("#main")), Root::Element("#main".into()));
        assert_eq!(Root::Element("#main".into()).to_string(), "#main");
    }

    #[test]
    fn root_serializes_tagged() {
        assert_eq!(serde_json::to_value(Root::Document).unwrap(), json!({"type": "document"}));
        assert_eq!(
            serde_json::to_value(Root::Element(".row".into())).unwrap(),
            json!({"type": "element", "selector": ".row"})
        );
    }
}
