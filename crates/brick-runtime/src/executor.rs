//! Pipeline executor: runs brick configs in order, threading context.
//!
//! Per step: check the optional condition, render the config, validate the
//! rendered args, run the brick, bind or carry its result, and emit a trace.
//! A failing step is wrapped in a `ContextError` (once, at the innermost
//! step), optionally alerted, and aborts the rest of its pipeline.

use std::sync::Arc;
use std::time::Instant;

use brick_types::{is_reserved_output_key, BrickError, Context, Result, INPUT_KEY};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::alerts::{DeploymentAlert, DeploymentAlerter, NoopAlerter};
use crate::brick::{BrickOptions, Root};
use crate::document::{ApiVersion, PipelineDocument};
use crate::logger::BrickLogger;
use crate::pipeline::{BrickConfig, Pipeline};
use crate::registry::{default_registry, BrickRegistry};
use crate::render::{truthy, ArgumentRenderer, RenderMode};
use crate::schema::{BasicSchemaValidator, SchemaValidator};
use crate::services::{build_service_context, IntegrationLocator, ServiceContext};
use crate::template::RendererRegistry;
use crate::trace::{NullTraceSink, TraceOutcome, TraceRecord, TraceSink};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Configuration for a single run. The API version is mandatory.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub api_version: ApiVersion,
    pub root: Root,
    pub deployment_id: Option<String>,
    pub run_id: Uuid,
    pub services: ServiceContext,
    /// Bound as `@options`.
    pub mod_options: Value,
}

impl RunOptions {
    pub fn new(api_version: ApiVersion) -> Self {
        Self {
            api_version,
            root: Root::Document,
            deployment_id: None,
            run_id: Uuid::new_v4(),
            services: ServiceContext::new(),
            mod_options: Value::Object(Map::new()),
        }
    }

    pub fn with_root(mut self, root: Root) -> Self {
        self.root = root;
        self
    }

    pub fn with_deployment_id(mut self, deployment_id: impl Into<String>) -> Self {
        self.deployment_id = Some(deployment_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_services(mut self, services: ServiceContext) -> Self {
        self.services = services;
        self
    }

    pub fn with_mod_options(mut self, mod_options: Value) -> Self {
        self.mod_options = mod_options;
        self
    }
}

/// Run-wide state shared by every step and sub-pipeline of one run.
#[derive(Debug)]
pub(crate) struct RunScope {
    pub(crate) api_version: ApiVersion,
    pub(crate) root: Root,
    pub(crate) deployment_id: Option<String>,
    pub(crate) run_id: Uuid,
    pub(crate) services: ServiceContext,
    pub(crate) logger: BrickLogger,
}

/// Drives pipelines. Cheap to clone; clones share the same wiring.
#[derive(Clone)]
pub struct PipelineExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    registry: BrickRegistry,
    renderer: ArgumentRenderer,
    validator: Arc<dyn SchemaValidator>,
    trace_sink: Arc<dyn TraceSink>,
    alerter: Arc<dyn DeploymentAlerter>,
}

pub struct PipelineExecutorBuilder {
    registry: BrickRegistry,
    renderers: RendererRegistry,
    validator: Arc<dyn SchemaValidator>,
    trace_sink: Arc<dyn TraceSink>,
    alerter: Arc<dyn DeploymentAlerter>,
}

impl PipelineExecutorBuilder {
    pub fn renderers(mut self, renderers: RendererRegistry) -> Self {
        self.renderers = renderers;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn trace_sink(mut self, trace_sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = trace_sink;
        self
    }

    pub fn alerter(mut self, alerter: Arc<dyn DeploymentAlerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn build(self) -> PipelineExecutor {
        PipelineExecutor {
            inner: Arc::new(ExecutorInner {
                registry: self.registry,
                renderer: ArgumentRenderer::new(Arc::new(self.renderers)),
                validator: self.validator,
                trace_sink: self.trace_sink,
                alerter: self.alerter,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    /// Create an executor with the given brick registry and default wiring.
    pub fn new(registry: BrickRegistry) -> Self {
        Self::builder(registry).build()
    }

    /// Create an executor pre-loaded with the built-in bricks.
    pub fn with_default_registry() -> Self {
        Self::new(default_registry())
    }

    pub fn builder(registry: BrickRegistry) -> PipelineExecutorBuilder {
        PipelineExecutorBuilder {
            registry,
            renderers: RendererRegistry::with_defaults(),
            validator: Arc::new(BasicSchemaValidator),
            trace_sink: Arc::new(NullTraceSink),
            alerter: Arc::new(NoopAlerter),
        }
    }

    pub fn registry(&self) -> &BrickRegistry {
        &self.inner.registry
    }

    pub fn renderer(&self) -> &ArgumentRenderer {
        &self.inner.renderer
    }

    /// Run `pipeline` with `input` bound as `@input`.
    pub async fn run(&self, pipeline: &Pipeline, input: Value, options: RunOptions) -> Result<Value> {
        let RunOptions {
            api_version,
            root,
            deployment_id,
            run_id,
            services,
            mod_options,
        } = options;

        let mod_options = if mod_options.is_null() {
            Value::Object(Map::new())
        } else {
            mod_options
        };
        let ctx = Context::with_input(input, mod_options).with_bindings(services.bindings()?);
        let logger = BrickLogger::for_run(run_id, deployment_id.as_deref());
        let span = logger.span().clone();
        let scope = Arc::new(RunScope {
            api_version,
            root,
            deployment_id,
            run_id,
            services,
            logger,
        });

        async {
            tracing::info!(steps = pipeline.len(), api_version = %api_version, "Pipeline started");
            let started = Instant::now();
            let result = self.run_pipeline(pipeline, ctx, &scope).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => tracing::info!(duration_ms, "Pipeline completed"),
                Err(error) => tracing::warn!(duration_ms, error = %error, "Pipeline failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Resolve the document's integrations through `locator`, then run it.
    pub async fn run_document(
        &self,
        document: &PipelineDocument,
        input: Value,
        locator: &dyn IntegrationLocator,
    ) -> Result<Value> {
        let services = build_service_context(locator, &document.integration_dependencies).await?;
        self.run(&document.pipeline, input, document.run_options(services))
            .await
    }

    /// Run one pipeline scope. Returns the last step's value, or null when no
    /// step produced one.
    pub(crate) fn run_pipeline<'a>(
        &'a self,
        pipeline: &'a Pipeline,
        ctx: Context,
        scope: &'a Arc<RunScope>,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let mut ctx = ctx;
            let mut running = ctx.get(INPUT_KEY).cloned().unwrap_or(Value::Null);
            let mut last = Value::Null;

            for (index, step) in pipeline.iter().enumerate() {
                let Some(output) = self.run_step(step, index, &ctx, &running, scope).await? else {
                    continue;
                };
                match &step.output_key {
                    Some(output_key) => ctx = ctx.with_output(output_key, output.clone()),
                    None => running = output.clone(),
                }
                last = output;
            }
            Ok(last)
        }
        .boxed()
    }

    async fn run_step(
        &self,
        step: &BrickConfig,
        index: usize,
        ctx: &Context,
        running: &Value,
        scope: &Arc<RunScope>,
    ) -> Result<Option<Value>> {
        let logger = scope.logger.for_brick(&step.id, index);
        let span = logger.span().clone();
        let started = Instant::now();
        let mut rendered_args = Value::Null;

        let result = self
            .execute_step(step, ctx, running, scope, logger, &mut rendered_args)
            .instrument(span.clone())
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Some(output)) => {
                let outcome = TraceOutcome::Output(output.clone());
                self.record_trace(step, index, scope, rendered_args, outcome, duration_ms);
                Ok(Some(output))
            }
            Ok(None) => {
                self.record_trace(step, index, scope, rendered_args, TraceOutcome::Skipped, duration_ms);
                Ok(None)
            }
            Err(error) => {
                let error = self.fail_step(step, ctx, error, scope).instrument(span).await;
                let outcome = TraceOutcome::Error(error.to_serialized());
                self.record_trace(step, index, scope, rendered_args, outcome, duration_ms);
                Err(error)
            }
        }
    }

    async fn execute_step(
        &self,
        step: &BrickConfig,
        ctx: &Context,
        running: &Value,
        scope: &Arc<RunScope>,
        logger: BrickLogger,
        rendered_args: &mut Value,
    ) -> Result<Option<Value>> {
        if let Some(output_key) = step.output_key.as_deref().filter(|key| is_reserved_output_key(key)) {
            return Err(BrickError::ReservedOutputKey(output_key.to_string()));
        }

        let mode = scope.api_version.render_mode(step.template_engine);
        let render_ctx = match mode {
            RenderMode::Explicit => ctx.clone(),
            RenderMode::Implicit(_) => ctx.with_running_value(running),
        };

        if let Some(condition) = &step.condition {
            let condition = self.inner.renderer.render(condition, &render_ctx, mode)?;
            if !truthy(&condition) {
                tracing::debug!(brick_id = %step.id, "Condition is falsy, skipping step");
                return Ok(None);
            }
        }

        let brick = self
            .inner
            .registry
            .get(step.id.as_str())
            .cloned()
            .ok_or_else(|| BrickError::UnknownBrick(step.id.clone()))?;

        let args = self
            .inner
            .renderer
            .render_config(&step.config, &render_ctx, mode)?;
        *rendered_args = args.clone();

        self.inner
            .validator
            .validate(&args, &brick.input_schema())
            .map_err(|errors| BrickError::Validation {
                brick_id: step.id.clone(),
                errors,
            })?;

        let root = if brick.is_root_aware() {
            scope.root.clone()
        } else {
            Root::Document
        };
        let options = BrickOptions::new(ctx.clone(), root, logger, self.clone(), Arc::clone(scope));

        tracing::debug!(brick_id = %step.id, "Running brick");
        let output = brick.run(args, &options).await?;
        tracing::debug!(brick_id = %step.id, "Brick completed");
        Ok(Some(output))
    }

    /// Wrap `error` for `step` unless a nested step already did, and send the
    /// deployment alert if the step asks for one and none was sent yet.
    async fn fail_step(
        &self,
        step: &BrickConfig,
        ctx: &Context,
        error: BrickError,
        scope: &RunScope,
    ) -> BrickError {
        let mut error = match error {
            wrapped @ BrickError::Context { .. } => wrapped,
            other => BrickError::Context {
                brick_id: step.id.clone(),
                context: ctx.snapshot(),
                alerted: false,
                source: Box::new(other),
            },
        };
        tracing::warn!(brick_id = %step.id, error = %error, "Step failed");

        if step.alerts() && !error.alert_sent() {
            if let Some(deployment_id) = &scope.deployment_id {
                self.send_alert(deployment_id, step, &error, scope).await;
                if let BrickError::Context { alerted, .. } = &mut error {
                    *alerted = true;
                }
            }
        }
        error
    }

    async fn send_alert(
        &self,
        deployment_id: &str,
        step: &BrickConfig,
        error: &BrickError,
        scope: &RunScope,
    ) {
        let alert = DeploymentAlert {
            deployment_id: deployment_id.to_string(),
            run_id: scope.run_id,
            brick_id: step.id.clone(),
            error: error.to_serialized(),
            timestamp: Utc::now(),
        };
        if let Err(alert_error) = self.inner.alerter.send_deployment_alert(alert).await {
            tracing::warn!(
                brick_id = %step.id,
                error = %alert_error,
                "Failed to send deployment alert"
            );
        }
    }

    fn record_trace(
        &self,
        step: &BrickConfig,
        index: usize,
        scope: &RunScope,
        rendered_args: Value,
        outcome: TraceOutcome,
        duration_ms: u64,
    ) {
        self.inner.trace_sink.record(TraceRecord {
            run_id: scope.run_id,
            brick_id: step.id.clone(),
            instance_id: step.instance_id,
            label: step.label.clone(),
            index,
            rendered_args,
            outcome,
            timestamp: Utc::now(),
            duration_ms,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ConfigValue;
    use crate::trace::TraceEmitter;
    use brick_types::RegistryId;
    use serde_json::json;

    fn step(id: &'static str) -> BrickConfig {
        BrickConfig::new(RegistryId::from_static(id))
    }

    fn v3() -> RunOptions {
        RunOptions::new(ApiVersion::V3)
    }

    // 1. Empty pipeline returns null
    #[tokio::test]
    async fn empty_pipeline_returns_null() {
        let executor = PipelineExecutor::with_default_registry();
        let result = executor
            .run(&Pipeline::default(), json!({"a": 1}), v3())
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    // 2. Last step's value is returned
    #[tokio::test]
    async fn returns_last_step_value() {
        let executor = PipelineExecutor::with_default_registry();
        let pipeline = Pipeline::new(vec![
            step("@brick/identity").arg("n", 1i64),
            step("@brick/identity").arg("n", 2i64),
        ]);
        let result = executor.run(&pipeline, Value::Null, v3()).await.unwrap();
        assert_eq!(result, json!({"n": 2}));
    }

    // 3. Output keys are visible to later steps
    #[tokio::test]
    async fn output_key_binds_for_later_steps() {
        let executor = PipelineExecutor::with_default_registry();
        let pipeline = Pipeline::new(vec![
            step("@brick/identity").arg("n", 1i64).output_key("first"),
            step("@brick/identity").arg("seen", ConfigValue::var("@first.n")),
        ]);
        let result = executor.run(&pipeline, Value::Null, v3()).await.unwrap();
        assert_eq!(result, json!({"seen": 1}));
    }

    // 4. Falsy condition skips the step and emits a skipped trace
    #[tokio::test]
    async fn falsy_condition_skips_step() {
        let emitter = TraceEmitter::new(16);
        let mut rx = emitter.subscribe();
        let executor = PipelineExecutor::builder(default_registry())
            .trace_sink(Arc::new(emitter))
            .build();
        let pipeline = Pipeline::new(vec![
            step("@brick/identity").arg("n", 1i64),
            step("@brick/throw").arg("message", "never").when(ConfigValue::var("@input.enabled")),
        ]);

        let result = executor
            .run(&pipeline, json!({"enabled": false}), v3())
            .await
            .unwrap();
        assert_eq!(result, json!({"n": 1}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.outcome, TraceOutcome::Output(json!({"n": 1})));
        assert_eq!(second.outcome, TraceOutcome::Skipped);
        assert_eq!(second.index, 1);
    }

    // 5. Unknown brick fails wrapped in a ContextError
    #[tokio::test]
    async fn unknown_brick_is_wrapped() {
        let executor = PipelineExecutor::with_default_registry();
        let pipeline = Pipeline::new(vec![step("acme/missing")]);
        let err = executor.run(&pipeline, Value::Null, v3()).await.unwrap_err();
        assert_eq!(err.name(), "ContextError");
        assert!(matches!(err.root_cause(), BrickError::UnknownBrick(id) if id.as_str() == "acme/missing"));
    }

    // 6. Schema violations abort with a ValidationError cause
    #[tokio::test]
    async fn invalid_args_fail_validation() {
        let executor = PipelineExecutor::with_default_registry();
        let pipeline = Pipeline::new(vec![step("@brick/throw")]);
        let err = executor.run(&pipeline, Value::Null, v3()).await.unwrap_err();
        assert_eq!(err.root_cause().name(), "ValidationError");
    }

    // 7. ContextError carries a snapshot of the failing step's context
    #[tokio::test]
    async fn context_error_snapshots_context() {
        let executor = PipelineExecutor::with_default_registry();
        let pipeline = Pipeline::new(vec![
            step("@brick/identity").arg("n", 1i64).output_key("first"),
            step("@brick/throw").arg("message", "boom"),
        ]);
        let err = executor.run(&pipeline, json!("in"), v3()).await.unwrap_err();
        let BrickError::Context { brick_id, context, .. } = &err else {
            panic!("expected ContextError, got {err:?}");
        };
        assert_eq!(brick_id.as_str(), "@brick/throw");
        assert_eq!(context["@first"], json!({"n": 1}));
        assert_eq!(context["@input"], json!("in"));
    }

    // 8. Mod options are bound as @options, defaulting to an empty object
    #[tokio::test]
    async fn mod_options_are_bound() {
        let executor = PipelineExecutor::with_default_registry();
        let pipeline = Pipeline::new(vec![
            step("@brick/identity").arg("options", ConfigValue::var("@options")),
        ]);
        let result = executor
            .run(&pipeline, Value::Null, v3().with_mod_options(json!({"mode": "fast"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"options": {"mode": "fast"}}));

        let result = executor
            .run(&pipeline, Value::Null, v3().with_mod_options(Value::Null))
            .await
            .unwrap();
        assert_eq!(result, json!({"options": {}}));
    }
}
