//! Brick pipeline runtime: expressions, argument rendering, execution, and
//! control flow.
//!
//! This crate interprets declarative pipelines: ordered brick configs whose
//! arguments are template, variable, pipeline, or deferred expressions. It
//! renders each step's arguments against a copy-on-write context, dispatches
//! to registered bricks, threads output keys, and provides the if-else,
//! for-each, try-except and retry control-flow bricks.

pub mod alerts;
pub mod brick;
pub mod bricks;
pub mod document;
pub mod executor;
pub mod expression;
pub mod logger;
pub mod path;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod retry;
pub mod schema;
pub mod services;
pub mod template;
pub mod trace;
pub mod validation;

pub use alerts::{DeploymentAlert, DeploymentAlerter, NoopAlerter, TracingAlerter};
pub use brick::{Brick, BrickOptions, Root};
pub use bricks::{
    ForEachBrick, IdentityBrick, IfElseBrick, LogBrick, RetryBrick, ThrowBrick, TryExceptBrick,
};
pub use document::{ApiVersion, PipelineDocument};
pub use executor::{PipelineExecutor, PipelineExecutorBuilder, RunOptions};
pub use expression::{ConfigValue, Expression, ExpressionKind, PipelineExpression, TemplateEngine};
pub use logger::BrickLogger;
pub use pipeline::{BrickConfig, OnError, Pipeline};
pub use registry::{default_registry, BrickRegistry};
pub use render::{truthy, ArgumentRenderer, RenderMode};
pub use retry::{retry_with_backoff, BackoffPolicy};
pub use schema::{AcceptAllValidator, BasicSchemaValidator, SchemaValidator};
pub use services::{
    build_service_context, locate_with_retry, ConfiguredService, FileIntegrationLocator,
    IntegrationLocator, ServiceContext, ServiceContextEntry, ServiceDependency,
    StaticIntegrationLocator,
};
pub use template::{InterpolationRenderer, RendererRegistry, TemplateRenderer};
pub use trace::{NullTraceSink, TraceEmitter, TraceOutcome, TraceRecord, TraceSink};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};

pub use brick_types::{BrickError, Context, RegistryId, Result};
