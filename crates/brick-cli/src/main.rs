//! CLI binary for running and validating brick pipeline documents.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use brick_runtime::{
    build_service_context, default_registry, validate, validate_or_raise, BrickRegistry,
    FileIntegrationLocator, IntegrationLocator, Pipeline, PipelineDocument, PipelineExecutor,
    Root, Severity, StaticIntegrationLocator, TraceEmitter, TracingAlerter,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bricks", version, about = "Runner for declarative brick pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline document
    Run {
        /// Path to the pipeline document (JSON)
        document: PathBuf,

        /// Pipeline input as a JSON value, bound as @input
        #[arg(short, long)]
        input: Option<String>,

        /// JSON file holding an array of configured integrations
        #[arg(long)]
        integrations: Option<PathBuf>,

        /// Selector of the element root-aware bricks operate on (default: document)
        #[arg(long)]
        root: Option<String>,

        /// Deployment id; enables deployment alerts for steps that request them
        #[arg(long)]
        deployment_id: Option<String>,

        /// Fixed run id (default: random)
        #[arg(long)]
        run_id: Option<Uuid>,

        /// Print one JSON trace record per executed step to stderr
        #[arg(long)]
        trace: bool,
    },

    /// Validate a pipeline document
    Validate {
        /// Path to the pipeline document (JSON)
        document: PathBuf,
    },

    /// Show information about a pipeline document
    Info {
        /// Path to the pipeline document (JSON)
        document: PathBuf,
    },

    /// List the built-in bricks
    Bricks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the pipeline result.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            document,
            input,
            integrations,
            root,
            deployment_id,
            run_id,
            trace,
        } => {
            let args = RunArgs {
                input,
                integrations,
                root,
                deployment_id,
                run_id,
                trace,
            };
            cmd_run(&document, args).await?;
        }
        Commands::Validate { document } => {
            cmd_validate(&document).await?;
        }
        Commands::Info { document } => {
            cmd_info(&document).await?;
        }
        Commands::Bricks => {
            cmd_bricks(&default_registry());
        }
    }

    Ok(())
}

async fn load_document(path: &Path) -> anyhow::Result<PipelineDocument> {
    PipelineDocument::load(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))
}

struct RunArgs {
    input: Option<String>,
    integrations: Option<PathBuf>,
    root: Option<String>,
    deployment_id: Option<String>,
    run_id: Option<Uuid>,
    trace: bool,
}

async fn cmd_run(path: &Path, args: RunArgs) -> anyhow::Result<()> {
    let document = load_document(path).await?;
    let registry = default_registry();
    validate_or_raise(&document, &registry)?;

    let input: Value = match &args.input {
        Some(raw) => serde_json::from_str(raw).context("--input is not valid JSON")?,
        None => Value::Null,
    };

    let locator: Box<dyn IntegrationLocator> = match &args.integrations {
        Some(file) => Box::new(FileIntegrationLocator::open(file).await?),
        None => Box::new(StaticIntegrationLocator::default()),
    };
    let services =
        build_service_context(locator.as_ref(), &document.integration_dependencies).await?;

    let mut options = document.run_options(services);
    if let Some(root) = &args.root {
        options = options.with_root(Root::parse(Some(root)));
    }
    if let Some(deployment_id) = args.deployment_id {
        options = options.with_deployment_id(deployment_id);
    }
    if let Some(run_id) = args.run_id {
        options = options.with_run_id(run_id);
    }

    let mut builder = PipelineExecutor::builder(registry).alerter(Arc::new(TracingAlerter));
    let mut printer = None;
    if args.trace {
        let emitter = TraceEmitter::default();
        let mut rx = emitter.subscribe();
        builder = builder.trace_sink(Arc::new(emitter));
        printer = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(record) => match serde_json::to_string(&record) {
                        Ok(line) => eprintln!("{line}"),
                        Err(err) => tracing::warn!(error = %err, "Unserializable trace record"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Trace output fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }
    let executor = builder.build();

    let result = executor.run(&document.pipeline, input, options).await;
    // Dropping the executor closes the trace channel so the printer drains and exits.
    drop(executor);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let document = load_document(path).await?;
    let diagnostics = validate(&document, &default_registry());

    if diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        match &diag.path {
            Some(location) => println!("[{}] {} at {}: {}", severity, diag.rule, location, diag.message),
            None => println!("[{}] {}: {}", severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let document = load_document(path).await?;
    let registry = default_registry();

    if let Some(name) = &document.name {
        println!("Pipeline: {}", name);
    }
    println!("API version: {}", document.api_version);
    println!("Steps: {}", document.pipeline.len());
    println!("Pure: {}", registry.is_pipeline_pure(&document.pipeline));
    println!(
        "Root-aware: {}",
        registry.is_pipeline_root_aware(&document.pipeline)
    );
    if let Some(deployment_id) = &document.deployment_id {
        println!("Deployment: {}", deployment_id);
    }

    let mut used = BTreeSet::new();
    collect_brick_ids(&document.pipeline, &mut used);
    println!("\nBricks:");
    for id in &used {
        let marker = if registry.has(id) { "" } else { " (unknown)" };
        println!("  {}{}", id, marker);
    }

    if !document.integration_dependencies.is_empty() {
        println!("\nIntegrations:");
        for dependency in &document.integration_dependencies {
            match &dependency.config_id {
                Some(config_id) => println!(
                    "  @{} <- {} (config {})",
                    dependency.output_key.trim_start_matches('@'),
                    dependency.integration_id,
                    config_id
                ),
                None => println!(
                    "  @{} <- {}",
                    dependency.output_key.trim_start_matches('@'),
                    dependency.integration_id
                ),
            }
        }
    }

    Ok(())
}

/// Brick ids referenced by `pipeline`, including nested sub-pipelines.
fn collect_brick_ids(pipeline: &Pipeline, used: &mut BTreeSet<String>) {
    for step in pipeline {
        used.insert(step.id.to_string());
        for value in step.config.values() {
            value.for_each_pipeline(&mut |nested| collect_brick_ids(&nested.pipeline, used));
        }
    }
}

fn cmd_bricks(registry: &BrickRegistry) {
    for id in registry.ids() {
        let Some(brick) = registry.get(id.as_str()) else {
            continue;
        };
        let mut traits = Vec::new();
        if brick.is_pure() {
            traits.push("pure");
        }
        if brick.is_root_aware() {
            traits.push("root-aware");
        }
        if traits.is_empty() {
            println!("{}", id);
        } else {
            println!("{} [{}]", id, traits.join(", "));
        }
    }
}
