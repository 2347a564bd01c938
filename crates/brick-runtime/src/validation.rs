//! Document validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on any `Error`-severity issue. Rules see every step, including steps nested
//! in sub-pipeline arguments.

use std::collections::HashSet;
use std::sync::LazyLock;

use brick_types::{is_reserved_output_key, output_binding_key, BrickError, Result};
use regex::Regex;
use serde::Serialize;

use crate::document::PipelineDocument;
use crate::expression::{ConfigValue, Expression};
use crate::pipeline::{BrickConfig, Pipeline};
use crate::registry::BrickRegistry;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// Location of the offending step, e.g. `pipeline[1].config.body[0]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, document: &PipelineDocument, registry: &BrickRegistry) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static OUTPUT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?[A-Za-z_][A-Za-z0-9_]*$").expect("output key pattern is valid"));

/// Visit every step with its path, descending into nested pipelines.
fn walk_steps<'a>(pipeline: &'a Pipeline, path: &str, visit: &mut dyn FnMut(&'a BrickConfig, &str)) {
    for (index, step) in pipeline.iter().enumerate() {
        let step_path = format!("{path}[{index}]");
        visit(step, &step_path);
        for (arg, value) in &step.config {
            let mut nested = Vec::new();
            value.for_each_pipeline(&mut |expression| nested.push(&expression.pipeline));
            for pipeline in nested {
                walk_steps(pipeline, &format!("{step_path}.config.{arg}"), visit);
            }
        }
    }
}

fn has_structural_expression(value: &ConfigValue) -> bool {
    match value {
        ConfigValue::Literal(_) => false,
        ConfigValue::Expression(Expression::Pipeline(_) | Expression::Defer(_)) => true,
        ConfigValue::Expression(_) => false,
        ConfigValue::Array(items) => items.iter().any(has_structural_expression),
        ConfigValue::Object(entries) => entries.values().any(has_structural_expression),
    }
}

fn error(rule: &str, message: String, path: &str, fix: Option<&str>) -> Diagnostic {
    Diagnostic {
        rule: rule.into(),
        severity: Severity::Error,
        message,
        path: Some(path.to_string()),
        fix: fix.map(String::from),
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct UnknownBrickRule;
impl LintRule for UnknownBrickRule {
    fn name(&self) -> &str { "unknown_brick" }
    fn apply(&self, document: &PipelineDocument, registry: &BrickRegistry) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        walk_steps(&document.pipeline, "pipeline", &mut |step, path| {
            if !registry.has(step.id.as_str()) {
                diagnostics.push(error(
                    self.name(),
                    format!("Brick '{}' is not registered", step.id),
                    path,
                    None,
                ));
            }
        });
        diagnostics
    }
}

struct InvalidOutputKeyRule;
impl LintRule for InvalidOutputKeyRule {
    fn name(&self) -> &str { "invalid_output_key" }
    fn apply(&self, document: &PipelineDocument, _registry: &BrickRegistry) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        walk_steps(&document.pipeline, "pipeline", &mut |step, path| {
            if let Some(output_key) = &step.output_key {
                if !OUTPUT_KEY.is_match(output_key) {
                    diagnostics.push(error(
                        self.name(),
                        format!("Output key '{output_key}' is not a valid identifier"),
                        path,
                        Some("Use letters, digits and underscores, not starting with a digit"),
                    ));
                }
            }
        });
        diagnostics
    }
}

struct ReservedOutputKeyRule;
impl LintRule for ReservedOutputKeyRule {
    fn name(&self) -> &str { "reserved_output_key" }
    fn apply(&self, document: &PipelineDocument, _registry: &BrickRegistry) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut check = |output_key: &str, path: &str| {
            if is_reserved_output_key(output_key) {
                diagnostics.push(error(
                    self.name(),
                    format!(
                        "Output key '{output_key}' would shadow the reserved {} binding",
                        output_binding_key(output_key)
                    ),
                    path,
                    None,
                ));
            }
        };
        for (index, dependency) in document.integration_dependencies.iter().enumerate() {
            check(&dependency.output_key, &format!("integrationDependencies[{index}]"));
        }
        walk_steps(&document.pipeline, "pipeline", &mut |step, path| {
            if let Some(output_key) = &step.output_key {
                check(output_key, path);
            }
        });
        diagnostics
    }
}

struct ControlFlowRequiresV3Rule;
impl LintRule for ControlFlowRequiresV3Rule {
    fn name(&self) -> &str { "control_flow_requires_v3" }
    fn apply(&self, document: &PipelineDocument, _registry: &BrickRegistry) -> Vec<Diagnostic> {
        if document.api_version.supports_control_flow() {
            return Vec::new();
        }
        document
            .pipeline
            .iter()
            .enumerate()
            .filter(|(_, step)| step.config.values().any(has_structural_expression))
            .map(|(index, step)| {
                error(
                    self.name(),
                    format!(
                        "Brick '{}' uses pipeline or defer arguments, which {} documents do not support",
                        step.id, document.api_version
                    ),
                    &format!("pipeline[{index}]"),
                    Some("Set apiVersion to v3"),
                )
            })
            .collect()
    }
}

struct DuplicateServiceKeyRule;
impl LintRule for DuplicateServiceKeyRule {
    fn name(&self) -> &str { "duplicate_service_key" }
    fn apply(&self, document: &PipelineDocument, _registry: &BrickRegistry) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        document
            .integration_dependencies
            .iter()
            .enumerate()
            .filter(|(_, dependency)| !seen.insert(output_binding_key(&dependency.output_key)))
            .map(|(index, dependency)| {
                error(
                    self.name(),
                    format!(
                        "Integration output key '{}' is declared more than once",
                        dependency.output_key
                    ),
                    &format!("integrationDependencies[{index}]"),
                    None,
                )
            })
            .collect()
    }
}

struct EmptyPipelineRule;
impl LintRule for EmptyPipelineRule {
    fn name(&self) -> &str { "empty_pipeline" }
    fn apply(&self, document: &PipelineDocument, _registry: &BrickRegistry) -> Vec<Diagnostic> {
        if document.pipeline.is_empty() {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: "Pipeline has no steps and always returns null".into(),
                path: None,
                fix: None,
            }]
        } else {
            vec![]
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Lint `document` against every built-in rule.
pub fn validate(document: &PipelineDocument, registry: &BrickRegistry) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(UnknownBrickRule),
        Box::new(InvalidOutputKeyRule),
        Box::new(ReservedOutputKeyRule),
        Box::new(ControlFlowRequiresV3Rule),
        Box::new(DuplicateServiceKeyRule),
        Box::new(EmptyPipelineRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(document, registry));
    }
    diagnostics
}

/// Lint `document`, failing with every error-level message joined together.
pub fn validate_or_raise(document: &PipelineDocument, registry: &BrickRegistry) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(document, registry);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(BrickError::InvalidDocument(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
