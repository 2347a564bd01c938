//! Scoped logging handed to every brick.

use brick_types::RegistryId;
use tracing::Span;
use uuid::Uuid;

/// A logger bound to a run and, once narrowed, to a single step.
///
/// Events are emitted inside a `tracing` span carrying `run_id`,
/// `deployment_id`, `brick_id` and the step index.
#[derive(Debug, Clone)]
pub struct BrickLogger {
    span: Span,
    run_id: Uuid,
    deployment_id: Option<String>,
    brick_id: Option<RegistryId>,
}

impl BrickLogger {
    pub fn for_run(run_id: Uuid, deployment_id: Option<&str>) -> Self {
        let span = tracing::info_span!(
            "pipeline_run",
            run_id = %run_id,
            deployment_id = deployment_id.unwrap_or_default(),
        );
        Self {
            span,
            run_id,
            deployment_id: deployment_id.map(str::to_string),
            brick_id: None,
        }
    }

    /// A child logger for step `index` running `brick_id`.
    pub fn for_brick(&self, brick_id: &RegistryId, index: usize) -> Self {
        let span = tracing::debug_span!(
            parent: &self.span,
            "brick",
            brick_id = %brick_id,
            index,
        );
        Self {
            span,
            run_id: self.run_id,
            deployment_id: self.deployment_id.clone(),
            brick_id: Some(brick_id.clone()),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }

    pub fn brick_id(&self) -> Option<&RegistryId> {
        self.brick_id.as_ref()
    }

    pub fn debug(&self, message: &str) {
        self.span.in_scope(|| tracing::debug!("{message}"));
    }

    pub fn info(&self, message: &str) {
        self.span.in_scope(|| tracing::info!("{message}"));
    }

    pub fn warn(&self, message: &str) {
        self.span.in_scope(|| tracing::warn!("{message}"));
    }

    pub fn error(&self, message: &str) {
        self.span.in_scope(|| tracing::error!("{message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brick_logger_inherits_run_fields() {
        let run_id = Uuid::new_v4();
        let run = BrickLogger::for_run(run_id, Some("dep-1"));
        let brick = run.for_brick(&RegistryId::from_static("@brick/log"), 2);

        assert_eq!(brick.run_id(), run_id);
        assert_eq!(brick.deployment_id(), Some("dep-1"));
        assert_eq!(brick.brick_id().map(RegistryId::as_str), Some("@brick/log"));
        assert!(run.brick_id().is_none());
        brick.info("logged without a subscriber");
    }
}
