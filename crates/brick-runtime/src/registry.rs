//! Brick registry and static pipeline analysis.

use std::collections::HashMap;
use std::sync::Arc;

use brick_types::RegistryId;

use crate::brick::Brick;
use crate::pipeline::{BrickConfig, Pipeline};

// ---------------------------------------------------------------------------
// BrickRegistry
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
pub struct BrickRegistry {
    bricks: HashMap<RegistryId, Arc<dyn Brick>>,
}

impl BrickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a brick under its own id, replacing any previous registration.
    pub fn register(&mut self, brick: impl Brick + 'static) {
        self.register_arc(Arc::new(brick));
    }

    pub fn register_arc(&mut self, brick: Arc<dyn Brick>) {
        self.bricks.insert(brick.id(), brick);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Brick>> {
        self.bricks.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.bricks.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&RegistryId> {
        let mut ids: Vec<_> = self.bricks.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    /// Whether every step, including nested sub-pipelines, is a known pure brick.
    pub fn is_pipeline_pure(&self, pipeline: &Pipeline) -> bool {
        pipeline.iter().all(|step| {
            self.get(step.id.as_str()).is_some_and(|brick| brick.is_pure())
                && nested_pipelines(step).iter().all(|nested| self.is_pipeline_pure(nested))
        })
    }

    /// Whether any step, including nested sub-pipelines, reads the root anchor.
    /// Unknown bricks are assumed to.
    pub fn is_pipeline_root_aware(&self, pipeline: &Pipeline) -> bool {
        pipeline.iter().any(|step| {
            self.get(step.id.as_str()).map_or(true, |brick| brick.is_root_aware())
                || nested_pipelines(step)
                    .iter()
                    .any(|nested| self.is_pipeline_root_aware(nested))
        })
    }
}

fn nested_pipelines(step: &BrickConfig) -> Vec<&Pipeline> {
    let mut nested = Vec::new();
    for value in step.config.values() {
        value.for_each_pipeline(&mut |expression| nested.push(&expression.pipeline));
    }
    nested
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// Registry holding the control-flow and built-in bricks.
pub fn default_registry() -> BrickRegistry {
    let mut reg = BrickRegistry::new();
    reg.register(crate::bricks::IfElseBrick);
    reg.register(crate::bricks::ForEachBrick);
    reg.register(crate::bricks::TryExceptBrick);
    reg.register(crate::bricks::RetryBrick);
    reg.register(crate::bricks::IdentityBrick);
    reg.register(crate::bricks::ThrowBrick);
    reg.register(crate::bricks::LogBrick);
    reg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ConfigValue;

    fn step(id: &'static str) -> BrickConfig {
        BrickConfig::new(RegistryId::from_static(id))
    }

    #[test]
    fn default_registry_has_builtins() {
        let reg = default_registry();
        for id in [
            "@brick/if-else",
            "@brick/for-each",
            "@brick/try-except",
            "@brick/retry",
            "@brick/identity",
            "@brick/throw",
            "@brick/log",
        ] {
            assert!(reg.has(id), "missing {id}");
        }
        assert_eq!(reg.len(), 7);
        assert!(!reg.has("nonexistent"));
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn ids_are_sorted() {
        let reg = default_registry();
        let ids: Vec<_> = reg.ids().into_iter().map(RegistryId::as_str).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn pure_pipeline_of_identity_bricks() {
        let reg = default_registry();
        let pipeline = Pipeline::new(vec![step("@brick/identity"), step("@brick/identity")]);
        assert!(reg.is_pipeline_pure(&pipeline));
        assert!(!reg.is_pipeline_root_aware(&pipeline));
        assert!(reg.is_pipeline_pure(&Pipeline::default()));
    }

    #[test]
    fn control_flow_is_impure_and_root_aware() {
        let reg = default_registry();
        let pipeline = Pipeline::new(vec![step("@brick/if-else")]);
        assert!(!reg.is_pipeline_pure(&pipeline));
        assert!(reg.is_pipeline_root_aware(&pipeline));
    }

    #[test]
    fn unknown_bricks_are_impure() {
        let reg = default_registry();
        let pipeline = Pipeline::new(vec![step("acme/unknown")]);
        assert!(!reg.is_pipeline_pure(&pipeline));
        assert!(reg.is_pipeline_root_aware(&pipeline));
    }

    #[test]
    fn nested_pipelines_are_walked() {
        let reg = default_registry();
        let nested = Pipeline::new(vec![step("@brick/log")]);
        let pipeline = Pipeline::new(vec![
            step("@brick/identity").arg("inner", ConfigValue::pipeline(nested)),
        ]);
        assert!(!reg.is_pipeline_pure(&pipeline));
    }
}
