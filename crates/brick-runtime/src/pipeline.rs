//! Declarative brick configuration and pipelines.

use std::collections::BTreeMap;

use brick_types::RegistryId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::expression::{ConfigValue, TemplateEngine};

/// Per-step failure handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnError {
    /// Notify the deployment alerting channel when this step fails.
    #[serde(default)]
    pub alert: bool,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickConfig {
    pub id: RegistryId,

    #[serde(default)]
    pub config: BTreeMap<String, ConfigValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,

    /// Skip the step when this renders falsy.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConfigValue>,

    /// Engine used for implicit-mode rendering of this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_engine: Option<TemplateEngine>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
}

impl BrickConfig {
    pub fn new(id: RegistryId) -> Self {
        Self {
            id,
            config: BTreeMap::new(),
            output_key: None,
            on_error: None,
            condition: None,
            template_engine: None,
            label: None,
            instance_id: None,
        }
    }

    /// Set a config argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(name.into(), value.into());
        self
    }

    pub fn output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = Some(output_key.into());
        self
    }

    pub fn alert_on_error(mut self) -> Self {
        self.on_error = Some(OnError { alert: true });
        self
    }

    pub fn when(mut self, condition: impl Into<ConfigValue>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether a failure of this step should raise a deployment alert.
    pub fn alerts(&self) -> bool {
        self.on_error.as_ref().is_some_and(|on_error| on_error.alert)
    }
}

/// An ordered list of brick configs forming one control-flow scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline(Vec<BrickConfig>);

impl Pipeline {
    pub fn new(steps: Vec<BrickConfig>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[BrickConfig] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BrickConfig> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<BrickConfig>> for Pipeline {
    fn from(steps: Vec<BrickConfig>) -> Self {
        Self(steps)
    }
}

impl FromIterator<BrickConfig> for Pipeline {
    fn from_iter<I: IntoIterator<Item = BrickConfig>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Pipeline {
    type Item = &'a BrickConfig;
    type IntoIter = std::slice::Iter<'a, BrickConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn brick_config_deserializes_camel_case() {
        let step: BrickConfig = serde_json::from_value(json!({
            "id": "@brick/identity",
            "config": {"message": "hi"},
            "outputKey": "foo",
            "onError": {"alert": true},
            "if": true,
            "templateEngine": "nunjucks",
            "label": "Say hi"
        }))
        .unwrap();

        assert_eq!(step.id.as_str(), "@brick/identity");
        assert_eq!(step.output_key.as_deref(), Some("foo"));
        assert!(step.alerts());
        assert_eq!(step.template_engine, Some(TemplateEngine::Nunjucks));
        assert_eq!(step.condition, Some(ConfigValue::Literal(json!(true))));
        assert_eq!(step.config["message"], ConfigValue::Literal(json!("hi")));
    }

    #[test]
    fn brick_config_defaults() {
        let step: BrickConfig = serde_json::from_value(json!({"id": "echo"})).unwrap();
        assert!(step.config.is_empty());
        assert!(step.output_key.is_none());
        assert!(!step.alerts());
    }

    #[test]
    fn invalid_brick_id_is_rejected() {
        let result = serde_json::from_value::<BrickConfig>(json!({"id": "Not An Id"}));
        assert!(result.is_err());
    }

    #[test]
    fn pipeline_is_a_json_array() {
        let pipeline: Pipeline =
            serde_json::from_value(json!([{"id": "a/one"}, {"id": "a/two"}])).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.steps()[1].id.as_str(), "a/two");
        assert_eq!(
            serde_json::to_value(&pipeline).unwrap(),
            json!([{"id": "a/one", "config": {}}, {"id": "a/two", "config": {}}])
        );
    }
}
