//! Versioned pipeline documents.

use std::fmt;
use std::path::Path;

use brick_types::{BrickError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::brick::Root;
use crate::executor::RunOptions;
use crate::expression::TemplateEngine;
use crate::pipeline::Pipeline;
use crate::render::RenderMode;
use crate::services::{ServiceContext, ServiceDependency};

/// Document API version. Selects the argument rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V1,
    V2,
    V3,
}

impl ApiVersion {
    /// v3 renders explicitly; v1/v2 render implicitly with `engine`
    /// (mustache when unset).
    pub fn render_mode(&self, engine: Option<TemplateEngine>) -> RenderMode {
        match self {
            ApiVersion::V3 => RenderMode::Explicit,
            ApiVersion::V1 | ApiVersion::V2 => {
                RenderMode::Implicit(engine.unwrap_or(TemplateEngine::Mustache))
            }
        }
    }

    /// Pipeline and defer expressions are only meaningful in v3 documents.
    pub fn supports_control_flow(&self) -> bool {
        matches!(self, ApiVersion::V3)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
            ApiVersion::V3 => "v3",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline plus the metadata needed to run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDocument {
    pub api_version: ApiVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pipeline: Pipeline,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integration_dependencies: Vec<ServiceDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    /// Bound as `@options`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

impl PipelineDocument {
    pub fn new(api_version: ApiVersion, pipeline: Pipeline) -> Self {
        Self {
            api_version,
            name: None,
            pipeline,
            integration_dependencies: Vec::new(),
            deployment_id: None,
            options: Value::Null,
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        serde_json::from_str(source)
            .map_err(|err| BrickError::InvalidDocument(format!("cannot parse document: {err}")))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&source)
    }

    /// Run options derived from this document.
    pub fn run_options(&self, services: ServiceContext) -> RunOptions {
        let mut options = RunOptions::new(self.api_version)
            .with_services(services)
            .with_mod_options(self.options.clone())
            .with_root(Root::Document);
        if let Some(deployment_id) = &self.deployment_id {
            options = options.with_deployment_id(deployment_id.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_version_selects_render_mode() {
        assert_eq!(ApiVersion::V3.render_mode(None), RenderMode::Explicit);
        assert_eq!(
            ApiVersion::V3.render_mode(Some(TemplateEngine::Nunjucks)),
            RenderMode::Explicit
        );
        assert_eq!(
            ApiVersion::V1.render_mode(None),
            RenderMode::Implicit(TemplateEngine::Mustache)
        );
        assert_eq!(
            ApiVersion::V2.render_mode(Some(TemplateEngine::Handlebars)),
            RenderMode::Implicit(TemplateEngine::Handlebars)
        );
        assert!(ApiVersion::V3.supports_control_flow());
        assert!(!ApiVersion::V2.supports_control_flow());
    }

    #[test]
    fn parses_document() {
        let doc = PipelineDocument::from_json_str(
            r#"{
                "apiVersion": "v3",
                "name": "greet",
                "pipeline": [{"id": "@brick/identity", "config": {"x": 1}}],
                "integrationDependencies": [{"id": "google/sheet", "outputKey": "sheets"}],
                "deploymentId": "dep-1",
                "options": {"mode": "fast"}
            }"#,
        )
        .unwrap();

        assert_eq!(doc.api_version, ApiVersion::V3);
        assert_eq!(doc.pipeline.len(), 1);
        assert_eq!(doc.integration_dependencies[0].output_key, "sheets");

        let options = doc.run_options(ServiceContext::new());
        assert_eq!(options.deployment_id.as_deref(), Some("dep-1"));
        assert_eq!(options.mod_options, json!({"mode": "fast"}));
    }

    #[test]
    fn missing_api_version_is_rejected() {
        let err = PipelineDocument::from_json_str(r#"{"pipeline": []}"#).unwrap_err();
        assert_eq!(err.name(), "InvalidDocumentError");
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"apiVersion": "v1", "pipeline": []}"#).unwrap();

        let doc = PipelineDocument::load(&path).await.unwrap();
        assert_eq!(doc.api_version, ApiVersion::V1);
        assert!(doc.pipeline.is_empty());
    }
}
