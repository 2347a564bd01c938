//! Integration dependencies and the service context built from them.
//!
//! A document declares which integrations it needs and the output key each one
//! is bound under. [`build_service_context`] resolves every dependency through
//! an [`IntegrationLocator`] and produces `@<outputKey>` bindings holding the
//! sanitized configuration fields plus a hidden `__service` back-reference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use brick_types::{is_reserved_output_key, output_binding_key, BrickError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::path::SERVICE_BACKREF_KEY;

// ---------------------------------------------------------------------------
// Dependency and configured service
// ---------------------------------------------------------------------------

/// A declared integration dependency: `{id, outputKey, config?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDependency {
    #[serde(rename = "id")]
    pub integration_id: String,
    pub output_key: String,
    /// Specific configuration to use; the first matching one otherwise.
    #[serde(rename = "config", default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
}

impl ServiceDependency {
    pub fn new(integration_id: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.into(),
            output_key: output_key.into(),
            config_id: None,
        }
    }

    pub fn with_config(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = Some(config_id.into());
        self
    }
}

/// A concrete configuration of an integration, as returned by a locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredService {
    pub id: String,
    pub integration_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Config fields that must never reach a pipeline context.
    #[serde(default)]
    pub secret_fields: Vec<String>,
    /// Requests are routed through a credential proxy.
    #[serde(default)]
    pub proxy: bool,
}

impl ConfiguredService {
    pub fn new(id: impl Into<String>, integration_id: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            integration_id: integration_id.into(),
            label: None,
            config,
            secret_fields: Vec::new(),
            proxy: false,
        }
    }

    pub fn with_secret(mut self, field: impl Into<String>) -> Self {
        self.secret_fields.push(field.into());
        self
    }

    /// Config fields with secrets removed.
    pub fn sanitized_config(&self) -> Map<String, Value> {
        self.config
            .iter()
            .filter(|(key, _)| !self.secret_fields.iter().any(|secret| secret == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// This service with its secret fields stripped from `config`.
    pub fn sanitized(&self) -> ConfiguredService {
        ConfiguredService {
            config: self.sanitized_config(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Service context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceContextEntry {
    pub output_key: String,
    pub fields: Map<String, Value>,
    pub service: ConfiguredService,
}

impl ServiceContextEntry {
    pub fn new(output_key: impl Into<String>, service: ConfiguredService) -> Self {
        let service = service.sanitized();
        Self {
            output_key: output_key.into(),
            fields: service.config.clone(),
            service,
        }
    }

    /// The binding value: sanitized fields spread plus the `__service` back-reference.
    pub fn to_context_value(&self) -> Result<Value> {
        let mut value = self.fields.clone();
        value.insert(SERVICE_BACKREF_KEY.into(), serde_json::to_value(&self.service)?);
        Ok(Value::Object(value))
    }
}

/// Resolved integration bindings for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceContext {
    entries: BTreeMap<String, ServiceContextEntry>,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `entry` under its output key. `@input` and `@options` are rejected.
    pub fn insert(&mut self, entry: ServiceContextEntry) -> Result<()> {
        if is_reserved_output_key(&entry.output_key) {
            return Err(BrickError::ReservedOutputKey(entry.output_key));
        }
        self.entries.insert(output_binding_key(&entry.output_key), entry);
        Ok(())
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ServiceContextEntry>) -> Result<Self> {
        let mut context = ServiceContext::new();
        for entry in entries {
            context.insert(entry)?;
        }
        Ok(context)
    }

    /// Entry bound under `output_key` (`sheets` or `@sheets`).
    pub fn get(&self, output_key: &str) -> Option<&ServiceContextEntry> {
        self.entries.get(&output_binding_key(output_key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(@outputKey, value)` pairs for context construction.
    pub fn bindings(&self) -> Result<Vec<(String, Value)>> {
        self.entries
            .iter()
            .map(|(key, entry)| Ok((key.clone(), entry.to_context_value()?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Resolves dependencies to configured services.
#[async_trait]
pub trait IntegrationLocator: Send + Sync {
    /// Returns `BrickError::IntegrationNotFound` when nothing matches.
    async fn locate(&self, integration_id: &str, config_id: Option<&str>) -> Result<ConfiguredService>;

    /// Reload the locator's cache.
    async fn refresh(&self) -> Result<()>;
}

/// Locate `dependency`, refreshing once and retrying once if it is not found.
pub async fn locate_with_retry(
    locator: &dyn IntegrationLocator,
    dependency: &ServiceDependency,
) -> Result<ConfiguredService> {
    let config_id = dependency.config_id.as_deref();
    let service = match locator.locate(&dependency.integration_id, config_id).await {
        Err(BrickError::IntegrationNotFound { .. }) => {
            tracing::debug!(
                integration_id = %dependency.integration_id,
                "Integration not found, refreshing locator"
            );
            locator.refresh().await?;
            locator.locate(&dependency.integration_id, config_id).await?
        }
        other => other?,
    };

    if service.integration_id != dependency.integration_id {
        return Err(BrickError::IncompatibleService {
            integration_id: dependency.integration_id.clone(),
            message: format!(
                "configuration '{}' belongs to integration '{}'",
                service.id, service.integration_id
            ),
        });
    }
    Ok(service)
}

/// Resolve all dependencies concurrently into a [`ServiceContext`].
pub async fn build_service_context(
    locator: &dyn IntegrationLocator,
    dependencies: &[ServiceDependency],
) -> Result<ServiceContext> {
    if let Some(dependency) = dependencies
        .iter()
        .find(|dependency| is_reserved_output_key(&dependency.output_key))
    {
        return Err(BrickError::ReservedOutputKey(dependency.output_key.clone()));
    }
    let entries = futures::future::try_join_all(dependencies.iter().map(|dependency| async move {
        let service = locate_with_retry(locator, dependency).await?;
        Ok::<_, BrickError>(ServiceContextEntry::new(dependency.output_key.clone(), service))
    }))
    .await?;
    ServiceContext::from_entries(entries)
}

fn find_service(
    services: &[ConfiguredService],
    integration_id: &str,
    config_id: Option<&str>,
) -> Result<ConfiguredService> {
    let found = match config_id {
        Some(config_id) => services.iter().find(|service| service.id == config_id),
        None => services
            .iter()
            .find(|service| service.integration_id == integration_id),
    };
    found.cloned().ok_or_else(|| BrickError::IntegrationNotFound {
        integration_id: integration_id.to_string(),
        config_id: config_id.map(str::to_string),
    })
}

/// In-memory locator.
///
/// Services added with [`StaticIntegrationLocator::add_remote`] only become
/// visible after a refresh, which models a stale local cache.
#[derive(Debug, Default)]
pub struct StaticIntegrationLocator {
    cached: RwLock<Vec<ConfiguredService>>,
    remote: RwLock<Vec<ConfiguredService>>,
    refreshes: AtomicUsize,
}

impl StaticIntegrationLocator {
    pub fn new(services: Vec<ConfiguredService>) -> Self {
        Self {
            cached: RwLock::new(services),
            ..Self::default()
        }
    }

    pub async fn add_remote(&self, service: ConfiguredService) {
        self.remote.write().await.push(service);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntegrationLocator for StaticIntegrationLocator {
    async fn locate(&self, integration_id: &str, config_id: Option<&str>) -> Result<ConfiguredService> {
        find_service(&self.cached.read().await, integration_id, config_id)
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let pending: Vec<_> = self.remote.write().await.drain(..).collect();
        self.cached.write().await.extend(pending);
        Ok(())
    }
}

/// Locator backed by a JSON file holding an array of configured services.
/// The file is re-read on every refresh.
#[derive(Debug)]
pub struct FileIntegrationLocator {
    path: PathBuf,
    services: RwLock<Vec<ConfiguredService>>,
}

impl FileIntegrationLocator {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let services = Self::read(&path).await?;
        tracing::debug!(path = %path.display(), count = services.len(), "Loaded integrations");
        Ok(Self {
            path,
            services: RwLock::new(services),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(path: &Path) -> Result<Vec<ConfiguredService>> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl IntegrationLocator for FileIntegrationLocator {
    async fn locate(&self, integration_id: &str, config_id: Option<&str>) -> Result<ConfiguredService> {
        find_service(&self.services.read().await, integration_id, config_id)
    }

    async fn refresh(&self) -> Result<()> {
        let services = Self::read(&self.path).await?;
        *self.services.write().await = services;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sheets(id: &str) -> ConfiguredService {
        let config = json!({"spreadsheetId": "abc", "apiKey": "secret"});
        ConfiguredService::new(id, "google/sheet", config.as_object().cloned().unwrap())
            .with_secret("apiKey")
    }

    #[test]
    fn dependency_deserializes_wire_names() {
        let dep: ServiceDependency =
            serde_json::from_value(json!({"id": "google/sheet", "outputKey": "sheets", "config": "cfg-1"}))
                .unwrap();
        assert_eq!(dep, ServiceDependency::new("google/sheet", "sheets").with_config("cfg-1"));
    }

    #[test]
    fn context_entry_spreads_sanitized_fields_with_back_reference() {
        let entry = ServiceContextEntry::new("sheets", sheets("cfg-1"));
        let value = entry.to_context_value().unwrap();
        assert_eq!(value["spreadsheetId"], json!("abc"));
        assert!(value.get("apiKey").is_none());
        assert_eq!(value["__service"]["id"], json!("cfg-1"));
        assert!(value["__service"]["config"].get("apiKey").is_none());
    }

    #[tokio::test]
    async fn builds_context_for_all_dependencies() {
        let locator = StaticIntegrationLocator::new(vec![
            sheets("cfg-1"),
            ConfiguredService::new("cfg-2", "slack/webhook", Map::new()),
        ]);
        let context = build_service_context(
            &locator,
            &[
                ServiceDependency::new("google/sheet", "sheets"),
                ServiceDependency::new("slack/webhook", "@slack"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(context.len(), 2);
        assert!(context.get("sheets").is_some());
        let keys: Vec<_> = context.bindings().unwrap().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["@sheets", "@slack"]);
        assert_eq!(locator.refresh_count(), 0);
    }

    #[tokio::test]
    async fn reserved_output_keys_are_rejected() {
        let locator = StaticIntegrationLocator::new(vec![sheets("cfg-1")]);
        for output_key in ["input", "@options"] {
            let err = build_service_context(&locator, &[ServiceDependency::new("google/sheet", output_key)])
                .await
                .unwrap_err();
            assert!(matches!(&err, BrickError::ReservedOutputKey(key) if key == output_key));
        }

        let mut context = ServiceContext::new();
        let err = context
            .insert(ServiceContextEntry::new("@input", sheets("cfg-1")))
            .unwrap_err();
        assert_eq!(err.name(), "ReservedOutputKeyError");
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn refreshes_once_when_not_found() {
        let locator = StaticIntegrationLocator::new(Vec::new());
        locator.add_remote(sheets("cfg-1")).await;

        let service = locate_with_retry(&locator, &ServiceDependency::new("google/sheet", "sheets"))
            .await
            .unwrap();
        assert_eq!(service.id, "cfg-1");
        assert_eq!(locator.refresh_count(), 1);
    }

    #[tokio::test]
    async fn fails_after_single_refresh() {
        let locator = StaticIntegrationLocator::new(Vec::new());
        let err = locate_with_retry(&locator, &ServiceDependency::new("google/sheet", "sheets"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrickError::IntegrationNotFound { .. }));
        assert_eq!(locator.refresh_count(), 1);
    }

    #[tokio::test]
    async fn mismatched_configuration_is_incompatible() {
        let locator = StaticIntegrationLocator::new(vec![sheets("cfg-1")]);
        let dependency = ServiceDependency::new("slack/webhook", "slack").with_config("cfg-1");
        let err = locate_with_retry(&locator, &dependency).await.unwrap_err();
        assert_eq!(err.name(), "IncompatibleServiceError");
    }

    #[tokio::test]
    async fn file_locator_reloads_on_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        std::fs::write(&path, "[]").unwrap();

        let locator = FileIntegrationLocator::open(&path).await.unwrap();
        std::fs::write(&path, serde_json::to_string(&vec![sheets("cfg-1")]).unwrap()).unwrap();

        let service = locate_with_retry(&locator, &ServiceDependency::new("google/sheet", "sheets"))
            .await
            .unwrap();
        assert_eq!(service.id, "cfg-1");
    }

    #[tokio::test]
    async fn file_locator_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileIntegrationLocator::open(&path).await,
            Err(BrickError::Json(_))
        ));
    }
}
