//! Per-step trace records.
//!
//! Every step produces one [`TraceRecord`], handed to a [`TraceSink`].
//! [`TraceEmitter`] publishes records on a [`tokio::sync::broadcast`] channel so
//! external observers (telemetry, CLI output, tests) can subscribe without
//! coupling to the executor.

use brick_types::RegistryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TraceOutcome {
    Output(Value),
    /// Serialized error, see `BrickError::to_serialized`.
    Error(Value),
    /// The step's condition rendered falsy.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub run_id: Uuid,
    pub brick_id: RegistryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Position of the step within its pipeline scope.
    pub index: usize,
    pub rendered_args: Value,
    pub outcome: TraceOutcome,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TraceRecord {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, TraceOutcome::Error(_))
    }
}

/// Append-only destination for trace records.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn record(&self, _record: TraceRecord) {}
}

/// Trace sink wrapping a broadcast sender.
#[derive(Clone)]
pub struct TraceEmitter {
    sender: tokio::sync::broadcast::Sender<TraceRecord>,
}

impl TraceEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to records. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TraceRecord> {
        self.sender.subscribe()
    }
}

impl TraceSink for TraceEmitter {
    /// If there are no active receivers the record is silently dropped.
    fn record(&self, record: TraceRecord) {
        let _ = self.sender.send(record);
    }
}

impl Default for TraceEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
