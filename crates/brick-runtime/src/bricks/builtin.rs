//! Leaf bricks shipped with the runtime.

use async_trait::async_trait;
use brick_types::{BrickError, RegistryId, Result};
use serde_json::{json, Value};

use crate::brick::{Brick, BrickOptions};

// ---------------------------------------------------------------------------
// IdentityBrick
// ---------------------------------------------------------------------------

/// `@brick/identity`: returns its arguments.
pub struct IdentityBrick;

#[async_trait]
impl Brick for IdentityBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/identity")
    }

    fn is_pure(&self) -> bool {
        true
    }

    async fn run(&self, args: Value, _options: &BrickOptions) -> Result<Value> {
        Ok(args)
    }
}

// ---------------------------------------------------------------------------
// ThrowBrick
// ---------------------------------------------------------------------------

/// `@brick/throw`: fails with a business error carrying `message`.
pub struct ThrowBrick;

#[async_trait]
impl Brick for ThrowBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/throw")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        })
    }

    async fn run(&self, args: Value, _options: &BrickOptions) -> Result<Value> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Err(BrickError::Business(message.to_string()))
    }
}

// ---------------------------------------------------------------------------
// LogBrick
// ---------------------------------------------------------------------------

/// `@brick/log`: writes `message` to the run log at `level`.
pub struct LogBrick;

#[async_trait]
impl Brick for LogBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/log")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "level": {"type": "string", "enum": ["debug", "info", "warn", "error"]}
            },
            "required": ["message"]
        })
    }

    async fn run(&self, args: Value, options: &BrickOptions) -> Result<Value> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match args.get("level").and_then(Value::as_str).unwrap_or("info") {
            "debug" => options.logger.debug(message),
            "warn" => options.logger.warn(message),
            "error" => options.logger.error(message),
            _ => options.logger.info(message),
        }
        Ok(Value::Null)
    }
}
