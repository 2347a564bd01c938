//! Control-flow and built-in bricks.

pub mod builtin;
pub mod for_each;
pub mod if_else;
pub mod retry;
pub mod try_except;

pub use builtin::{IdentityBrick, LogBrick, ThrowBrick};
pub use for_each::ForEachBrick;
pub use if_else::IfElseBrick;
pub use retry::RetryBrick;
pub use try_except::TryExceptBrick;

use brick_types::{BrickError, RegistryId, Result};
use serde_json::Value;

use crate::expression::PipelineExpression;

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn invalid(brick_id: RegistryId, arg: &str, message: impl Into<String>) -> BrickError {
    BrickError::InvalidArgument {
        brick_id,
        arg: arg.to_string(),
        message: message.into(),
    }
}

/// A required pipeline argument.
pub(crate) fn pipeline_arg(brick_id: RegistryId, args: &Value, name: &str) -> Result<PipelineExpression> {
    optional_pipeline_arg(brick_id.clone(), args, name)?
        .ok_or_else(|| invalid(brick_id, name, "a pipeline is required"))
}

/// An optional pipeline argument; missing or null yields `None`.
pub(crate) fn optional_pipeline_arg(
    brick_id: RegistryId,
    args: &Value,
    name: &str,
) -> Result<Option<PipelineExpression>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => PipelineExpression::from_json(value)
            .map(Some)
            .map_err(|err| invalid(brick_id, name, err.to_string())),
    }
}

/// A binding-name argument such as `elementKey`, defaulting to `default`.
pub(crate) fn key_arg(brick_id: RegistryId, args: &Value, name: &str, default: &str) -> Result<String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(key)) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        Some(other) => Err(invalid(brick_id, name, format!("expected a non-empty string, got {other}"))),
    }
}

/// Schema for an argument holding a pipeline expression.
pub(crate) fn pipeline_schema() -> Value {
    serde_json::json!({"type": "object", "required": ["__type__"]})
}
