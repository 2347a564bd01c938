use std::time::Duration;

use async_trait::async_trait;
use brick_types::{BrickError, RegistryId, Result};
use serde_json::{json, Value};

use super::{pipeline_arg, pipeline_schema};
use crate::brick::{Brick, BrickOptions};
use crate::retry::{retry_with_backoff, BackoffPolicy};

const DEFAULT_MAX_RETRIES: u64 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// `@brick/retry`: run `body` up to `maxRetries` times in total, waiting
/// between attempts. The last attempt's error is re-raised unchanged.
pub struct RetryBrick;

impl RetryBrick {
    /// Non-negative integer argument `arg`, or `default` when absent.
    fn count(&self, args: &Value, arg: &str, default: u64) -> Result<u64> {
        match args.get(arg) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| BrickError::InvalidArgument {
                brick_id: self.id(),
                arg: arg.into(),
                message: format!("expected a non-negative integer, got {value}"),
            }),
        }
    }

    fn policy(&self, args: &Value) -> Result<BackoffPolicy> {
        let interval = Duration::from_millis(self.count(args, "intervalMillis", 0)?);
        match args.get("backoff").and_then(Value::as_str).unwrap_or("fixed") {
            "fixed" | "exponential" if interval.is_zero() => Ok(BackoffPolicy::Immediate),
            "fixed" => Ok(BackoffPolicy::Fixed(interval)),
            "exponential" => Ok(BackoffPolicy::Exponential {
                initial: interval,
                cap: MAX_BACKOFF.max(interval),
            }),
            other => Err(BrickError::InvalidArgument {
                brick_id: self.id(),
                arg: "backoff".into(),
                message: format!("unknown backoff '{other}'"),
            }),
        }
    }
}

#[async_trait]
impl Brick for RetryBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/retry")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "body": pipeline_schema(),
                "maxRetries": {"type": "integer", "minimum": 0},
                "intervalMillis": {"type": "integer", "minimum": 0},
                "backoff": {"type": "string", "enum": ["fixed", "exponential"]}
            },
            "required": ["body"]
        })
    }

    fn is_root_aware(&self) -> bool {
        true
    }

    async fn run(&self, args: Value, options: &BrickOptions) -> Result<Value> {
        let body = pipeline_arg(self.id(), &args, "body")?;
        let max_attempts = self.count(&args, "maxRetries", DEFAULT_MAX_RETRIES)? as usize;
        let policy = self.policy(&args)?;

        let body = &body;
        retry_with_backoff(
            move |attempt| {
                if attempt > 0 {
                    options.logger.info(&format!("retry attempt {}", attempt + 1));
                }
                options.run_pipeline(body, Vec::new())
            },
            max_attempts,
            &policy,
            self.id().as_str(),
        )
        .await
    }
}
