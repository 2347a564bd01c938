use async_trait::async_trait;
use brick_types::{output_binding_key, RegistryId, Result};
use serde_json::{json, Value};

use super::{key_arg, optional_pipeline_arg, pipeline_arg, pipeline_schema};
use crate::brick::{Brick, BrickOptions};

/// `@brick/try-except`: run `try`; on failure run `except` with the serialized
/// error bound as `@<errorKey>` and return its result instead. Without an
/// `except` branch the failure is swallowed and the result is null.
pub struct TryExceptBrick;

#[async_trait]
impl Brick for TryExceptBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/try-except")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "try": pipeline_schema(),
                "except": pipeline_schema(),
                "errorKey": {"type": "string"}
            },
            "required": ["try"]
        })
    }

    fn is_root_aware(&self) -> bool {
        true
    }

    async fn run(&self, args: Value, options: &BrickOptions) -> Result<Value> {
        let try_branch = pipeline_arg(self.id(), &args, "try")?;
        let except_branch = optional_pipeline_arg(self.id(), &args, "except")?;
        let error_key = output_binding_key(&key_arg(self.id(), &args, "errorKey", "error")?);

        match options.run_pipeline(&try_branch, Vec::new()).await {
            Ok(value) => Ok(value),
            Err(error) => {
                options.logger.info(&format!("caught {}: {error}", error.root_cause().name()));
                match except_branch {
                    Some(branch) => {
                        options
                            .run_pipeline(&branch, vec![(error_key, error.to_serialized())])
                            .await
                    }
                    None => Ok(Value::Null),
                }
            }
        }
    }
}
