use async_trait::async_trait;
use brick_types::{RegistryId, Result};
use serde_json::{json, Value};

use super::{optional_pipeline_arg, pipeline_arg, pipeline_schema};
use crate::brick::{Brick, BrickOptions};
use crate::render::truthy;

/// `@brick/if-else`: run `if` when `condition` is truthy, else the optional
/// `else` branch. The branch not taken is never executed.
pub struct IfElseBrick;

#[async_trait]
impl Brick for IfElseBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/if-else")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "condition": {},
                "if": pipeline_schema(),
                "else": pipeline_schema()
            },
            "required": ["if"]
        })
    }

    fn is_root_aware(&self) -> bool {
        true
    }

    async fn run(&self, args: Value, options: &BrickOptions) -> Result<Value> {
        let condition = args.get("condition").is_some_and(truthy);
        options
            .logger
            .debug(&format!("condition evaluated to {condition}"));

        if condition {
            let branch = pipeline_arg(self.id(), &args, "if")?;
            options.run_pipeline(&branch, Vec::new()).await
        } else {
            match optional_pipeline_arg(self.id(), &args, "else")? {
                Some(branch) => options.run_pipeline(&branch, Vec::new()).await,
                None => Ok(Value::Null),
            }
        }
    }
}
