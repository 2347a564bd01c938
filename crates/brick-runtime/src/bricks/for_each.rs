use async_trait::async_trait;
use brick_types::{output_binding_key, BrickError, RegistryId, Result};
use serde_json::{json, Value};

use super::{key_arg, pipeline_arg, pipeline_schema};
use crate::brick::{Brick, BrickOptions};

/// `@brick/for-each`: run `body` once per element, in order, with the element
/// bound as `@<elementKey>`. Returns the last iteration's value (null when
/// there are no elements). A failing iteration aborts the loop.
pub struct ForEachBrick;

#[async_trait]
impl Brick for ForEachBrick {
    fn id(&self) -> RegistryId {
        RegistryId::from_static("@brick/for-each")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "elements": {"type": "array"},
                "elementKey": {"type": "string"},
                "body": pipeline_schema()
            },
            "required": ["elements", "body"]
        })
    }

    fn is_root_aware(&self) -> bool {
        true
    }

    async fn run(&self, args: Value, options: &BrickOptions) -> Result<Value> {
        let body = pipeline_arg(self.id(), &args, "body")?;
        let element_key = output_binding_key(&key_arg(self.id(), &args, "elementKey", "element")?);
        let Some(Value::Array(elements)) = args.get("elements") else {
            return Err(BrickError::InvalidArgument {
                brick_id: self.id(),
                arg: "elements".into(),
                message: "expected an array".into(),
            });
        };

        let mut last = Value::Null;
        for (index, element) in elements.iter().enumerate() {
            options.logger.debug(&format!("iteration {index}"));
            last = options
                .run_pipeline(&body, vec![(element_key.clone(), element.clone())])
                .await?;
        }
        Ok(last)
    }
}
