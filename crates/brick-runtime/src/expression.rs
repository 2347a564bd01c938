//! Expression model for brick configuration values.
//!
//! On the wire an expression is a JSON object tagged with `__type__`:
//!
//! ```text
//! {"__type__": "nunjucks", "__value__": "Hello {{ @input.name }}"}
//! {"__type__": "var",      "__value__": "@input.name"}
//! {"__type__": "pipeline", "__value__": [ <BrickConfig>, ... ], "__env__": { ... }}
//! {"__type__": "defer",    "__value__": <any config value>}
//! ```
//!
//! Anything else is a literal, an array of config values, or an object of
//! config values. Parsing is strict: an object carrying an unknown
//! `__type__` is rejected rather than treated as a literal.

use std::collections::BTreeMap;
use std::fmt;

use brick_types::{BrickError, Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::pipeline::Pipeline;

pub const TYPE_TAG: &str = "__type__";
pub const VALUE_TAG: &str = "__value__";
pub const ENV_TAG: &str = "__env__";

/// Template engines a renderer can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEngine {
    Mustache,
    Nunjucks,
    Handlebars,
}

impl TemplateEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateEngine::Mustache => "mustache",
            TemplateEngine::Nunjucks => "nunjucks",
            TemplateEngine::Handlebars => "handlebars",
        }
    }
}

impl fmt::Display for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `__type__` tag of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Template(TemplateEngine),
    Variable,
    Pipeline,
    Defer,
}

impl ExpressionKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "mustache" => Some(ExpressionKind::Template(TemplateEngine::Mustache)),
            "nunjucks" => Some(ExpressionKind::Template(TemplateEngine::Nunjucks)),
            "handlebars" => Some(ExpressionKind::Template(TemplateEngine::Handlebars)),
            "var" => Some(ExpressionKind::Variable),
            "pipeline" => Some(ExpressionKind::Pipeline),
            "defer" => Some(ExpressionKind::Defer),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ExpressionKind::Template(engine) => engine.as_str(),
            ExpressionKind::Variable => "var",
            ExpressionKind::Pipeline => "pipeline",
            ExpressionKind::Defer => "defer",
        }
    }
}

/// A sub-pipeline, optionally closed over the bindings at its point of definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineExpression {
    pub pipeline: Pipeline,
    pub environment: Option<Context>,
}

impl PipelineExpression {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            environment: None,
        }
    }

    /// Capture `environment` so the pipeline later runs against it instead of
    /// the invoking context.
    pub fn with_environment(mut self, environment: Context) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn is_closure(&self) -> bool {
        self.environment.is_some()
    }

    /// Parse a rendered pipeline argument.
    pub fn from_json(value: &Value) -> Result<Self> {
        match ConfigValue::from_json(value)? {
            ConfigValue::Expression(Expression::Pipeline(expression)) => Ok(expression),
            _ => Err(BrickError::InvalidExpression(
                "expected a pipeline expression".into(),
            )),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Expression::Pipeline(self.clone()).to_json()
    }
}

/// A tagged config value requiring interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Template {
        engine: TemplateEngine,
        value: Option<String>,
    },
    Variable(Option<String>),
    Pipeline(PipelineExpression),
    Defer(Box<ConfigValue>),
}

impl Expression {
    pub fn kind(&self) -> ExpressionKind {
        match self {
            Expression::Template { engine, .. } => ExpressionKind::Template(*engine),
            Expression::Variable(_) => ExpressionKind::Variable,
            Expression::Pipeline(_) => ExpressionKind::Pipeline,
            Expression::Defer(_) => ExpressionKind::Defer,
        }
    }

    /// Template and variable expressions; the only kinds rendered eagerly.
    pub fn is_template(&self) -> bool {
        matches!(self, Expression::Template { .. } | Expression::Variable(_))
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(self, Expression::Pipeline(_))
    }

    pub fn is_defer(&self) -> bool {
        matches!(self, Expression::Defer(_))
    }

    fn from_tagged(tag: &str, object: &Map<String, Value>) -> Result<Self> {
        let kind = ExpressionKind::parse(tag)
            .ok_or_else(|| BrickError::InvalidExpression(format!("unknown expression type '{tag}'")))?;
        let value = object.get(VALUE_TAG).unwrap_or(&Value::Null);

        match kind {
            ExpressionKind::Template(engine) => Ok(Expression::Template {
                engine,
                value: template_source(tag, value)?,
            }),
            ExpressionKind::Variable => Ok(Expression::Variable(template_source(tag, value)?)),
            ExpressionKind::Pipeline => {
                let pipeline = if value.is_null() {
                    Pipeline::default()
                } else {
                    serde_json::from_value(value.clone()).map_err(|err| {
                        BrickError::InvalidExpression(format!("invalid pipeline: {err}"))
                    })?
                };
                let environment = match object.get(ENV_TAG) {
                    None | Some(Value::Null) => None,
                    Some(Value::Object(bindings)) => Some(Context::from(bindings.clone())),
                    Some(_) => {
                        return Err(BrickError::InvalidExpression(
                            "pipeline environment must be an object".into(),
                        ))
                    }
                };
                Ok(Expression::Pipeline(PipelineExpression {
                    pipeline,
                    environment,
                }))
            }
            ExpressionKind::Defer => Ok(Expression::Defer(Box::new(ConfigValue::from_json(value)?))),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        let mut object = Map::new();
        object.insert(TYPE_TAG.into(), Value::String(self.kind().tag().into()));
        let value = match self {
            Expression::Template { value, .. } | Expression::Variable(value) => {
                value.clone().map(Value::String).unwrap_or(Value::Null)
            }
            Expression::Pipeline(expression) => {
                if let Some(environment) = &expression.environment {
                    object.insert(ENV_TAG.into(), environment.to_value());
                }
                serde_json::to_value(&expression.pipeline)?
            }
            Expression::Defer(inner) => inner.to_json()?,
        };
        object.insert(VALUE_TAG.into(), value);
        Ok(Value::Object(object))
    }
}

fn template_source(tag: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(source) => Ok(Some(source.clone())),
        other => Err(BrickError::InvalidExpression(format!(
            "{tag} expression value must be a string, got {other}"
        ))),
    }
}

/// A brick argument as declared in a pipeline document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum ConfigValue {
    Literal(Value),
    Expression(Expression),
    Array(Vec<ConfigValue>),
    Object(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(ConfigValue::from_json)
                .collect::<Result<Vec<_>>>()
                .map(ConfigValue::Array),
            Value::Object(object) => match object.get(TYPE_TAG) {
                Some(Value::String(tag)) => {
                    Expression::from_tagged(tag, object).map(ConfigValue::Expression)
                }
                Some(other) => Err(BrickError::InvalidExpression(format!(
                    "{TYPE_TAG} must be a string, got {other}"
                ))),
                None => object
                    .iter()
                    .map(|(key, value)| Ok::<_, BrickError>((key.clone(), ConfigValue::from_json(value)?)))
                    .collect::<Result<BTreeMap<_, _>>>()
                    .map(ConfigValue::Object),
            },
            scalar => Ok(ConfigValue::Literal(scalar.clone())),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        match self {
            ConfigValue::Literal(value) => Ok(value.clone()),
            ConfigValue::Expression(expression) => expression.to_json(),
            ConfigValue::Array(items) => items
                .iter()
                .map(ConfigValue::to_json)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            ConfigValue::Object(entries) => entries
                .iter()
                .map(|(key, value)| Ok::<_, BrickError>((key.clone(), value.to_json()?)))
                .collect::<Result<Map<_, _>>>()
                .map(Value::Object),
        }
    }

    pub fn mustache(source: impl Into<String>) -> Self {
        Self::template(TemplateEngine::Mustache, source)
    }

    pub fn nunjucks(source: impl Into<String>) -> Self {
        Self::template(TemplateEngine::Nunjucks, source)
    }

    pub fn template(engine: TemplateEngine, source: impl Into<String>) -> Self {
        ConfigValue::Expression(Expression::Template {
            engine,
            value: Some(source.into()),
        })
    }

    pub fn var(path: impl Into<String>) -> Self {
        ConfigValue::Expression(Expression::Variable(Some(path.into())))
    }

    pub fn pipeline(pipeline: impl Into<Pipeline>) -> Self {
        ConfigValue::Expression(Expression::Pipeline(PipelineExpression::new(pipeline.into())))
    }

    pub fn defer(inner: ConfigValue) -> Self {
        ConfigValue::Expression(Expression::Defer(Box::new(inner)))
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            ConfigValue::Expression(expression) => Some(expression),
            _ => None,
        }
    }

    pub fn is_template_expression(&self) -> bool {
        self.as_expression().is_some_and(Expression::is_template)
    }

    pub fn is_pipeline_expression(&self) -> bool {
        self.as_expression().is_some_and(Expression::is_pipeline)
    }

    pub fn is_defer_expression(&self) -> bool {
        self.as_expression().is_some_and(Expression::is_defer)
    }

    /// Visit every pipeline expression nested in this value, including those
    /// inside deferred values. Does not descend into the pipelines themselves.
    pub fn for_each_pipeline<'a>(&'a self, visit: &mut dyn FnMut(&'a PipelineExpression)) {
        match self {
            ConfigValue::Literal(_) => {}
            ConfigValue::Expression(Expression::Pipeline(expression)) => visit(expression),
            ConfigValue::Expression(Expression::Defer(inner)) => inner.for_each_pipeline(visit),
            ConfigValue::Expression(_) => {}
            ConfigValue::Array(items) => {
                for item in items {
                    item.for_each_pipeline(visit);
                }
            }
            ConfigValue::Object(entries) => {
                for value in entries.values() {
                    value.for_each_pipeline(visit);
                }
            }
        }
    }
}

impl TryFrom<Value> for ConfigValue {
    type Error = BrickError;

    fn try_from(value: Value) -> Result<Self> {
        ConfigValue::from_json(&value)
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl From<Expression> for ConfigValue {
    fn from(expression: Expression) -> Self {
        ConfigValue::Expression(expression)
    }
}

impl From<&str> for ConfigValue {
    fn from(literal: &str) -> Self {
        ConfigValue::Literal(Value::String(literal.to_string()))
    }
}

impl From<bool> for ConfigValue {
    fn from(literal: bool) -> Self {
        ConfigValue::Literal(Value::Bool(literal))
    }
}

impl From<i64> for ConfigValue {
    fn from(literal: i64) -> Self {
        ConfigValue::Literal(Value::from(literal))
    }
}
