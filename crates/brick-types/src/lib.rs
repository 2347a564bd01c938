//! Shared types, errors, and context for the brick pipeline runtime.
//!
//! This crate provides the foundational types used across the other brick crates:
//! - `BrickError`: unified error taxonomy
//! - `Context`: immutable, copy-on-write key-value environment for pipeline state
//! - `RegistryId`: strongly-typed brick identifier

use std::borrow::Borrow;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Unified error type for the brick runtime.
#[derive(Debug, thiserror::Error)]
pub enum BrickError {
    // === Step Errors ===
    #[error("Invalid arguments for brick '{brick_id}': {}", .errors.join("; "))]
    Validation {
        brick_id: RegistryId,
        errors: Vec<String>,
    },

    #[error("Error running brick '{brick_id}': {source}")]
    Context {
        brick_id: RegistryId,
        context: Map<String, Value>,
        alerted: bool,
        #[source]
        source: Box<BrickError>,
    },

    #[error("{0}")]
    Business(String),

    #[error("Invalid argument '{arg}' for brick '{brick_id}': {message}")]
    InvalidArgument {
        brick_id: RegistryId,
        arg: String,
        message: String,
    },

    #[error("Unknown brick '{0}'")]
    UnknownBrick(RegistryId),

    #[error("Invalid registry id '{0}'")]
    InvalidRegistryId(String),

    #[error("Pipeline document is invalid: {0}")]
    InvalidDocument(String),

    #[error("Output key '{0}' would shadow a reserved binding")]
    ReservedOutputKey(String),

    // === Integration Errors ===
    #[error("Integration '{integration_id}' cannot serve this request: {message}")]
    IncompatibleService {
        integration_id: String,
        message: String,
    },

    #[error("No configuration found for integration '{integration_id}'")]
    IntegrationNotFound {
        integration_id: String,
        config_id: Option<String>,
    },

    // === Expression Errors ===
    #[error("Error rendering {engine} template: {message}")]
    Template { engine: String, message: String },

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl BrickError {
    /// Stable error name, used when the error is serialized into a context or trace.
    pub fn name(&self) -> &'static str {
        match self {
            BrickError::Validation { .. } => "ValidationError",
            BrickError::Context { .. } => "ContextError",
            BrickError::Business(_) => "BusinessError",
            BrickError::InvalidArgument { .. } => "PropError",
            BrickError::UnknownBrick(_) => "UnknownBrickError",
            BrickError::InvalidRegistryId(_) => "InvalidRegistryIdError",
            BrickError::InvalidDocument(_) => "InvalidDocumentError",
            BrickError::ReservedOutputKey(_) => "ReservedOutputKeyError",
            BrickError::IncompatibleService { .. } => "IncompatibleServiceError",
            BrickError::IntegrationNotFound { .. } => "NotConfiguredError",
            BrickError::Template { .. } => "TemplateRenderError",
            BrickError::InvalidExpression(_) => "InvalidExpressionError",
            BrickError::Io(_) => "IOError",
            BrickError::Json(_) => "SyntaxError",
            BrickError::Other(_) => "Error",
        }
    }

    /// Returns the innermost error, peeling any `Context` wrappers.
    pub fn root_cause(&self) -> &BrickError {
        let mut current = self;
        while let BrickError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Brick id of the innermost `Context` wrapper, if any.
    pub fn failing_brick(&self) -> Option<&RegistryId> {
        let mut current = self;
        let mut brick = None;
        while let BrickError::Context {
            brick_id, source, ..
        } = current
        {
            brick = Some(brick_id);
            current = source;
        }
        brick
    }

    /// Returns `true` once a deployment alert has been sent for this failure.
    pub fn alert_sent(&self) -> bool {
        matches!(self, BrickError::Context { alerted: true, .. })
    }

    /// Returns `true` for expected, user-facing failures.
    pub fn is_business(&self) -> bool {
        matches!(self.root_cause(), BrickError::Business(_))
    }

    /// JSON form of the failure: `{name, message, brickId?, errors?}`.
    ///
    /// `Context` wrappers are flattened; the name and message are those of the
    /// root cause and `brickId` names the failing brick.
    pub fn to_serialized(&self) -> Value {
        let root = self.root_cause();
        let mut object = Map::new();
        object.insert("name".into(), Value::String(root.name().to_string()));
        object.insert("message".into(), Value::String(root.to_string()));
        if let Some(brick_id) = self.failing_brick() {
            object.insert("brickId".into(), Value::String(brick_id.to_string()));
        }
        if let BrickError::Validation { errors, .. } = root {
            object.insert(
                "errors".into(),
                Value::Array(errors.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(object)
    }
}

/// A convenience alias for `Result<T, BrickError>`.
pub type Result<T> = std::result::Result<T, BrickError>;

// ---------------------------------------------------------------------------
// RegistryId: strongly-typed brick identifier
// ---------------------------------------------------------------------------

static REGISTRY_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*(/[a-z0-9][a-z0-9._~-]*)*$")
        .expect("registry id pattern is valid")
});

/// Identifier of a brick in the registry, e.g. `@brick/for-each`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistryId(String);

impl RegistryId {
    /// Parse and validate an identifier.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if REGISTRY_ID_PATTERN.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(BrickError::InvalidRegistryId(id))
        }
    }

    /// Build an identifier from a literal known to be well-formed.
    pub fn from_static(id: &'static str) -> Self {
        debug_assert!(REGISTRY_ID_PATTERN.is_match(id), "malformed registry id {id}");
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `@scope` part of a scoped identifier.
    pub fn scope(&self) -> Option<&str> {
        self.0
            .starts_with('@')
            .then(|| self.0.split('/').next())
            .flatten()
    }
}

impl TryFrom<String> for RegistryId {
    type Error = BrickError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<RegistryId> for String {
    fn from(id: RegistryId) -> Self {
        id.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RegistryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RegistryId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Context: immutable key-value environment
// ---------------------------------------------------------------------------

/// Context key holding the pipeline input.
pub const INPUT_KEY: &str = "@input";
/// Context key holding the mod options.
pub const OPTIONS_KEY: &str = "@options";

/// Context key for an output key, e.g. `foo` → `@foo`.
pub fn output_binding_key(output_key: &str) -> String {
    if output_key.starts_with('@') {
        output_key.to_string()
    } else {
        format!("@{output_key}")
    }
}

/// Whether binding `output_key` would replace `@input` or `@options`.
pub fn is_reserved_output_key(output_key: &str) -> bool {
    let key = output_binding_key(output_key);
    key == INPUT_KEY || key == OPTIONS_KEY
}

/// Immutable environment available to rendering and templates.
///
/// Cloning is cheap and shares the same bindings. Every `with_*` method
/// returns a **new** context; the receiver is never modified, so a child scope
/// cannot leak bindings into its parent.
#[derive(Clone, Default, PartialEq)]
pub struct Context {
    bindings: Arc<Map<String, Value>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with `@input` and `@options` bound.
    pub fn with_input(input: Value, options: Value) -> Self {
        let mut bindings = Map::new();
        bindings.insert(INPUT_KEY.into(), input);
        bindings.insert(OPTIONS_KEY.into(), options);
        Self {
            bindings: Arc::new(bindings),
        }
    }

    /// Read a binding by its full key (e.g. `@input`).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.bindings.get(key)
    }

    /// Read the value bound for an output key (`foo` or `@foo`).
    pub fn get_output(&self, output_key: &str) -> Option<&Value> {
        self.bindings.get(&output_binding_key(output_key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.bindings.keys()
    }

    /// Borrow the bindings for rendering.
    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    /// Return a new context with `key` bound to `value`.
    pub fn with_binding(&self, key: impl Into<String>, value: Value) -> Context {
        let mut bindings = (*self.bindings).clone();
        bindings.insert(key.into(), value);
        Context {
            bindings: Arc::new(bindings),
        }
    }

    /// Return a new context with `@<output_key>` bound to `value`.
    pub fn with_output(&self, output_key: &str, value: Value) -> Context {
        self.with_binding(output_binding_key(output_key), value)
    }

    /// Return a new context with all `updates` bound. Existing keys not present
    /// in `updates` are preserved.
    pub fn with_bindings<I>(&self, updates: I) -> Context
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut updates = updates.into_iter().peekable();
        if updates.peek().is_none() {
            return self.clone();
        }
        let mut bindings = (*self.bindings).clone();
        bindings.extend(updates);
        Context {
            bindings: Arc::new(bindings),
        }
    }

    /// Return a new context with the fields of `running` spread beneath the
    /// existing bindings. Non-object values contribute nothing.
    pub fn with_running_value(&self, running: &Value) -> Context {
        let Value::Object(fields) = running else {
            return self.clone();
        };
        let mut bindings = fields.clone();
        for (key, value) in self.bindings.iter() {
            bindings.insert(key.clone(), value.clone());
        }
        Context {
            bindings: Arc::new(bindings),
        }
    }

    /// Copy of the current bindings.
    pub fn snapshot(&self) -> Map<String, Value> {
        (*self.bindings).clone()
    }

    /// The bindings as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.snapshot())
    }
}

impl From<Map<String, Value>> for Context {
    fn from(bindings: Map<String, Value>) -> Self {
        Self {
            bindings: Arc::new(bindings),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.bindings.iter()).finish()
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.bindings.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Context::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrapped(source: BrickError) -> BrickError {
        BrickError::Context {
            brick_id: RegistryId::from_static("@brick/echo"),
            context: Map::new(),
            alerted: false,
            source: Box::new(source),
        }
    }

    #[test]
    fn error_display_validation() {
        let err = BrickError::Validation {
            brick_id: RegistryId::from_static("@brick/echo"),
            errors: vec!["missing 'message'".into(), "bad type".into()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid arguments for brick '@brick/echo': missing 'message'; bad type"
        );
    }

    #[test]
    fn error_display_context_includes_source() {
        let err = wrapped(BrickError::Business("no rows".into()));
        assert_eq!(err.to_string(), "Error running brick '@brick/echo': no rows");
    }

    #[test]
    fn error_display_incompatible_service() {
        let err = BrickError::IncompatibleService {
            integration_id: "google/sheet".into(),
            message: "read-only".into(),
        };
        assert_eq!(
            err.to_string(),
            "Integration 'google/sheet' cannot serve this request: read-only"
        );
    }

    #[test]
    fn error_names_follow_taxonomy() {
        assert_eq!(BrickError::Business("x".into()).name(), "BusinessError");
        assert_eq!(wrapped(BrickError::Other("x".into())).name(), "ContextError");
        assert_eq!(
            BrickError::IncompatibleService {
                integration_id: "a".into(),
                message: "b".into()
            }
            .name(),
            "IncompatibleServiceError"
        );
    }

    #[test]
    fn root_cause_peels_context_wrappers() {
        let err = wrapped(wrapped(BrickError::Business("deep".into())));
        assert!(matches!(err.root_cause(), BrickError::Business(msg) if msg == "deep"));
        assert!(err.is_business());
    }

    #[test]
    fn serialized_error_flattens_context() {
        let err = wrapped(BrickError::Business("no rows".into()));
        assert_eq!(
            err.to_serialized(),
            json!({"name": "BusinessError", "message": "no rows", "brickId": "@brick/echo"})
        );
    }

    #[test]
    fn serialized_validation_error_lists_errors() {
        let err = BrickError::Validation {
            brick_id: RegistryId::from_static("@brick/echo"),
            errors: vec!["bad".into()],
        };
        assert_eq!(err.to_serialized()["errors"], json!(["bad"]));
    }

    #[test]
    fn alert_sent_only_for_alerted_context() {
        let mut err = wrapped(BrickError::Other("x".into()));
        assert!(!err.alert_sent());
        if let BrickError::Context { alerted, .. } = &mut err {
            *alerted = true;
        }
        assert!(err.alert_sent());
        assert!(!BrickError::Other("x".into()).alert_sent());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: BrickError = json_err.into();
        assert!(matches!(err, BrickError::Json(_)));
    }

    // --- RegistryId ---

    #[test]
    fn registry_id_accepts_scoped_and_bare() {
        assert!(RegistryId::parse("@brick/if-else").is_ok());
        assert!(RegistryId::parse("test/echo").is_ok());
        assert!(RegistryId::parse("echo").is_ok());
    }

    #[test]
    fn registry_id_rejects_malformed() {
        assert!(RegistryId::parse("").is_err());
        assert!(RegistryId::parse("Has Spaces").is_err());
        assert!(RegistryId::parse("@scope/").is_err());
    }

    #[test]
    fn registry_id_scope() {
        assert_eq!(RegistryId::from_static("@brick/retry").scope(), Some("@brick"));
        assert_eq!(RegistryId::from_static("echo").scope(), None);
    }

    #[test]
    fn registry_id_deserializes_with_validation() {
        let id: RegistryId = serde_json::from_str("\"@brick/log\"").unwrap();
        assert_eq!(id.as_str(), "@brick/log");
        assert!(serde_json::from_str::<RegistryId>("\"Not Valid\"").is_err());
    }

    // --- Context ---

    #[test]
    fn context_with_input_binds_reserved_keys() {
        let ctx = Context::with_input(json!({"a": 1}), json!({"mode": "fast"}));
        assert_eq!(ctx.get(INPUT_KEY), Some(&json!({"a": 1})));
        assert_eq!(ctx.get(OPTIONS_KEY), Some(&json!({"mode": "fast"})));
    }

    #[test]
    fn context_with_output_does_not_mutate_parent() {
        let parent = Context::with_input(json!({}), json!({}));
        let child = parent.with_output("foo", json!(1));

        assert_eq!(child.get("@foo"), Some(&json!(1)));
        assert_eq!(child.get_output("foo"), Some(&json!(1)));
        assert!(!parent.contains_key("@foo"));
    }

    #[test]
    fn context_with_bindings_overwrites_and_preserves() {
        let ctx = Context::new()
            .with_binding("keep", json!("old"))
            .with_binding("overwrite", json!("old"));
        let updated = ctx.with_bindings([
            ("overwrite".to_string(), json!("new")),
            ("added".to_string(), json!("fresh")),
        ]);

        assert_eq!(updated.get("keep"), Some(&json!("old")));
        assert_eq!(updated.get("overwrite"), Some(&json!("new")));
        assert_eq!(updated.get("added"), Some(&json!("fresh")));
        assert_eq!(ctx.get("overwrite"), Some(&json!("old")));
    }

    #[test]
    fn running_value_sits_beneath_bindings() {
        let ctx = Context::new().with_binding("@input", json!("bound"));
        let spread = ctx.with_running_value(&json!({"@input": "shadowed", "extra": 1}));
        assert_eq!(spread.get("@input"), Some(&json!("bound")));
        assert_eq!(spread.get("extra"), Some(&json!(1)));

        let unchanged = ctx.with_running_value(&json!("scalar"));
        assert_eq!(unchanged, ctx);
    }

    #[test]
    fn output_binding_key_is_idempotent() {
        assert_eq!(output_binding_key("foo"), "@foo");
        assert_eq!(output_binding_key("@foo"), "@foo");
    }

    #[test]
    fn reserved_output_keys() {
        for key in ["input", "@input", "options", "@options"] {
            assert!(is_reserved_output_key(key), "{key}");
        }
        assert!(!is_reserved_output_key("inputs"));
        assert!(!is_reserved_output_key("@sheets"));
    }

    #[test]
    fn context_serializes_as_map() {
        let ctx = Context::new().with_binding("@x", json!(10));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, json!({"@x": 10}));
        let back: Context = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }
}
