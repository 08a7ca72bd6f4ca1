//! Schema adapters.
//!
//! The engine never compiles schemas itself. Anything that can turn a
//! [`Value`] into a normalized [`Value`] or a [`ValidationError`] can guard a
//! step's input, output, config or API.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A single problem reported by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location of the offending value, empty for the root.
    pub path: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Structured failure returned by [`Schema::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Shorthand for a single issue at the root.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(vec![ValidationIssue::new("", message)])
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join(", "))
    }
}

impl std::error::Error for ValidationError {}

/// Validates and normalizes dynamic values.
///
/// `parse` is the only required method. `safe_parse` mirrors the
/// non-throwing flavour found in most schema libraries and is what the engine
/// calls; `describe` lets discovery tooling surface the shape of a step's API.
pub trait Schema: Send + Sync {
    /// Returns the normalized value or the reasons it was rejected.
    fn parse(&self, value: &Value) -> Result<Value, ValidationError>;

    /// Like [`Schema::parse`] but never rejects; reports success as a flag.
    fn safe_parse(&self, value: &Value) -> SafeParse {
        match self.parse(value) {
            Ok(data) => SafeParse {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => SafeParse {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }

    /// Machine readable description of the accepted shape, if any.
    fn describe(&self) -> Option<Value> {
        None
    }
}

/// Outcome of [`Schema::safe_parse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeParse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ValidationError>,
}

impl SafeParse {
    pub fn into_result(self) -> Result<Value, ValidationError> {
        match (self.data, self.error) {
            (Some(data), None) if self.success => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err(ValidationError::message("schema reported no data")),
        }
    }
}

/// Shared handle to a schema.
pub type SchemaRef = Arc<dyn Schema>;

/// Schema backed by a serde type: a value is valid when it deserializes into
/// `T`, and is normalized by serializing `T` back.
///
/// ```
/// use michi::schema::{typed, Schema};
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Serialize, Deserialize)]
/// struct Code {
///     value: u32,
///     #[serde(default)]
///     retries: u8,
/// }
///
/// let schema = typed::<Code>();
/// assert_eq!(schema.parse(&json!({"value": 7})).unwrap(), json!({"value": 7, "retries": 0}));
/// assert!(schema.parse(&json!({"value": "seven"})).is_err());
/// ```
pub struct TypedSchema<T> {
    description: Option<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            description: None,
            _marker: PhantomData,
        }
    }

    /// Attaches a description returned by [`Schema::describe`].
    pub fn with_description(mut self, description: Value) -> Self {
        self.description = Some(description);
        self
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    fn parse(&self, value: &Value) -> Result<Value, ValidationError> {
        let typed: T = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::message(e.to_string()))?;
        serde_json::to_value(typed).map_err(|e| ValidationError::message(e.to_string()))
    }

    fn describe(&self) -> Option<Value> {
        self.description.clone()
    }
}

/// Schema backed by a closure.
pub struct FnSchema<F> {
    check: F,
    description: Option<Value>,
}

impl<F> FnSchema<F> {
    pub fn with_description(mut self, description: Value) -> Self {
        self.description = Some(description);
        self
    }
}

impl<F> Schema for FnSchema<F>
where
    F: Fn(&Value) -> Result<Value, ValidationError> + Send + Sync,
{
    fn parse(&self, value: &Value) -> Result<Value, ValidationError> {
        (self.check)(value)
    }

    fn describe(&self) -> Option<Value> {
        self.description.clone()
    }
}

/// Builds a [`TypedSchema`] for `T`.
pub fn typed<T>() -> TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    TypedSchema::new()
}

/// Builds a [`FnSchema`] from a validation closure.
pub fn from_fn<F>(check: F) -> FnSchema<F>
where
    F: Fn(&Value) -> Result<Value, ValidationError> + Send + Sync,
{
    FnSchema {
        check,
        description: None,
    }
}
