use crate::api::StepApi;
use crate::context::StepContext;
use crate::error::WorkflowError;
use crate::schema::{Schema, SchemaRef};
use crate::store::{Store, StoreFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Type-safe step kind wrapper.
///
/// A kind names a [`StepDefinition`]; it must be unique among the
/// definitions handed to one workflow.
///
/// ```
/// use michi::StepKind;
///
/// let kind = StepKind::new("verify_email");
/// assert_eq!(kind.as_str(), "verify_email");
///
/// let kind: StepKind = "collect_profile".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKind(String);

impl StepKind {
    /// Creates a new StepKind
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the kind as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepKind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a step instance: `kind:name`.
///
/// ```
/// use michi::StepId;
///
/// let id = StepId::compose("verify", "primary");
/// assert_eq!(id.as_str(), "verify:primary");
/// assert_eq!(id, "verify:primary");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Creates a StepId from its rendered form
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a StepId from a kind and an instance name
    pub fn compose(kind: &str, name: &str) -> Self {
        Self(format!("{}:{}", kind, name))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for StepId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<str> for StepId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Which build arguments a definition's body receives.
///
/// Resolved once when the definition is built. A body only sees the
/// arguments its definition declared: `input` with an input schema, `config`
/// with a config schema and `store` with a store factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub input: bool,
    pub config: bool,
    pub store: bool,
}

/// A step body: builds the step's public API from its build arguments.
pub type StepBody = Arc<dyn Fn(&mut StepContext) -> StepApi + Send + Sync>;

/// Immutable blueprint of a step.
///
/// Cloning is cheap; all clones share the same definition.
///
/// # Examples
///
/// ```
/// use michi::{schema, StepApi, StepDefinition};
/// use serde_json::{json, Value};
///
/// let ask_name = StepDefinition::builder("ask_name")
///     .output(schema::typed::<String>())
///     .body(|ctx| {
///         let next = ctx.next_handle();
///         StepApi::new().action("submit", move |name: Value| {
///             next.next(name)?;
///             Ok(Value::Null)
///         })
///     });
///
/// let instance = ask_name.create().expect("no config schema to violate");
/// assert_eq!(instance.id(), "ask_name:ask_name");
/// ```
#[derive(Clone)]
pub struct StepDefinition {
    inner: Arc<DefinitionInner>,
}

struct DefinitionInner {
    kind: StepKind,
    input_schema: Option<SchemaRef>,
    output_schema: Option<SchemaRef>,
    config_schema: Option<SchemaRef>,
    api_schema: Option<SchemaRef>,
    store_factory: Option<StoreFactory>,
    no_history: bool,
    capabilities: Capabilities,
    body: StepBody,
}

impl StepDefinition {
    /// Starts building a definition of the given kind.
    pub fn builder(kind: impl Into<StepKind>) -> StepDefinitionBuilder {
        StepDefinitionBuilder::new(kind)
    }

    pub fn kind(&self) -> &StepKind {
        &self.inner.kind
    }

    pub fn input_schema(&self) -> Option<&SchemaRef> {
        self.inner.input_schema.as_ref()
    }

    pub fn output_schema(&self) -> Option<&SchemaRef> {
        self.inner.output_schema.as_ref()
    }

    pub fn config_schema(&self) -> Option<&SchemaRef> {
        self.inner.config_schema.as_ref()
    }

    pub fn api_schema(&self) -> Option<&SchemaRef> {
        self.inner.api_schema.as_ref()
    }

    /// Steps flagged `no_history` are never recorded for back navigation.
    pub fn no_history(&self) -> bool {
        self.inner.no_history
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub(crate) fn body(&self) -> &StepBody {
        &self.inner.body
    }

    /// Returns `true` when both handles are the same definition.
    pub fn ptr_eq(&self, other: &StepDefinition) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Materializes an instance.
    ///
    /// `name` defaults to the kind. `config` is validated against the config
    /// schema when one is declared; without a schema it is kept as given
    /// (`Value::Null` when omitted).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Validation`] if the config is rejected.
    pub fn instance(
        &self,
        name: Option<&str>,
        config: Option<Value>,
    ) -> Result<StepInstance, WorkflowError> {
        let name = name.unwrap_or(self.inner.kind.as_str()).to_string();
        let id = StepId::compose(self.inner.kind.as_str(), &name);
        let raw = config.unwrap_or(Value::Null);

        let config = match &self.inner.config_schema {
            Some(schema) => validate(schema.as_ref(), &raw, || format!("config of {}", id))?,
            None => raw,
        };

        let store = self.inner.store_factory.as_ref().map(Store::from_factory);

        Ok(StepInstance {
            inner: Arc::new(InstanceInner {
                id,
                name,
                config,
                store,
                definition: self.clone(),
            }),
        })
    }

    /// Instance named after the kind, without config.
    pub fn create(&self) -> Result<StepInstance, WorkflowError> {
        self.instance(None, None)
    }

    /// Instance with an explicit name, without config.
    pub fn named(&self, name: &str) -> Result<StepInstance, WorkflowError> {
        self.instance(Some(name), None)
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("kind", &self.inner.kind)
            .field("capabilities", &self.inner.capabilities)
            .field("no_history", &self.inner.no_history)
            .finish()
    }
}

/// Builder for [`StepDefinition`].
pub struct StepDefinitionBuilder {
    kind: StepKind,
    input_schema: Option<SchemaRef>,
    output_schema: Option<SchemaRef>,
    config_schema: Option<SchemaRef>,
    api_schema: Option<SchemaRef>,
    store_factory: Option<StoreFactory>,
    no_history: bool,
}

impl StepDefinitionBuilder {
    pub fn new(kind: impl Into<StepKind>) -> Self {
        Self {
            kind: kind.into(),
            input_schema: None,
            output_schema: None,
            config_schema: None,
            api_schema: None,
            store_factory: None,
            no_history: false,
        }
    }

    pub fn input(mut self, schema: impl Schema + 'static) -> Self {
        self.input_schema = Some(Arc::new(schema));
        self
    }

    pub fn output(mut self, schema: impl Schema + 'static) -> Self {
        self.output_schema = Some(Arc::new(schema));
        self
    }

    pub fn config(mut self, schema: impl Schema + 'static) -> Self {
        self.config_schema = Some(Arc::new(schema));
        self
    }

    /// Describes the step's public API for discovery tooling.
    pub fn api(mut self, schema: impl Schema + 'static) -> Self {
        self.api_schema = Some(Arc::new(schema));
        self
    }

    /// Gives every instance its own store, initialized by `factory`.
    pub fn store(mut self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.store_factory = Some(Arc::new(factory));
        self
    }

    pub fn no_history(mut self) -> Self {
        self.no_history = true;
        self
    }

    /// Finishes the definition with its body.
    pub fn body(
        self,
        body: impl Fn(&mut StepContext) -> StepApi + Send + Sync + 'static,
    ) -> StepDefinition {
        let capabilities = Capabilities {
            input: self.input_schema.is_some(),
            config: self.config_schema.is_some(),
            store: self.store_factory.is_some(),
        };
        StepDefinition {
            inner: Arc::new(DefinitionInner {
                kind: self.kind,
                input_schema: self.input_schema,
                output_schema: self.output_schema,
                config_schema: self.config_schema,
                api_schema: self.api_schema,
                store_factory: self.store_factory,
                no_history: self.no_history,
                capabilities,
                body: Arc::new(body),
            }),
        }
    }
}

/// A named, materialized occurrence of a [`StepDefinition`].
///
/// Cloning is cheap and shares the store.
#[derive(Clone)]
pub struct StepInstance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    id: StepId,
    name: String,
    config: Value,
    store: Option<Store>,
    definition: StepDefinition,
}

impl StepInstance {
    pub fn id(&self) -> &StepId {
        &self.inner.id
    }

    pub fn kind(&self) -> &StepKind {
        self.inner.definition.kind()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &Value {
        &self.inner.config
    }

    pub fn store(&self) -> Option<&Store> {
        self.inner.store.as_ref()
    }

    pub fn definition(&self) -> &StepDefinition {
        &self.inner.definition
    }

    /// Returns `true` when both handles are the same instance.
    pub fn ptr_eq(&self, other: &StepInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for StepInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepInstance")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .finish()
    }
}

/// Runs `schema` and wraps a rejection in [`WorkflowError::Validation`].
pub(crate) fn validate(
    schema: &dyn Schema,
    value: &Value,
    target: impl FnOnce() -> String,
) -> Result<Value, WorkflowError> {
    schema
        .safe_parse(value)
        .into_result()
        .map_err(|source| WorkflowError::Validation {
            target: target(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct MailConfig {
        retries: u32,
    }

    fn mail() -> StepDefinition {
        StepDefinition::builder("mail")
            .config(schema::typed::<MailConfig>())
            .store(|| json!({"sent": 0}))
            .body(|_| StepApi::new())
    }

    #[test]
    fn test_step_id_compose() {
        assert_eq!(StepId::compose("mail", "mail"), StepId::new("mail:mail"));
        assert_eq!(StepId::compose("mail", "backup").to_string(), "mail:backup");
    }

    #[test]
    fn test_instance_defaults_name_to_kind() {
        let step = StepDefinition::builder("greet").body(|_| StepApi::new());
        let instance = step.create().unwrap();
        assert_eq!(instance.name(), "greet");
        assert_eq!(instance.id(), "greet:greet");
        assert_eq!(instance.kind(), &StepKind::new("greet"));
        assert_eq!(instance.config(), &Value::Null);
        assert!(instance.store().is_none());
    }

    #[test]
    fn test_config_validated_once_at_creation() {
        let step = mail();
        let instance = step
            .instance(Some("primary"), Some(json!({"retries": 3})))
            .unwrap();
        assert_eq!(instance.id(), "mail:primary");
        assert_eq!(instance.config(), &json!({"retries": 3}));

        let err = step
            .instance(Some("broken"), Some(json!({"retries": "many"})))
            .unwrap_err();
        match err {
            WorkflowError::Validation { target, .. } => {
                assert_eq!(target, "config of mail:broken");
            }
            other => panic!("Unexpected error type: {other}"),
        }
    }

    #[test]
    fn test_instances_get_independent_stores() {
        let step = mail();
        let a = step.instance(Some("a"), Some(json!({"retries": 1}))).unwrap();
        let b = step.instance(Some("b"), Some(json!({"retries": 1}))).unwrap();

        a.store().unwrap().set_state(json!({"sent": 4}));
        assert_eq!(b.store().unwrap().get_state(), json!({"sent": 0}));
        assert!(a.definition().ptr_eq(b.definition()));
    }

    #[test]
    fn test_capabilities_resolved_at_build() {
        let bare = StepDefinition::builder("bare").body(|_| StepApi::new());
        assert_eq!(bare.capabilities(), Capabilities::default());

        let full = StepDefinition::builder("full")
            .input(schema::typed::<Value>())
            .config(schema::typed::<Value>())
            .store(|| Value::Null)
            .no_history()
            .body(|_| StepApi::new());
        assert_eq!(
            full.capabilities(),
            Capabilities {
                input: true,
                config: true,
                store: true
            }
        );
        assert!(full.no_history());
    }
}
