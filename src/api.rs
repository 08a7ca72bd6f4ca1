//! The public API a step body exposes to the outside world.

use crate::error::WorkflowError;
use crate::step::StepId;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A callable entry of a step's public API.
pub type Action = Arc<dyn Fn(Value) -> Result<Value, WorkflowError> + Send + Sync>;

/// Named actions and read-only fields produced by a step body.
///
/// Each (re)build of a step produces a fresh `StepApi`; callers should fetch
/// it through [`Workflow::current_step`](crate::Workflow::current_step) rather
/// than holding on to an old one.
///
/// ```
/// use michi::StepApi;
/// use serde_json::{json, Value};
///
/// let api = StepApi::new()
///     .field("attempts", json!(2))
///     .action("double", |v: Value| Ok(json!(v.as_i64().unwrap_or(0) * 2)));
///
/// assert_eq!(api.get("attempts"), Some(&json!(2)));
/// assert_eq!(api.call("double", json!(21)).unwrap(), json!(42));
/// ```
#[derive(Clone, Default)]
pub struct StepApi {
    owner: Option<StepId>,
    actions: IndexMap<String, Action>,
    fields: IndexMap<String, Value>,
}

impl StepApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an action.
    pub fn action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(Value) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Adds a read-only field.
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Invokes an action by name.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::ActionNotFound`] if there is no such action, otherwise
    /// whatever the action returns.
    pub fn call(&self, name: &str, args: Value) -> Result<Value, WorkflowError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| WorkflowError::ActionNotFound {
                step_id: self.owner.clone().unwrap_or_else(|| StepId::new("")),
                action: name.to_string(),
            })?;
        action(args)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Action names in declaration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub(crate) fn with_owner(mut self, owner: StepId) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl fmt::Debug for StepApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepApi")
            .field("owner", &self.owner)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("fields", &self.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_not_found_names_owner() {
        let api = StepApi::new().with_owner(StepId::new("otp:otp"));
        match api.call("resend", Value::Null) {
            Err(WorkflowError::ActionNotFound { step_id, action }) => {
                assert_eq!(step_id, "otp:otp");
                assert_eq!(action, "resend");
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_action_names_keep_order() {
        let api = StepApi::new()
            .action("submit", |_| Ok(Value::Null))
            .action("cancel", |_| Ok(Value::Null))
            .field("label", json!("Verify"));
        let names: Vec<&str> = api.action_names().collect();
        assert_eq!(names, vec!["submit", "cancel"]);
        assert!(api.has_action("cancel"));
        assert_eq!(api.fields().len(), 1);
    }
}
