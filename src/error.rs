use crate::schema::ValidationError;
use crate::step::{StepId, StepKind};
use crate::workflow::Status;
use thiserror::Error;

/// The type of lifecycle hook that failed.
///
/// Used in [`WorkflowError::HookError`] to identify which hook caused the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// A `transition_in` hook, run when a step is entered.
    TransitionIn,
    /// A `transition_out` hook, run when a step is left.
    TransitionOut,
    /// An effect registered by a step body.
    Effect,
    /// A cleanup returned by any of the above.
    Cleanup,
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookType::TransitionIn => write!(f, "transition_in"),
            HookType::TransitionOut => write!(f, "transition_out"),
            HookType::Effect => write!(f, "effect"),
            HookType::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Errors that can occur while building or driving a workflow.
///
/// Structural and validation errors are returned to the caller of the
/// operation that caused them. [`WorkflowError::HookError`] is never returned
/// by the engine: hook failures are logged and discarded so that a misbehaving
/// hook cannot stall a workflow. The variant exists so hooks can report their
/// own failures in a structured way.
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]`. When matching on it, always
/// include a wildcard pattern:
///
/// ```
/// use michi::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::TransitionBlocked { step_id, .. } => {
///             format!("no edge out of {} accepted the output", step_id)
///         }
///         WorkflowError::Validation { target, .. } => format!("bad data for {}", target),
///         _ => error.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// Input, output or config did not satisfy its schema.
    #[error("Validation failed for {target}: {source}")]
    Validation {
        /// What was being validated, e.g. `output of verify:verify`
        target: String,
        /// The schema's structured report
        #[source]
        source: ValidationError,
    },

    /// No outgoing edge accepted the output passed to `next`.
    ///
    /// The workflow is left exactly where it was.
    #[error("Transition blocked at step '{step_id}': {}", rejections.join("; "))]
    TransitionBlocked {
        /// The step that tried to leave
        step_id: StepId,
        /// Why each outgoing edge refused, in declaration order
        rejections: Vec<String>,
    },

    /// `go_back` tried to reverse a unidirectional edge.
    #[error("Cannot go back from '{to}' to '{from}': edge is unidirectional")]
    UnidirectionalBack {
        /// Source of the forward-only edge
        from: StepId,
        /// Target of the forward-only edge (the current step)
        to: StepId,
    },

    /// `go_back` was called with nothing to go back to.
    #[error("History is empty")]
    HistoryEmpty,

    /// Two definitions with the same kind were given to one workflow.
    #[error("Duplicate step kind: {0}")]
    DuplicateKind(StepKind),

    /// An instance with the same id is already registered.
    #[error("Duplicate step instance: {0}")]
    DuplicateInstance(StepId),

    /// A referenced step instance is not registered.
    #[error("Step not registered: {0}")]
    UnregisteredNode(StepId),

    /// An instance's kind is not part of the workflow's inventory.
    #[error("Unknown step kind: {0}")]
    UnknownKind(StepKind),

    /// The operation needs a running workflow.
    #[error("Workflow is not running")]
    NotRunning,

    /// `start` was called on a workflow that is already running.
    #[error("Workflow is already running")]
    AlreadyRunning,

    /// The current step cannot accept the operation in its present status.
    #[error("Step '{step_id}' is not ready (status: {status})")]
    NotReady {
        /// The current step
        step_id: StepId,
        /// Its status when the operation was attempted
        status: Status,
    },

    /// The workflow is paused.
    #[error("Workflow is paused")]
    Paused,

    /// A `next` handle was used after the step that produced it exited.
    #[error("Step '{0}' is no longer active")]
    StaleHandle(StepId),

    /// A step's public API has no action under this name.
    #[error("Action not found on step '{step_id}': {action}")]
    ActionNotFound {
        /// The step whose API was called
        step_id: StepId,
        /// The requested action
        action: String,
    },

    /// A step action failed.
    #[error("Step failed: {step_name}, details: {details}")]
    StepError {
        /// The step whose action failed
        step_name: StepId,
        /// Details about the failure
        details: String,
    },

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// A lifecycle hook failed.
    #[error("Hook '{hook_type}' failed in step '{step_name}': {details}")]
    HookError {
        /// The step whose hook failed
        step_name: StepId,
        /// Which hook failed
        hook_type: HookType,
        /// Details about the failure
        details: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationIssue;

    #[test]
    fn test_error_display() {
        let error = WorkflowError::StepError {
            step_name: StepId::new("verify:verify"),
            details: "code mismatch".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Step failed: verify:verify, details: code mismatch"
        );

        let error = WorkflowError::UnidirectionalBack {
            from: StepId::new("pay:pay"),
            to: StepId::new("receipt:receipt"),
        };
        assert_eq!(
            error.to_string(),
            "Cannot go back from 'receipt:receipt' to 'pay:pay': edge is unidirectional"
        );
    }

    #[test]
    fn test_blocked_display_lists_rejections() {
        let error = WorkflowError::TransitionBlocked {
            step_id: StepId::new("a:a"),
            rejections: vec![
                "a:a -> b:b: guard rejected".to_string(),
                "a:a -> c:c: transform failed".to_string(),
            ],
        };
        assert_eq!(
            error.to_string(),
            "Transition blocked at step 'a:a': a:a -> b:b: guard rejected; a:a -> c:c: transform failed"
        );
    }

    #[test]
    fn test_validation_display() {
        let error = WorkflowError::Validation {
            target: "config of mail:mail".to_string(),
            source: ValidationError::new(vec![ValidationIssue::new("retries", "expected u32")]),
        };
        assert_eq!(
            error.to_string(),
            "Validation failed for config of mail:mail: retries: expected u32"
        );
    }

    #[test]
    fn test_hook_error_display() {
        let error = WorkflowError::HookError {
            step_name: StepId::new("a:a"),
            hook_type: HookType::TransitionOut,
            details: "socket closed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Hook 'transition_out' failed in step 'a:a': socket closed"
        );
    }

    #[test]
    fn test_hook_type_display() {
        assert_eq!(HookType::TransitionIn.to_string(), "transition_in");
        assert_eq!(HookType::TransitionOut.to_string(), "transition_out");
        assert_eq!(HookType::Effect.to_string(), "effect");
        assert_eq!(HookType::Cleanup.to_string(), "cleanup");
    }
}
