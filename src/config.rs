use std::time::Duration;

/// Configuration for a workflow.
///
/// # Examples
///
/// ```
/// use michi::WorkflowConfig;
/// use std::time::Duration;
///
/// let config = WorkflowConfig {
///     name: "onboarding".to_string(),
///     max_history: Some(20),
///     hook_timeout: Some(Duration::from_secs(5)),
/// };
/// assert_eq!(WorkflowConfig::default().name, "workflow");
/// # let _ = config;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Label attached to log records. Default: `"workflow"`.
    pub name: String,
    /// Maximum number of history entries kept for back navigation; the
    /// oldest are dropped first. `None` keeps everything (the default).
    pub max_history: Option<usize>,
    /// Maximum time a deferred hook may take to produce its cleanup; a hook
    /// that runs out of time is dropped along with its cleanup. `None` (the
    /// default) lets hooks take as long as they need.
    pub hook_timeout: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: "workflow".to_string(),
            max_history: None,
            hook_timeout: None,
        }
    }
}

impl WorkflowConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = Some(max_history);
        self
    }

    pub fn with_hook_timeout(mut self, hook_timeout: Option<Duration>) -> Self {
        self.hook_timeout = hook_timeout;
        self
    }
}
