//! The workflow handle: graph construction, navigation and notifications.

use crate::api::StepApi;
use crate::config::WorkflowConfig;
use crate::edge::Edge;
use crate::engine::Shared;
use crate::error::WorkflowError;
use crate::graph::WorkflowGraph;
use crate::internals::Internals;
use crate::listeners::Subscription;
use crate::step::{StepDefinition, StepId, StepInstance, StepKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Lifecycle status of the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotStarted,
    TransitionIn,
    Ready,
    TransitionOut,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NotStarted => "not started",
            Status::TransitionIn => "transition in",
            Status::Ready => "ready",
            Status::TransitionOut => "transition out",
        };
        write!(f, "{}", s)
    }
}

/// Broadcast to step-change subscribers on every lifecycle change and rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepChange {
    pub status: Status,
    pub step_id: StepId,
    pub kind: StepKind,
    pub name: String,
    /// `true` when the step was rebuilt after a store change.
    pub rebuild: bool,
}

/// Snapshot of the current step.
#[derive(Debug, Clone)]
pub struct CurrentStep {
    pub status: Status,
    pub id: StepId,
    pub kind: StepKind,
    pub name: String,
    /// Present when the definition declares an input schema.
    pub input: Option<Value>,
    pub api: StepApi,
    pub instance: StepInstance,
    pub paused: bool,
}

impl CurrentStep {
    /// Invokes an action of the step's API.
    pub fn call(&self, action: &str, args: Value) -> Result<Value, WorkflowError> {
        self.api.call(action, args)
    }
}

/// A running (or runnable) workflow.
///
/// `Workflow` is a cheap handle; clones drive the same workflow. Separate
/// workflows built from the same definitions share nothing.
///
/// # Examples
///
/// ```
/// use michi::{StepApi, StepDefinition, Workflow};
/// use serde_json::json;
/// use std::sync::{Arc, Mutex};
///
/// let greet = StepDefinition::builder("greet").body(|_| StepApi::new());
/// let done = StepDefinition::builder("done").body(|_| StepApi::new());
///
/// let workflow = Workflow::builder().step(greet.clone()).step(done.clone()).build()?;
/// let a = greet.create()?;
/// let b = done.create()?;
/// workflow.register([a.clone(), b.clone()])?;
/// workflow.connect(&a, &b)?;
///
/// let finished = Arc::new(Mutex::new(None));
/// let sink = Arc::clone(&finished);
/// let _subscription = workflow.on_finish(move |output| {
///     *sink.lock().unwrap() = Some(output.clone());
/// });
///
/// workflow.start(&a)?;
/// workflow.next(json!("hello"))?;
/// assert_eq!(workflow.current_step()?.id, b.id().clone());
/// workflow.next(json!({"done": true}))?;
///
/// assert!(!workflow.is_running());
/// assert_eq!(*finished.lock().unwrap(), Some(json!({"done": true})));
/// # Ok::<(), michi::WorkflowError>(())
/// ```
#[derive(Clone)]
pub struct Workflow {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.shared.graph.lock();
        f.debug_struct("Workflow")
            .field("name", &self.shared.config.name)
            .field("nodes", &graph.nodes().map(|n| n.id()).collect::<Vec<_>>())
            .field("edges", &graph.edges().len())
            .finish()
    }
}

impl Workflow {
    /// Creates a new workflow builder.
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.shared.config
    }

    /// Adds instances to the graph, all or nothing.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::UnknownKind`] if an instance's definition is not one
    /// the workflow was built with, [`WorkflowError::DuplicateInstance`] if an
    /// id is already taken.
    pub fn register(
        &self,
        instances: impl IntoIterator<Item = StepInstance>,
    ) -> Result<(), WorkflowError> {
        self.shared
            .graph
            .lock()
            .register(instances.into_iter().collect())
    }

    /// Adds a default edge.
    pub fn connect(&self, from: &StepInstance, to: &StepInstance) -> Result<(), WorkflowError> {
        self.connect_edge(Edge::new(from, to))
    }

    /// Adds a default edge that cannot be walked back.
    pub fn connect_unidirectional(
        &self,
        from: &StepInstance,
        to: &StepInstance,
    ) -> Result<(), WorkflowError> {
        self.connect_edge(Edge::new(from, to).unidirectional())
    }

    /// Adds a conditional edge.
    pub fn connect_when(
        &self,
        from: &StepInstance,
        to: &StepInstance,
        guard: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Result<(), WorkflowError> {
        self.connect_edge(Edge::conditional(from, to, guard))
    }

    /// Adds an edge; outgoing edges are tried in the order they were added.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::UnregisteredNode`] if either endpoint is not registered.
    pub fn connect_edge(&self, edge: Edge) -> Result<(), WorkflowError> {
        self.shared.graph.lock().connect(edge)
    }

    /// Starts at `node` without input.
    pub fn start(&self, node: &StepInstance) -> Result<(), WorkflowError> {
        self.start_with_input(node, Value::Null)
    }

    /// Starts at `node`, validating `input` against its input schema.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::AlreadyRunning`], [`WorkflowError::UnregisteredNode`]
    /// or [`WorkflowError::Validation`].
    pub fn start_with_input(&self, node: &StepInstance, input: Value) -> Result<(), WorkflowError> {
        self.shared.start(node, input)
    }

    /// Completes the current step with `output` and follows the first edge
    /// that accepts it. A step without outgoing edges finishes the workflow.
    ///
    /// # Errors
    ///
    /// On [`WorkflowError::Validation`] or [`WorkflowError::TransitionBlocked`]
    /// nothing changes: the current step stays ready.
    pub fn next(&self, output: Value) -> Result<(), WorkflowError> {
        self.shared.request_next(None, output)
    }

    /// Returns to the previous recorded step, replaying the cleanups its
    /// `transition_out` hooks produced.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::UnidirectionalBack`] if the current step was entered
    /// over a unidirectional edge, [`WorkflowError::HistoryEmpty`] if there is
    /// nothing to go back to.
    pub fn go_back(&self) -> Result<(), WorkflowError> {
        self.shared.request_back()
    }

    /// Leaves the current step and clears the history without notifying
    /// finish subscribers.
    pub fn stop(&self) -> Result<(), WorkflowError> {
        self.shared.stop()
    }

    /// Refuses `next` and `go_back` until [`resume`](Self::resume); store
    /// changes are remembered and trigger one rebuild on resume.
    pub fn pause(&self) -> Result<(), WorkflowError> {
        self.shared.pause()
    }

    pub fn resume(&self) -> Result<(), WorkflowError> {
        self.shared.resume()
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.shared.run.lock().paused
    }

    /// The current step.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NotRunning`] when the workflow is idle.
    pub fn current_step(&self) -> Result<CurrentStep, WorkflowError> {
        let run = self.shared.run.lock();
        let active = run.active.as_ref().ok_or(WorkflowError::NotRunning)?;
        let node = &active.node;
        Ok(CurrentStep {
            status: active.status,
            id: node.id().clone(),
            kind: node.kind().clone(),
            name: node.name().to_string(),
            input: node
                .definition()
                .capabilities()
                .input
                .then(|| active.input.clone()),
            api: active.api.clone(),
            instance: node.clone(),
            paused: run.paused,
        })
    }

    /// Invokes an action of the current step's API.
    pub fn call(&self, action: &str, args: Value) -> Result<Value, WorkflowError> {
        self.current_step()?.call(action, args)
    }

    /// Subscribes to lifecycle changes and rebuilds of the current step.
    pub fn subscribe_step_change(
        &self,
        listener: impl Fn(&StepChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.step_changes.subscribe(listener)
    }

    /// Subscribes to completion; `listener` receives the final output.
    pub fn on_finish(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.shared.finishes.subscribe(listener)
    }

    /// Privileged operations for tooling built on top of the engine.
    pub fn internals(&self) -> Internals<'_> {
        Internals::new(self)
    }
}

/// Builder for constructing [`Workflow`] instances.
#[derive(Default)]
pub struct WorkflowBuilder {
    definitions: Vec<StepDefinition>,
    config: WorkflowConfig,
}

impl WorkflowBuilder {
    /// Creates a new empty workflow builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step definition to the kind inventory.
    pub fn step(mut self, definition: StepDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn steps(mut self, definitions: impl IntoIterator<Item = StepDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the workflow.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::DuplicateKind`] if two definitions share a kind.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let graph = WorkflowGraph::new(self.definitions)?;
        info!(
            workflow = %self.config.name,
            "Workflow built with {} step kind(s)",
            graph.definitions().count()
        );
        Ok(Workflow {
            shared: Arc::new(Shared::new(self.config, graph)),
        })
    }
}
