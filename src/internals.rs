//! Privileged access for tooling layered on the engine (devtools, time
//! travel, persistence).
//!
//! Nothing here is needed to drive a workflow; it exposes the graph and
//! history and lets a collaborator move the workflow directly.

use crate::edge::{Edge, EdgeLabel};
use crate::error::WorkflowError;
use crate::history::HistoryView;
use crate::hooks::DeferredCleanups;
use crate::step::{StepDefinition, StepId, StepInstance, StepKind};
use crate::workflow::{Status, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Borrowed privileged view of a [`Workflow`].
#[derive(Debug, Clone, Copy)]
pub struct Internals<'a> {
    workflow: &'a Workflow,
}

impl<'a> Internals<'a> {
    pub(crate) fn new(workflow: &'a Workflow) -> Self {
        Self { workflow }
    }

    /// Registered instances, in registration order.
    pub fn nodes(&self) -> Vec<StepInstance> {
        self.workflow.shared.graph.lock().nodes().cloned().collect()
    }

    /// Every edge, in declaration order.
    pub fn edges(&self) -> Vec<Edge> {
        self.workflow.shared.graph.lock().edges().to_vec()
    }

    /// The kind inventory.
    pub fn definitions(&self) -> Vec<StepDefinition> {
        self.workflow
            .shared
            .graph
            .lock()
            .definitions()
            .cloned()
            .collect()
    }

    /// History entries, oldest first.
    pub fn history(&self) -> Vec<HistoryView> {
        self.workflow.shared.run.lock().history.views()
    }

    pub fn is_workflow_running(&self) -> bool {
        self.workflow.is_running()
    }

    /// Registers a single instance.
    pub fn add_node(&self, instance: StepInstance) -> Result<(), WorkflowError> {
        self.workflow.register([instance])
    }

    /// Removes every edge from `from` to `to`; returns how many were removed.
    pub fn disconnect(&self, from: &StepId, to: &StepId) -> usize {
        self.workflow.shared.graph.lock().disconnect(from, to)
    }

    /// Moves the workflow to `node` without edge selection.
    ///
    /// Starts the workflow if it is idle. Otherwise the current step goes
    /// through its normal exit; with `is_back` it is not recorded in history.
    /// `back_cleanups` are replayed right before `node` is entered.
    pub fn transition_into(
        &self,
        node: &StepInstance,
        input: Value,
        is_back: bool,
        back_cleanups: Option<DeferredCleanups>,
    ) -> Result<(), WorkflowError> {
        self.workflow
            .shared
            .transition_into(node, input, is_back, back_cleanups)
    }

    /// Overwrites the store of a registered instance, notifying its
    /// subscribers as any other write would.
    pub fn restore_store(&self, id: &StepId, state: Value) -> Result<(), WorkflowError> {
        let node = self.workflow.shared.graph.lock().node(id)?.clone();
        match node.store() {
            Some(store) => {
                store.set_state(state);
                Ok(())
            }
            None => Err(WorkflowError::Configuration(format!(
                "step '{}' has no store",
                id
            ))),
        }
    }

    /// Serializable picture of the graph and the run.
    pub fn snapshot(&self) -> WorkflowSnapshot {
        let shared = &self.workflow.shared;
        let (nodes, edges) = {
            let graph = shared.graph.lock();
            let nodes = graph
                .nodes()
                .map(|node| NodeSnapshot {
                    id: node.id().clone(),
                    kind: node.kind().clone(),
                    name: node.name().to_string(),
                    config: node.config().clone(),
                    store: node.store().map(|store| store.get_state()),
                })
                .collect();
            let edges = graph
                .edges()
                .iter()
                .map(|edge| EdgeSnapshot {
                    from: edge.from().clone(),
                    to: edge.to().clone(),
                    unidirectional: edge.is_unidirectional(),
                    kind: edge.kind().label(),
                })
                .collect();
            (nodes, edges)
        };

        let run = shared.run.lock();
        WorkflowSnapshot {
            name: shared.config.name.clone(),
            running: run.running,
            paused: run.paused,
            current: run.active.as_ref().map(|active| CurrentSnapshot {
                id: active.node.id().clone(),
                status: active.status,
                input: active.input.clone(),
            }),
            history: run
                .history
                .views()
                .into_iter()
                .map(|view| HistorySnapshot {
                    node: view.node,
                    input: view.input,
                })
                .collect(),
            nodes,
            edges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub name: String,
    pub running: bool,
    pub paused: bool,
    pub current: Option<CurrentSnapshot>,
    pub history: Vec<HistorySnapshot>,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSnapshot {
    pub id: StepId,
    pub status: Status,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub node: StepId,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: StepId,
    pub kind: StepKind,
    pub name: String,
    pub config: Value,
    /// Store state, for steps that declare a store.
    pub store: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub from: StepId,
    pub to: StepId,
    pub unidirectional: bool,
    pub kind: EdgeLabel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StepApi;
    use serde_json::json;

    fn setup() -> (Workflow, StepInstance, StepInstance) {
        let form = StepDefinition::builder("form")
            .store(|| json!({"draft": ""}))
            .body(|_| StepApi::new());
        let review = StepDefinition::builder("review").body(|_| StepApi::new());
        let workflow = Workflow::builder()
            .step(form.clone())
            .step(review.clone())
            .build()
            .unwrap();
        let a = form.create().unwrap();
        let b = review.create().unwrap();
        workflow.register([a.clone(), b.clone()]).unwrap();
        workflow.connect_unidirectional(&a, &b).unwrap();
        (workflow, a, b)
    }

    #[test]
    fn test_snapshot_serializes() {
        let (workflow, a, _b) = setup();
        workflow.start(&a).unwrap();

        let snapshot = workflow.internals().snapshot();
        let encoded = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(encoded["name"], json!("workflow"));
        assert_eq!(encoded["current"]["id"], json!("form:form"));
        assert_eq!(encoded["current"]["status"], json!("ready"));
        assert_eq!(encoded["edges"][0]["kind"], json!("default"));
        assert_eq!(encoded["edges"][0]["unidirectional"], json!(true));
        assert_eq!(encoded["nodes"][0]["store"], json!({"draft": ""}));
        assert_eq!(encoded["nodes"][1]["store"], Value::Null);

        let decoded: WorkflowSnapshot = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_transition_into_records_history() {
        let (workflow, a, b) = setup();
        let internals = workflow.internals();
        assert!(!internals.is_workflow_running());

        internals.transition_into(&a, Value::Null, false, None).unwrap();
        assert!(internals.is_workflow_running());
        internals.transition_into(&b, Value::Null, false, None).unwrap();

        let history = internals.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].node, *a.id());

        // A privileged back move leaves history alone and records nothing.
        internals.transition_into(&a, Value::Null, true, None).unwrap();
        assert_eq!(internals.history().len(), 1);
        assert_eq!(workflow.current_step().unwrap().id, *a.id());
    }

    #[test]
    fn test_restore_store_and_disconnect() {
        let (workflow, a, b) = setup();
        let internals = workflow.internals();

        internals.restore_store(a.id(), json!({"draft": "hi"})).unwrap();
        assert_eq!(a.store().map(|s| s.get_state()), Some(json!({"draft": "hi"})));
        assert!(matches!(
            internals.restore_store(b.id(), json!(1)),
            Err(WorkflowError::Configuration(_))
        ));

        assert_eq!(internals.disconnect(a.id(), b.id()), 1);
        assert!(internals.edges().is_empty());
        assert_eq!(internals.nodes().len(), 2);
        assert_eq!(internals.definitions().len(), 2);

        let form = internals.definitions()[0].clone();
        internals.add_node(form.named("second").unwrap()).unwrap();
        assert!(matches!(
            internals.add_node(form.named("second").unwrap()),
            Err(WorkflowError::DuplicateInstance(_))
        ));
        assert_eq!(internals.nodes().len(), 3);
    }
}
