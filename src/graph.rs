//! The workflow graph: kind inventory, registered nodes and edges.
//!
//! Nodes and edges reference each other only through [`StepId`]s held in flat
//! maps, so the structure can be inspected or serialized without following
//! object references.

use crate::edge::Edge;
use crate::error::WorkflowError;
use crate::step::{StepDefinition, StepId, StepInstance, StepKind};
use indexmap::IndexMap;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct WorkflowGraph {
    inventory: IndexMap<StepKind, StepDefinition>,
    nodes: IndexMap<StepId, StepInstance>,
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Builds the kind inventory.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::DuplicateKind`] if two definitions share a kind.
    pub(crate) fn new(definitions: Vec<StepDefinition>) -> Result<Self, WorkflowError> {
        let mut inventory = IndexMap::new();
        for definition in definitions {
            let kind = definition.kind().clone();
            if inventory.contains_key(&kind) {
                return Err(WorkflowError::DuplicateKind(kind));
            }
            inventory.insert(kind, definition);
        }
        Ok(Self {
            inventory,
            nodes: IndexMap::new(),
            edges: Vec::new(),
        })
    }

    /// Checks that an instance can be added without touching the graph.
    fn check_insertable(&self, instance: &StepInstance) -> Result<(), WorkflowError> {
        match self.inventory.get(instance.kind()) {
            Some(definition) if definition.ptr_eq(instance.definition()) => {}
            _ => return Err(WorkflowError::UnknownKind(instance.kind().clone())),
        }
        if self.nodes.contains_key(instance.id()) {
            return Err(WorkflowError::DuplicateInstance(instance.id().clone()));
        }
        Ok(())
    }

    /// Registers instances, all or nothing.
    pub(crate) fn register(&mut self, instances: Vec<StepInstance>) -> Result<(), WorkflowError> {
        let mut batch: IndexMap<StepId, StepInstance> = IndexMap::new();
        for instance in instances {
            self.check_insertable(&instance)?;
            if batch.contains_key(instance.id()) {
                return Err(WorkflowError::DuplicateInstance(instance.id().clone()));
            }
            batch.insert(instance.id().clone(), instance);
        }
        for (id, instance) in batch {
            debug!("Step '{}' registered", id);
            self.nodes.insert(id, instance);
        }
        Ok(())
    }

    pub(crate) fn connect(&mut self, edge: Edge) -> Result<(), WorkflowError> {
        for endpoint in [edge.from(), edge.to()] {
            if !self.nodes.contains_key(endpoint) {
                return Err(WorkflowError::UnregisteredNode(endpoint.clone()));
            }
        }
        debug!(
            "Edge '{}' -> '{}' connected ({:?})",
            edge.from(),
            edge.to(),
            edge.kind().label()
        );
        self.edges.push(edge);
        Ok(())
    }

    /// Removes every edge from `from` to `to`; returns how many were removed.
    pub(crate) fn disconnect(&mut self, from: &StepId, to: &StepId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.from() == from && e.to() == to));
        before - self.edges.len()
    }

    pub(crate) fn node(&self, id: &StepId) -> Result<&StepInstance, WorkflowError> {
        self.nodes
            .get(id)
            .ok_or_else(|| WorkflowError::UnregisteredNode(id.clone()))
    }

    /// Returns the registered instance with this id if it is the same instance.
    pub(crate) fn resolve(&self, instance: &StepInstance) -> Result<StepInstance, WorkflowError> {
        match self.nodes.get(instance.id()) {
            Some(registered) if registered.ptr_eq(instance) => Ok(registered.clone()),
            _ => Err(WorkflowError::UnregisteredNode(instance.id().clone())),
        }
    }

    /// Outgoing edges of `id` in declaration order.
    pub(crate) fn outgoing(&self, id: &StepId) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|e| e.from() == id)
            .cloned()
            .collect()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &StepInstance> {
        self.nodes.values()
    }

    pub(crate) fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub(crate) fn definitions(&self) -> impl Iterator<Item = &StepDefinition> {
        self.inventory.values()
    }
}
