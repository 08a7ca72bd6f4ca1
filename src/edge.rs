//! Edges between step instances and the edge selection algorithm.

use crate::error::WorkflowError;
use crate::hooks::panic_message;
use crate::step::{StepId, StepInstance};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Predicate deciding whether a conditional edge may be taken.
pub type Guard = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Maps a step's output to the next step's input; an `Err` refuses the edge.
pub type Transform = Arc<dyn Fn(&Value) -> Result<Value, WorkflowError> + Send + Sync>;

/// How an edge decides whether it accepts an output.
#[derive(Clone)]
pub enum EdgeKind {
    /// Always accepts, passing the output through.
    Default,
    /// Accepts when the guard returns `true`.
    Conditional(Guard),
    /// Accepts when the transform succeeds, passing its result on.
    Transform(Transform),
}

impl EdgeKind {
    pub fn label(&self) -> EdgeLabel {
        match self {
            EdgeKind::Default => EdgeLabel::Default,
            EdgeKind::Conditional(_) => EdgeLabel::Conditional,
            EdgeKind::Transform(_) => EdgeLabel::Transform,
        }
    }
}

/// Serializable name of an [`EdgeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    Default,
    Conditional,
    Transform,
}

/// A directed connection between two step instances.
///
/// # Examples
///
/// ```
/// use michi::{Edge, StepApi, StepDefinition};
/// use serde_json::json;
///
/// let step = StepDefinition::builder("s").body(|_| StepApi::new());
/// let a = step.named("a").unwrap();
/// let b = step.named("b").unwrap();
///
/// let even = Edge::conditional(&a, &b, |v| v["value"].as_i64().map_or(false, |n| n % 2 == 0));
/// assert!(!even.is_unidirectional());
///
/// let one_way = Edge::new(&a, &b).unidirectional();
/// assert!(one_way.is_unidirectional());
/// ```
#[derive(Clone)]
pub struct Edge {
    from: StepId,
    to: StepId,
    unidirectional: bool,
    kind: EdgeKind,
}

impl Edge {
    /// A default edge.
    pub fn new(from: &StepInstance, to: &StepInstance) -> Self {
        Self::between(from.id().clone(), to.id().clone(), EdgeKind::Default)
    }

    /// An edge gated by `guard`.
    pub fn conditional(
        from: &StepInstance,
        to: &StepInstance,
        guard: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::between(
            from.id().clone(),
            to.id().clone(),
            EdgeKind::Conditional(Arc::new(guard)),
        )
    }

    /// An edge mapping the output through `transform`.
    pub fn transform(
        from: &StepInstance,
        to: &StepInstance,
        transform: impl Fn(&Value) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    ) -> Self {
        Self::between(
            from.id().clone(),
            to.id().clone(),
            EdgeKind::Transform(Arc::new(transform)),
        )
    }

    /// An edge between two ids, for tooling that only knows identifiers.
    pub fn between(from: StepId, to: StepId, kind: EdgeKind) -> Self {
        Self {
            from,
            to,
            unidirectional: false,
            kind,
        }
    }

    /// Forbids going back across this edge.
    pub fn unidirectional(mut self) -> Self {
        self.unidirectional = true;
        self
    }

    pub fn from(&self) -> &StepId {
        &self.from
    }

    pub fn to(&self) -> &StepId {
        &self.to
    }

    pub fn is_unidirectional(&self) -> bool {
        self.unidirectional
    }

    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    /// Decides whether this edge accepts `output`, yielding the next input.
    ///
    /// A guard or transform that panics refuses the edge.
    pub fn evaluate(&self, output: &Value) -> Result<Value, String> {
        match &self.kind {
            EdgeKind::Default => Ok(output.clone()),
            EdgeKind::Conditional(guard) => match catch_unwind(AssertUnwindSafe(|| guard(output))) {
                Ok(true) => Ok(output.clone()),
                Ok(false) => Err(format!("{} -> {}: guard rejected", self.from, self.to)),
                Err(payload) => Err(format!(
                    "{} -> {}: guard {}",
                    self.from,
                    self.to,
                    panic_message(payload.as_ref())
                )),
            },
            EdgeKind::Transform(transform) => {
                match catch_unwind(AssertUnwindSafe(|| transform(output))) {
                    Ok(Ok(input)) => Ok(input),
                    Ok(Err(e)) => Err(format!(
                        "{} -> {}: transform failed: {}",
                        self.from, self.to, e
                    )),
                    Err(payload) => Err(format!(
                        "{} -> {}: transform {}",
                        self.from,
                        self.to,
                        panic_message(payload.as_ref())
                    )),
                }
            }
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("unidirectional", &self.unidirectional)
            .field("kind", &self.kind.label())
            .finish()
    }
}

/// The edge chosen for a transition and the input it produced.
#[derive(Debug, Clone)]
pub struct Selected {
    pub edge: Edge,
    pub input: Value,
}

/// Picks the first edge, in declaration order, that accepts `output`.
///
/// A failing transform does not abort the search; every refusal is
/// collected and returned when no edge accepts.
pub fn select(edges: &[Edge], output: &Value) -> Result<Selected, Vec<String>> {
    let mut rejections = Vec::new();
    for edge in edges {
        match edge.evaluate(output) {
            Ok(input) => {
                return Ok(Selected {
                    edge: edge.clone(),
                    input,
                })
            }
            Err(reason) => rejections.push(reason),
        }
    }
    Err(rejections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StepApi;
    use crate::step::StepDefinition;
    use serde_json::json;

    fn nodes() -> (StepInstance, StepInstance, StepInstance) {
        let step = StepDefinition::builder("s").body(|_| StepApi::new());
        (
            step.named("a").unwrap(),
            step.named("b").unwrap(),
            step.named("c").unwrap(),
        )
    }

    fn is_even(v: &Value) -> bool {
        v["value"].as_i64().map_or(false, |n| n % 2 == 0)
    }

    #[test]
    fn test_conditional_falls_through_to_default() {
        let (a, b, c) = nodes();
        let edges = vec![Edge::conditional(&a, &b, is_even), Edge::new(&a, &c)];

        let odd = select(&edges, &json!({"value": 3})).unwrap();
        assert_eq!(odd.edge.to(), c.id());
        assert_eq!(odd.input, json!({"value": 3}));

        let even = select(&edges, &json!({"value": 4})).unwrap();
        assert_eq!(even.edge.to(), b.id());
    }

    #[test]
    fn test_failed_transform_continues() {
        let (a, b, c) = nodes();
        let edges = vec![
            Edge::transform(&a, &b, |_| {
                Err(WorkflowError::Configuration("no mapping".to_string()))
            }),
            Edge::transform(&a, &c, |v| Ok(json!({"doubled": v["value"].as_i64().unwrap_or(0) * 2}))),
        ];

        let selected = select(&edges, &json!({"value": 5})).unwrap();
        assert_eq!(selected.edge.to(), c.id());
        assert_eq!(selected.input, json!({"doubled": 10}));
    }

    #[test]
    fn test_exhausted_edges_report_every_rejection() {
        let (a, b, c) = nodes();
        let edges = vec![
            Edge::conditional(&a, &b, |_| false),
            Edge::transform(&a, &c, |_| Err(WorkflowError::Configuration("nope".to_string()))),
        ];

        let rejections = select(&edges, &json!(null)).unwrap_err();
        assert_eq!(
            rejections,
            vec![
                "s:a -> s:b: guard rejected".to_string(),
                "s:a -> s:c: transform failed: Invalid workflow configuration: nope".to_string(),
            ]
        );
    }

    #[test]
    fn test_panicking_callbacks_refuse_the_edge() {
        let (a, b, c) = nodes();
        let edges = vec![
            Edge::conditional(&a, &b, |v| v["flag"].as_bool().expect("flag")),
            Edge::transform(&a, &b, |v| Ok(json!(v["missing"].as_str().expect("no field")))),
            Edge::new(&a, &c),
        ];

        let selected = select(&edges, &json!({})).unwrap();
        assert_eq!(selected.edge.to(), c.id());

        let rejections = select(&edges[..2], &json!({})).unwrap_err();
        assert_eq!(
            rejections,
            vec![
                "s:a -> s:b: guard panicked: flag".to_string(),
                "s:a -> s:b: transform panicked: no field".to_string(),
            ]
        );
    }

    #[test]
    fn test_first_acceptance_wins() {
        let (a, b, c) = nodes();
        let edges = vec![Edge::new(&a, &b), Edge::new(&a, &c)];
        assert_eq!(select(&edges, &json!(1)).unwrap().edge.to(), b.id());
    }
}
