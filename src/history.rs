//! Back-navigation history.

use crate::hooks::DeferredCleanups;
use crate::step::{StepId, StepInstance};
use serde_json::Value;
use std::collections::VecDeque;

/// How the current step was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// Entered by `start` or a privileged jump.
    Origin,
    /// Entered over an edge that may be walked back.
    Reversible { from: StepId },
    /// Entered past a unidirectional edge `from -> to`; going back is refused.
    Irreversible { from: StepId, to: StepId },
}

/// A previously visited step.
#[derive(Debug, Clone)]
pub(crate) struct HistoryEntry {
    pub(crate) node: StepInstance,
    pub(crate) input: Value,
    pub(crate) arrival: Arrival,
    pub(crate) deferred: DeferredCleanups,
}

/// Read-only view of a history entry.
#[derive(Debug, Clone)]
pub struct HistoryView {
    pub node: StepId,
    pub input: Value,
    pub arrival: Arrival,
    /// `transition_out` cleanups waiting to be replayed.
    pub pending_cleanups: usize,
}

/// Whether leaving a step towards another is recorded, and how the next step
/// is considered to have been entered.
///
/// - a `no_history` step is never recorded; its successor inherits its
///   arrival so that going back skips it (or is refused if the skipped step
///   itself sits behind a unidirectional edge);
/// - a unidirectional edge is never recorded and makes its target irreversible;
/// - anything else is recorded and reversible.
pub(crate) fn plan_departure(
    leaving: &StepInstance,
    leaving_arrival: &Arrival,
    to: &StepId,
    unidirectional: bool,
) -> (bool, Arrival) {
    if unidirectional {
        return (
            false,
            Arrival::Irreversible {
                from: leaving.id().clone(),
                to: to.clone(),
            },
        );
    }
    if leaving.definition().no_history() {
        let arrival = match leaving_arrival {
            Arrival::Irreversible { .. } => leaving_arrival.clone(),
            _ => Arrival::Reversible {
                from: leaving.id().clone(),
            },
        };
        return (false, arrival);
    }
    (
        true,
        Arrival::Reversible {
            from: leaving.id().clone(),
        },
    )
}

#[derive(Debug, Default)]
pub(crate) struct HistoryStack {
    entries: VecDeque<HistoryEntry>,
    limit: Option<usize>,
}

impl HistoryStack {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Pushes an entry, discarding the oldest ones beyond the limit.
    pub(crate) fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        if let Some(limit) = self.limit {
            while self.entries.len() > limit {
                if let Some(oldest) = self.entries.pop_front() {
                    oldest.deferred.discard();
                }
            }
        }
    }

    pub(crate) fn pop(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops every entry; their deferred cleanups will never run.
    pub(crate) fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.deferred.discard();
        }
    }

    pub(crate) fn views(&self) -> Vec<HistoryView> {
        self.entries
            .iter()
            .map(|entry| HistoryView {
                node: entry.node.id().clone(),
                input: entry.input.clone(),
                arrival: entry.arrival.clone(),
                pending_cleanups: entry.deferred.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StepApi;
    use crate::step::StepDefinition;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn entry(node: &StepInstance, input: Value) -> HistoryEntry {
        HistoryEntry {
            node: node.clone(),
            input,
            arrival: Arrival::Origin,
            deferred: DeferredCleanups::new(),
        }
    }

    #[test]
    fn test_departure_rules() {
        let plain = StepDefinition::builder("plain").body(|_| StepApi::new());
        let hidden = StepDefinition::builder("hidden")
            .no_history()
            .body(|_| StepApi::new());
        let a = plain.create().unwrap();
        let h = hidden.create().unwrap();
        let next = StepId::new("next:next");

        assert_eq!(
            plan_departure(&a, &Arrival::Origin, &next, false),
            (true, Arrival::Reversible { from: a.id().clone() })
        );
        assert_eq!(
            plan_departure(&a, &Arrival::Origin, &next, true),
            (
                false,
                Arrival::Irreversible {
                    from: a.id().clone(),
                    to: next.clone()
                }
            )
        );
        assert_eq!(
            plan_departure(&h, &Arrival::Reversible { from: a.id().clone() }, &next, false),
            (false, Arrival::Reversible { from: h.id().clone() })
        );

        let blocked = Arrival::Irreversible {
            from: a.id().clone(),
            to: h.id().clone(),
        };
        assert_eq!(
            plan_departure(&h, &blocked, &next, false),
            (false, blocked.clone())
        );
    }

    #[test]
    fn test_limit_discards_oldest() {
        let step = StepDefinition::builder("s").body(|_| StepApi::new());
        let a = step.named("a").unwrap();
        let b = step.named("b").unwrap();
        let c = step.named("c").unwrap();

        let dropped = Arc::new(AtomicUsize::new(0));
        let first = entry(&a, json!(1));
        let counter = Arc::clone(&dropped);
        first.deferred.push(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let mut history = HistoryStack::new(Some(2));
        history.push(first);
        history.push(entry(&b, json!(2)));
        history.push(entry(&c, json!(3)));

        assert_eq!(history.len(), 2);
        let nodes: Vec<StepId> = history.views().into_iter().map(|v| v.node).collect();
        assert_eq!(nodes, vec![StepId::new("s:b"), StepId::new("s:c")]);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        assert_eq!(history.pop().map(|e| e.input), Some(json!(3)));
        history.clear();
        assert!(history.is_empty());
    }
}
