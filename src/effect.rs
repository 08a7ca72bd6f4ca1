//! Reactive effects and dependency diffing.

use crate::error::WorkflowError;
use crate::hooks::Cleanup;
use serde_json::Value;

/// When an effect should run again after a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum Deps {
    /// Clean up and rerun on every build.
    Always,
    /// Run once, on the first build of an entry.
    Once,
    /// Rerun when any value differs from the previous build.
    /// An empty list behaves like [`Deps::Once`].
    On(Vec<Value>),
}

impl Deps {
    /// Shorthand for [`Deps::On`].
    pub fn on(values: impl IntoIterator<Item = Value>) -> Self {
        Deps::On(values.into_iter().collect())
    }

    fn normalized(self) -> Self {
        match self {
            Deps::On(values) if values.is_empty() => Deps::Once,
            other => other,
        }
    }

    /// Whether moving from `previous` to `self` requires a rerun.
    fn changed_since(&self, previous: &Deps) -> bool {
        match (self, previous) {
            (Deps::Always, _) => true,
            (Deps::Once, Deps::Once) => false,
            (Deps::On(now), Deps::On(before)) => {
                now.len() != before.len() || now.iter().zip(before).any(|(a, b)| a != b)
            }
            // Switching between modes counts as a change.
            _ => true,
        }
    }
}

pub(crate) type EffectFn = Box<dyn FnOnce() -> Result<Option<Cleanup>, WorkflowError> + Send>;

/// An effect as registered by one build.
pub(crate) struct EffectRegistration {
    pub(crate) deps: Deps,
    pub(crate) run: EffectFn,
}

impl EffectRegistration {
    pub(crate) fn new(deps: Deps, run: EffectFn) -> Self {
        Self {
            deps: deps.normalized(),
            run,
        }
    }
}

/// A live effect of the current entry.
#[derive(Default)]
pub(crate) struct EffectSlot {
    pub(crate) deps: Option<Deps>,
    pub(crate) cleanup: Option<Cleanup>,
}

/// What to do after diffing a build against the live slots.
pub(crate) struct EffectPlan {
    /// Cleanups to run first, in registration order.
    pub(crate) cleanups: Vec<Cleanup>,
    /// `(slot index, effect)` pairs to run afterwards, in registration order.
    pub(crate) runs: Vec<(usize, EffectFn)>,
}

/// Diffs `registrations` against `slots`, updating the dependency snapshots.
///
/// Slots beyond the new registration count are removed and their cleanups
/// scheduled. Cleanups of rerun effects are taken out of their slots; the
/// caller stores the new cleanups once the effects ran.
pub(crate) fn plan(slots: &mut Vec<EffectSlot>, registrations: Vec<EffectRegistration>) -> EffectPlan {
    let mut cleanups = Vec::new();
    let mut runs = Vec::new();

    let removed: Vec<EffectSlot> = slots
        .drain(registrations.len().min(slots.len())..)
        .collect();

    for (index, registration) in registrations.into_iter().enumerate() {
        if index == slots.len() {
            slots.push(EffectSlot::default());
        }
        let slot = &mut slots[index];
        let rerun = match &slot.deps {
            None => true,
            Some(previous) => registration.deps.changed_since(previous),
        };
        if rerun {
            cleanups.extend(slot.cleanup.take());
            slot.deps = Some(registration.deps);
            runs.push((index, registration.run));
        }
    }

    cleanups.extend(removed.into_iter().filter_map(|slot| slot.cleanup));
    EffectPlan { cleanups, runs }
}
