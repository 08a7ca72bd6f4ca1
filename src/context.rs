//! Build arguments handed to a step body.

use crate::effect::{Deps, EffectRegistration};
use crate::engine::Shared;
use crate::error::WorkflowError;
use crate::hooks::{Cleanup, Hook, HookOutput};
use crate::step::{StepId, StepInstance, StepKind};
use crate::store::Store;
use serde_json::Value;
use std::fmt;
use std::sync::Weak;

/// What a step body receives each time it is (re)built.
///
/// The body reads its declared arguments (`input`, `config`, `store`),
/// registers lifecycle hooks and effects, and returns its
/// [`StepApi`](crate::StepApi).
///
/// Lifecycle hooks are only collected on the first build of an entry;
/// registrations made during a rebuild are ignored. Effects are collected on
/// every build and diffed by registration order.
pub struct StepContext {
    node: StepInstance,
    input: Value,
    next: NextHandle,
    first_build: bool,
    in_hooks: Vec<Hook>,
    out_hooks: Vec<Hook>,
    effects: Vec<EffectRegistration>,
}

/// Hooks and effects collected during a build.
pub(crate) struct BuildParts {
    pub(crate) in_hooks: Vec<Hook>,
    pub(crate) out_hooks: Vec<Hook>,
    pub(crate) effects: Vec<EffectRegistration>,
}

impl StepContext {
    pub(crate) fn new(
        shared: Weak<Shared>,
        node: StepInstance,
        input: Value,
        generation: u64,
        first_build: bool,
    ) -> Self {
        let next = NextHandle {
            shared,
            step: node.id().clone(),
            generation,
        };
        Self {
            node,
            input,
            next,
            first_build,
            in_hooks: Vec::new(),
            out_hooks: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn id(&self) -> &StepId {
        self.node.id()
    }

    pub fn kind(&self) -> &StepKind {
        self.node.kind()
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn instance(&self) -> &StepInstance {
        &self.node
    }

    /// The validated input, if the definition declares an input schema.
    pub fn input(&self) -> Option<&Value> {
        self.node
            .definition()
            .capabilities()
            .input
            .then_some(&self.input)
    }

    /// The validated config, if the definition declares a config schema.
    pub fn config(&self) -> Option<&Value> {
        self.node
            .definition()
            .capabilities()
            .config
            .then(|| self.node.config())
    }

    /// The instance's store, if the definition declares one.
    pub fn store(&self) -> Option<&Store> {
        self.node.store()
    }

    /// `true` on the first build after the step was entered.
    pub fn is_first_build(&self) -> bool {
        self.first_build
    }

    /// A handle the step's actions can keep to call `next` later.
    pub fn next_handle(&self) -> NextHandle {
        self.next.clone()
    }

    /// Completes the step with `output`.
    pub fn next(&self, output: Value) -> Result<(), WorkflowError> {
        self.next.next(output)
    }

    /// Registers a hook run when the step is entered, before it becomes ready.
    pub fn on_transition_in<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<HookOutput, WorkflowError> + Send + 'static,
    {
        if self.first_build {
            self.in_hooks.push(Box::new(hook));
        }
    }

    /// Registers a hook run when the step is left.
    ///
    /// Its cleanup is kept with the history entry and replayed if the
    /// workflow comes back to this step.
    pub fn on_transition_out<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<HookOutput, WorkflowError> + Send + 'static,
    {
        if self.first_build {
            self.out_hooks.push(Box::new(hook));
        }
    }

    /// Registers a reactive effect.
    pub fn effect<F>(&mut self, deps: Deps, effect: F)
    where
        F: FnOnce() -> Result<Option<Cleanup>, WorkflowError> + Send + 'static,
    {
        self.effects
            .push(EffectRegistration::new(deps, Box::new(effect)));
    }

    pub(crate) fn into_parts(self) -> BuildParts {
        BuildParts {
            in_hooks: self.in_hooks,
            out_hooks: self.out_hooks,
            effects: self.effects,
        }
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("step", self.node.id())
            .field("first_build", &self.first_build)
            .field("effects", &self.effects.len())
            .finish()
    }
}

/// Lets a step complete itself, from its actions or effects.
///
/// A handle belongs to one entry of one step: once that step exits, the
/// handle fails with [`WorkflowError::StaleHandle`].
#[derive(Clone)]
pub struct NextHandle {
    shared: Weak<Shared>,
    step: StepId,
    generation: u64,
}

impl NextHandle {
    /// Hands `output` to the engine.
    ///
    /// # Errors
    ///
    /// Validation and edge selection happen before this returns:
    /// [`WorkflowError::Validation`] and [`WorkflowError::TransitionBlocked`]
    /// leave the workflow untouched.
    pub fn next(&self, output: Value) -> Result<(), WorkflowError> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| WorkflowError::StaleHandle(self.step.clone()))?;
        shared.request_next(Some((self.generation, &self.step)), output)
    }

    pub fn step_id(&self) -> &StepId {
        &self.step
    }
}

impl fmt::Debug for NextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextHandle")
            .field("step", &self.step)
            .field("generation", &self.generation)
            .finish()
    }
}
