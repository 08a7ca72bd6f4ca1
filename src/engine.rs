//! The transition engine.
//!
//! Every state change is a [`Job`] executed to completion by whichever caller
//! finds the engine idle. A `next` issued from inside a hook or effect is
//! checked right away and runs once the job in progress finishes, so entering,
//! leaving and rebuilding a step never interleave. No lock is held while user
//! code runs.

use crate::api::StepApi;
use crate::config::WorkflowConfig;
use crate::context::{BuildParts, StepContext};
use crate::edge;
use crate::effect::{self, EffectPlan, EffectSlot};
use crate::error::{HookType, WorkflowError};
use crate::graph::WorkflowGraph;
use crate::history::{plan_departure, Arrival, HistoryEntry, HistoryStack};
use crate::hooks::{
    run_cleanup, run_cleanups, run_effect, run_hook, spawn_deferred, Cleanup, DeferredCleanups,
    Hook, HookOutput,
};
use crate::listeners::{Listeners, Subscription};
use crate::step::{validate, StepId, StepInstance};
use crate::workflow::{Status, StepChange};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct Shared {
    pub(crate) config: WorkflowConfig,
    pub(crate) graph: Mutex<WorkflowGraph>,
    pub(crate) run: Mutex<RunState>,
    scheduler: Mutex<Scheduler>,
    pub(crate) step_changes: Listeners<StepChange>,
    pub(crate) finishes: Listeners<Value>,
}

pub(crate) struct RunState {
    pub(crate) running: bool,
    pub(crate) paused: bool,
    /// A store changed while paused.
    dirty: bool,
    generation: u64,
    pub(crate) active: Option<ActiveStep>,
    pub(crate) history: HistoryStack,
}

/// The step the workflow is currently in.
pub(crate) struct ActiveStep {
    pub(crate) node: StepInstance,
    pub(crate) input: Value,
    pub(crate) status: Status,
    pub(crate) api: StepApi,
    pub(crate) arrival: Arrival,
    generation: u64,
    exit_pending: bool,
    rebuild_queued: bool,
    out_hooks: Vec<Hook>,
    in_cleanups: Vec<Cleanup>,
    effects: Vec<EffectSlot>,
    subscription: Option<Subscription>,
}

impl ActiveStep {
    fn new(node: StepInstance, input: Value, generation: u64, arrival: Arrival) -> Self {
        Self {
            node,
            input,
            status: Status::TransitionIn,
            api: StepApi::new(),
            arrival,
            generation,
            exit_pending: false,
            rebuild_queued: false,
            out_hooks: Vec::new(),
            in_cleanups: Vec::new(),
            effects: Vec::new(),
            subscription: None,
        }
    }
}

/// What a departing step leaves behind for the exit phases.
struct Departing {
    node: StepInstance,
    input: Value,
    arrival: Arrival,
    out_hooks: Vec<Hook>,
    effect_cleanups: Vec<Cleanup>,
    in_cleanups: Vec<Cleanup>,
    subscription: Option<Subscription>,
}

#[derive(Default)]
struct Scheduler {
    queue: VecDeque<Job>,
    draining: bool,
}

enum Job {
    Enter {
        node: StepInstance,
        input: Value,
        arrival: Arrival,
        replay: Option<DeferredCleanups>,
    },
    Leave {
        generation: u64,
        exit: Exit,
    },
    Rebuild {
        generation: u64,
    },
    Stop,
}

/// Where a leaving step goes.
enum Exit {
    Forward {
        target: StepInstance,
        input: Value,
        unidirectional: bool,
    },
    Finish(Value),
    Back,
    Stop,
    Jump {
        target: StepInstance,
        input: Value,
        is_back: bool,
        replay: Option<DeferredCleanups>,
    },
}

/// Releases the scheduler if a job unwinds, so the engine stays usable.
struct DrainGuard<'a>(&'a Mutex<Scheduler>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut scheduler = self.0.lock();
            scheduler.draining = false;
            scheduler.queue.clear();
        }
    }
}

impl Shared {
    pub(crate) fn new(config: WorkflowConfig, graph: WorkflowGraph) -> Self {
        let history = HistoryStack::new(config.max_history);
        Self {
            config,
            graph: Mutex::new(graph),
            run: Mutex::new(RunState {
                running: false,
                paused: false,
                dirty: false,
                generation: 0,
                active: None,
                history,
            }),
            scheduler: Mutex::new(Scheduler::default()),
            step_changes: Listeners::new(),
            finishes: Listeners::new(),
        }
    }

    fn dispatch(self: &Arc<Self>, job: Job) {
        {
            let mut scheduler = self.scheduler.lock();
            scheduler.queue.push_back(job);
            if scheduler.draining {
                return;
            }
            scheduler.draining = true;
        }

        let _guard = DrainGuard(&self.scheduler);
        loop {
            let job = {
                let mut scheduler = self.scheduler.lock();
                match scheduler.queue.pop_front() {
                    Some(job) => job,
                    None => {
                        scheduler.draining = false;
                        return;
                    }
                }
            };
            self.execute(job);
        }
    }

    fn execute(self: &Arc<Self>, job: Job) {
        match job {
            Job::Enter {
                node,
                input,
                arrival,
                replay,
            } => self.enter(node, input, arrival, replay),
            Job::Leave { generation, exit } => self.leave(generation, exit),
            Job::Rebuild { generation } => self.rebuild(generation),
            Job::Stop => {
                let generation = self.run.lock().active.as_ref().map(|a| a.generation);
                match generation {
                    Some(generation) => self.leave(generation, Exit::Stop),
                    None => self.reset(),
                }
            }
        }
    }

    // ---- requests ----------------------------------------------------------

    fn validate_input(&self, node: &StepInstance, input: Value) -> Result<Value, WorkflowError> {
        match node.definition().input_schema() {
            Some(schema) => validate(schema.as_ref(), &input, || format!("input of {}", node.id())),
            None => Ok(input),
        }
    }

    pub(crate) fn start(self: &Arc<Self>, node: &StepInstance, input: Value) -> Result<(), WorkflowError> {
        let node = self.graph.lock().resolve(node)?;
        let input = self.validate_input(&node, input)?;
        {
            let mut run = self.run.lock();
            if run.running {
                return Err(WorkflowError::AlreadyRunning);
            }
            run.running = true;
        }
        info!(workflow = %self.config.name, "Workflow started at step '{}'", node.id());
        self.dispatch(Job::Enter {
            node,
            input,
            arrival: Arrival::Origin,
            replay: None,
        });
        Ok(())
    }

    /// The current step if it can accept `next` or `go_back`.
    ///
    /// `handle` is the generation and step a [`NextHandle`](crate::NextHandle)
    /// was issued for; without one the current step is used.
    fn check<'a>(
        run: &'a RunState,
        handle: Option<(u64, &StepId)>,
    ) -> Result<&'a ActiveStep, WorkflowError> {
        let active = match (run.active.as_ref(), handle) {
            (Some(active), Some((generation, _))) if active.generation == generation => active,
            (_, Some((_, step))) => return Err(WorkflowError::StaleHandle(step.clone())),
            (Some(active), None) => active,
            (None, None) => return Err(WorkflowError::NotRunning),
        };
        if run.paused {
            return Err(WorkflowError::Paused);
        }
        if active.exit_pending {
            return Err(WorkflowError::NotReady {
                step_id: active.node.id().clone(),
                status: Status::TransitionOut,
            });
        }
        if active.status != Status::Ready {
            return Err(WorkflowError::NotReady {
                step_id: active.node.id().clone(),
                status: active.status,
            });
        }
        Ok(active)
    }

    /// Marks the current step as leaving, after re-checking it is still `generation`.
    fn claim_exit(
        &self,
        handle: Option<(u64, &StepId)>,
        generation: u64,
    ) -> Result<(), WorkflowError> {
        let mut run = self.run.lock();
        let current = Self::check(&run, handle)?.generation;
        match run.active.as_mut() {
            Some(active) if current == generation => {
                active.exit_pending = true;
                Ok(())
            }
            Some(active) => Err(WorkflowError::NotReady {
                step_id: active.node.id().clone(),
                status: active.status,
            }),
            None => Err(WorkflowError::NotRunning),
        }
    }

    /// Validates `output`, picks an edge and queues the transition.
    pub(crate) fn request_next(
        self: &Arc<Self>,
        handle: Option<(u64, &StepId)>,
        output: Value,
    ) -> Result<(), WorkflowError> {
        let (generation, node) = {
            let run = self.run.lock();
            let active = Self::check(&run, handle)?;
            (active.generation, active.node.clone())
        };

        let output = match node.definition().output_schema() {
            Some(schema) => {
                validate(schema.as_ref(), &output, || format!("output of {}", node.id()))?
            }
            None => output,
        };

        let edges = self.graph.lock().outgoing(node.id());
        let exit = if edges.is_empty() {
            Exit::Finish(output)
        } else {
            let selected = edge::select(&edges, &output).map_err(|rejections| {
                debug!(
                    "Transition blocked at step '{}': {} edge(s) refused",
                    node.id(),
                    rejections.len()
                );
                WorkflowError::TransitionBlocked {
                    step_id: node.id().clone(),
                    rejections,
                }
            })?;
            let target = self.graph.lock().node(selected.edge.to())?.clone();
            let input = self.validate_input(&target, selected.input)?;
            Exit::Forward {
                target,
                input,
                unidirectional: selected.edge.is_unidirectional(),
            }
        };

        self.claim_exit(handle, generation)?;
        self.dispatch(Job::Leave { generation, exit });
        Ok(())
    }

    pub(crate) fn request_back(self: &Arc<Self>) -> Result<(), WorkflowError> {
        let generation = {
            let mut run = self.run.lock();
            let active = Self::check(&run, None)?;
            if let Arrival::Irreversible { from, to } = &active.arrival {
                return Err(WorkflowError::UnidirectionalBack {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
            let generation = active.generation;
            if run.history.is_empty() {
                return Err(WorkflowError::HistoryEmpty);
            }
            if let Some(active) = run.active.as_mut() {
                active.exit_pending = true;
            }
            generation
        };
        self.dispatch(Job::Leave {
            generation,
            exit: Exit::Back,
        });
        Ok(())
    }

    pub(crate) fn stop(self: &Arc<Self>) -> Result<(), WorkflowError> {
        if !self.run.lock().running {
            return Err(WorkflowError::NotRunning);
        }
        self.dispatch(Job::Stop);
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<(), WorkflowError> {
        let mut run = self.run.lock();
        if !run.running {
            return Err(WorkflowError::NotRunning);
        }
        run.paused = true;
        debug!(workflow = %self.config.name, "Workflow paused");
        Ok(())
    }

    pub(crate) fn resume(self: &Arc<Self>) -> Result<(), WorkflowError> {
        let rebuild = {
            let mut guard = self.run.lock();
            let run = &mut *guard;
            if !run.running {
                return Err(WorkflowError::NotRunning);
            }
            run.paused = false;
            let dirty = std::mem::take(&mut run.dirty);
            match run.active.as_mut() {
                Some(active) if dirty && !active.rebuild_queued => {
                    active.rebuild_queued = true;
                    Some(active.generation)
                }
                _ => None,
            }
        };
        debug!(workflow = %self.config.name, "Workflow resumed");
        if let Some(generation) = rebuild {
            self.dispatch(Job::Rebuild { generation });
        }
        Ok(())
    }

    /// Moves to `node` without selecting an edge.
    ///
    /// When not running this starts the workflow at `node`. Otherwise the
    /// current step is left as usual; with `is_back` it is not recorded in
    /// history. `replay` cleanups run before `node` is entered. The history
    /// stack is otherwise left untouched.
    pub(crate) fn transition_into(
        self: &Arc<Self>,
        node: &StepInstance,
        input: Value,
        is_back: bool,
        replay: Option<DeferredCleanups>,
    ) -> Result<(), WorkflowError> {
        let node = self.graph.lock().resolve(node)?;
        let input = self.validate_input(&node, input)?;
        debug!(workflow = %self.config.name, "Privileged transition into '{}'", node.id());
        let job = {
            let mut run = self.run.lock();
            if !run.running {
                run.running = true;
                Job::Enter {
                    node,
                    input,
                    arrival: Arrival::Origin,
                    replay,
                }
            } else {
                match run.active.as_mut() {
                    Some(active) if !active.exit_pending => {
                        active.exit_pending = true;
                        Job::Leave {
                            generation: active.generation,
                            exit: Exit::Jump {
                                target: node,
                                input,
                                is_back,
                                replay,
                            },
                        }
                    }
                    Some(active) => {
                        return Err(WorkflowError::NotReady {
                            step_id: active.node.id().clone(),
                            status: Status::TransitionOut,
                        })
                    }
                    None => return Err(WorkflowError::NotRunning),
                }
            }
        };
        self.dispatch(job);
        Ok(())
    }

    // ---- lifecycle ---------------------------------------------------------

    fn emit(&self, node: &StepInstance, status: Status, rebuild: bool) {
        self.step_changes.notify(&StepChange {
            status,
            step_id: node.id().clone(),
            kind: node.kind().clone(),
            name: node.name().to_string(),
            rebuild,
        });
    }

    fn build(
        self: &Arc<Self>,
        node: &StepInstance,
        input: &Value,
        generation: u64,
        first_build: bool,
    ) -> (StepApi, BuildParts) {
        let mut ctx = StepContext::new(
            Arc::downgrade(self),
            node.clone(),
            input.clone(),
            generation,
            first_build,
        );
        let body = node.definition().body();
        let api = body(&mut ctx).with_owner(node.id().clone());
        (api, ctx.into_parts())
    }

    fn enter(
        self: &Arc<Self>,
        node: StepInstance,
        input: Value,
        arrival: Arrival,
        replay: Option<DeferredCleanups>,
    ) {
        let id = node.id().clone();
        if let Some(slot) = replay {
            run_cleanups(&id, slot.replay());
        }

        let generation = {
            let mut run = self.run.lock();
            if !run.running {
                return;
            }
            run.generation += 1;
            let generation = run.generation;
            run.active = Some(ActiveStep::new(
                node.clone(),
                input.clone(),
                generation,
                arrival,
            ));
            generation
        };
        debug!(workflow = %self.config.name, "Entering step '{}'", id);
        self.emit(&node, Status::TransitionIn, false);

        let (api, parts) = self.build(&node, &input, generation, true);

        let mut in_cleanups = Vec::new();
        for hook in parts.in_hooks {
            match run_hook(&id, HookType::TransitionIn, hook) {
                Some(HookOutput::Cleanup(cleanup)) => in_cleanups.push(cleanup),
                Some(HookOutput::Deferred(future)) => {
                    let shared = Arc::downgrade(self);
                    let step = id.clone();
                    spawn_deferred(
                        id.clone(),
                        HookType::TransitionIn,
                        future,
                        self.config.hook_timeout,
                        move |cleanup| match shared.upgrade() {
                            Some(shared) => shared.settle_in_cleanup(generation, &step, cleanup),
                            None => run_cleanup(&step, cleanup),
                        },
                    );
                }
                Some(HookOutput::None) | None => {}
            }
        }

        let subscription = node.store().map(|store| {
            let shared = Arc::downgrade(self);
            store.subscribe(move |_| {
                if let Some(shared) = shared.upgrade() {
                    shared.store_changed(generation);
                }
            })
        });

        let mut run = self.run.lock();
        let current = run
            .active
            .as_ref()
            .map_or(false, |active| active.generation == generation);
        if !current {
            drop(run);
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
            run_cleanups(&id, in_cleanups);
            return;
        }
        let plan = match run.active.as_mut() {
            Some(active) => {
                active.status = Status::Ready;
                active.api = api;
                active.out_hooks = parts.out_hooks;
                active.in_cleanups.extend(in_cleanups);
                active.subscription = subscription;
                effect::plan(&mut active.effects, parts.effects)
            }
            None => return,
        };
        drop(run);

        self.run_effects(&id, generation, plan);
        info!(workflow = %self.config.name, "Step '{}' ready", id);
        self.emit(&node, Status::Ready, false);
    }

    /// Keeps a cleanup produced late by a deferred `transition_in` hook, or
    /// runs it right away if its step has already been left.
    fn settle_in_cleanup(&self, generation: u64, step: &StepId, cleanup: Cleanup) {
        let late = {
            let mut run = self.run.lock();
            match run.active.as_mut() {
                Some(active)
                    if active.generation == generation
                        && matches!(active.status, Status::TransitionIn | Status::Ready) =>
                {
                    active.in_cleanups.push(cleanup);
                    None
                }
                _ => Some(cleanup),
            }
        };
        if let Some(cleanup) = late {
            debug!("Step '{}' was left before its hook resolved", step);
            run_cleanup(step, cleanup);
        }
    }

    fn run_effects(&self, step: &StepId, generation: u64, plan: EffectPlan) {
        run_cleanups(step, plan.cleanups);
        let produced: Vec<(usize, Option<Cleanup>)> = plan
            .runs
            .into_iter()
            .map(|(index, effect)| (index, run_effect(step, effect)))
            .collect();

        let orphaned: Vec<Cleanup> = {
            let mut run = self.run.lock();
            match run.active.as_mut() {
                Some(active) if active.generation == generation => {
                    let mut orphaned = Vec::new();
                    for (index, cleanup) in produced {
                        match active.effects.get_mut(index) {
                            Some(slot) => slot.cleanup = cleanup,
                            None => orphaned.extend(cleanup),
                        }
                    }
                    orphaned
                }
                _ => produced.into_iter().filter_map(|(_, c)| c).collect(),
            }
        };
        run_cleanups(step, orphaned);
    }

    fn store_changed(self: &Arc<Self>, generation: u64) {
        {
            let mut guard = self.run.lock();
            let run = &mut *guard;
            let Some(active) = run.active.as_mut() else {
                return;
            };
            if active.generation != generation || active.exit_pending {
                return;
            }
            if run.paused {
                run.dirty = true;
                return;
            }
            if active.rebuild_queued {
                return;
            }
            active.rebuild_queued = true;
        }
        self.dispatch(Job::Rebuild { generation });
    }

    fn rebuild(self: &Arc<Self>, generation: u64) {
        let (node, input) = {
            let mut guard = self.run.lock();
            let run = &mut *guard;
            let Some(active) = run.active.as_mut() else {
                return;
            };
            if active.generation != generation {
                return;
            }
            active.rebuild_queued = false;
            if active.exit_pending || active.status != Status::Ready {
                return;
            }
            if run.paused {
                run.dirty = true;
                return;
            }
            (active.node.clone(), active.input.clone())
        };
        debug!("Rebuilding step '{}'", node.id());

        let (api, parts) = self.build(&node, &input, generation, false);
        let plan = {
            let mut run = self.run.lock();
            match run.active.as_mut() {
                Some(active) if active.generation == generation => {
                    active.api = api;
                    effect::plan(&mut active.effects, parts.effects)
                }
                _ => return,
            }
        };
        self.run_effects(node.id(), generation, plan);
        self.emit(&node, Status::Ready, true);
    }

    fn begin_exit(&self, generation: u64) -> Option<Departing> {
        let mut run = self.run.lock();
        let active = run.active.as_mut()?;
        if active.generation != generation {
            return None;
        }
        active.status = Status::TransitionOut;
        active.exit_pending = true;
        Some(Departing {
            node: active.node.clone(),
            input: active.input.clone(),
            arrival: active.arrival.clone(),
            out_hooks: std::mem::take(&mut active.out_hooks),
            effect_cleanups: active
                .effects
                .drain(..)
                .filter_map(|slot| slot.cleanup)
                .collect(),
            in_cleanups: std::mem::take(&mut active.in_cleanups),
            subscription: active.subscription.take(),
        })
    }

    /// Runs the exit phases of the current step, then goes wherever `exit` says.
    ///
    /// Phase order: `transition_out` hooks (their cleanups are kept for a
    /// later replay), effect cleanups, then `transition_in` cleanups.
    fn leave(self: &Arc<Self>, generation: u64, exit: Exit) {
        let Some(departing) = self.begin_exit(generation) else {
            debug!("Ignoring stale transition for generation {}", generation);
            return;
        };
        let Departing {
            node,
            input,
            arrival,
            out_hooks,
            effect_cleanups,
            in_cleanups,
            subscription,
        } = departing;
        let id = node.id().clone();

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.emit(&node, Status::TransitionOut, false);

        let slot = DeferredCleanups::new();
        for hook in out_hooks {
            match run_hook(&id, HookType::TransitionOut, hook) {
                Some(HookOutput::Cleanup(cleanup)) => {
                    if let Some(late) = slot.hold(cleanup) {
                        run_cleanup(&id, late);
                    }
                }
                Some(HookOutput::Deferred(future)) => {
                    let slot = slot.clone();
                    let step = id.clone();
                    spawn_deferred(
                        id.clone(),
                        HookType::TransitionOut,
                        future,
                        self.config.hook_timeout,
                        move |cleanup| {
                            if let Some(late) = slot.hold(cleanup) {
                                run_cleanup(&step, late);
                            }
                        },
                    );
                }
                Some(HookOutput::None) | None => {}
            }
        }
        run_cleanups(&id, effect_cleanups);
        run_cleanups(&id, in_cleanups);
        info!(workflow = %self.config.name, "Step '{}' exited", id);

        match exit {
            Exit::Forward {
                target,
                input: next_input,
                unidirectional,
            } => {
                let next_arrival = self.depart(node, input, arrival, slot, target.id(), unidirectional);
                self.enter(target, next_input, next_arrival, None);
            }
            Exit::Jump {
                target,
                input: next_input,
                is_back,
                replay,
            } => {
                let next_arrival = if is_back {
                    slot.discard();
                    self.run.lock().active = None;
                    Arrival::Origin
                } else {
                    self.depart(node, input, arrival, slot, target.id(), false)
                };
                self.enter(target, next_input, next_arrival, replay);
            }
            Exit::Back => {
                slot.discard();
                let entry = {
                    let mut run = self.run.lock();
                    run.active = None;
                    run.history.pop()
                };
                match entry {
                    Some(entry) => {
                        info!(
                            workflow = %self.config.name,
                            "Going back from '{}' to '{}'",
                            id,
                            entry.node.id()
                        );
                        self.enter(entry.node, entry.input, entry.arrival, Some(entry.deferred));
                    }
                    None => {
                        warn!("History emptied before leaving '{}'; stopping", id);
                        self.reset();
                    }
                }
            }
            Exit::Finish(output) => {
                slot.discard();
                self.reset();
                info!(workflow = %self.config.name, "Workflow finished at step '{}'", id);
                self.finishes.notify(&output);
            }
            Exit::Stop => {
                slot.discard();
                self.reset();
                info!(workflow = %self.config.name, "Workflow stopped at step '{}'", id);
            }
        }
    }

    /// Records (or not) the step being left and returns how `to` is entered.
    fn depart(
        &self,
        node: StepInstance,
        input: Value,
        arrival: Arrival,
        slot: DeferredCleanups,
        to: &StepId,
        unidirectional: bool,
    ) -> Arrival {
        let (record, next_arrival) = plan_departure(&node, &arrival, to, unidirectional);
        if !record {
            slot.discard();
        }
        let mut run = self.run.lock();
        run.active = None;
        if record {
            run.history.push(HistoryEntry {
                node,
                input,
                arrival,
                deferred: slot,
            });
        }
        next_arrival
    }

    fn reset(&self) {
        let mut run = self.run.lock();
        run.running = false;
        run.paused = false;
        run.dirty = false;
        run.active = None;
        run.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::api::StepApi;
    use crate::effect::Deps;
    use crate::error::WorkflowError;
    use crate::step::StepDefinition;
    use crate::workflow::{Status, Workflow};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_store_subscription_follows_the_step() {
        let form = StepDefinition::builder("form")
            .store(|| json!(0))
            .body(|_| StepApi::new());
        let done = StepDefinition::builder("done").body(|_| StepApi::new());
        let workflow = Workflow::builder()
            .step(form.clone())
            .step(done.clone())
            .build()
            .unwrap();
        let a = form.create().unwrap();
        let b = done.create().unwrap();
        workflow.register([a.clone(), b.clone()]).unwrap();
        workflow.connect(&a, &b).unwrap();

        let store = a.store().cloned().unwrap();
        assert_eq!(store.subscriber_count(), 0);
        workflow.start(&a).unwrap();
        assert_eq!(store.subscriber_count(), 1);
        workflow.next(Value::Null).unwrap();
        assert_eq!(store.subscriber_count(), 0);

        workflow.go_back().unwrap();
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn test_next_from_effect_waits_for_enter_to_finish() {
        let relay = StepDefinition::builder("relay").body(|ctx| {
            let next = ctx.next_handle();
            ctx.effect(Deps::Once, move || {
                next.next(json!("forwarded"))?;
                Ok(None)
            });
            StepApi::new()
        });
        let end = StepDefinition::builder("end").body(|_| StepApi::new());
        let workflow = Workflow::builder()
            .step(relay.clone())
            .step(end.clone())
            .build()
            .unwrap();
        let a = relay.create().unwrap();
        let b = end.create().unwrap();
        workflow.register([a.clone(), b.clone()]).unwrap();
        workflow.connect(&a, &b).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = workflow.subscribe_step_change(move |change| {
            sink.lock().push((change.step_id.to_string(), change.status));
        });

        workflow.start(&a).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                ("relay:relay".to_string(), Status::TransitionIn),
                ("relay:relay".to_string(), Status::Ready),
                ("relay:relay".to_string(), Status::TransitionOut),
                ("end:end".to_string(), Status::TransitionIn),
                ("end:end".to_string(), Status::Ready),
            ]
        );
    }

    #[test]
    fn test_panicking_body_does_not_wedge_the_engine() {
        let armed = Arc::new(AtomicBool::new(true));
        let trigger = Arc::clone(&armed);
        let fragile = StepDefinition::builder("fragile").body(move |_| {
            if trigger.swap(false, Ordering::SeqCst) {
                panic!("first build fails");
            }
            StepApi::new()
        });
        let workflow = Workflow::builder().step(fragile.clone()).build().unwrap();
        let node = fragile.create().unwrap();
        workflow.register([node.clone()]).unwrap();

        let outcome = catch_unwind(AssertUnwindSafe(|| workflow.start(&node)));
        assert!(outcome.is_err());

        workflow.stop().unwrap();
        assert!(!workflow.is_running());

        workflow.start(&node).unwrap();
        assert_eq!(workflow.current_step().unwrap().status, Status::Ready);
        assert!(matches!(workflow.start(&node), Err(WorkflowError::AlreadyRunning)));
    }
}
