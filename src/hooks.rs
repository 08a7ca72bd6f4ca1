//! Lifecycle hook plumbing: cleanups, deferred hooks and failure isolation.
//!
//! Every piece of user code the engine runs on a step's behalf goes through
//! the runners in this module. Errors and panics are reported as
//! [`WorkflowError::HookError`] through `tracing` and then dropped.

use crate::error::{HookType, WorkflowError};
use crate::step::StepId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Undoes whatever a hook or effect set up.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// A pending hook computation that eventually yields an optional cleanup.
pub type HookFuture = BoxFuture<'static, Result<Option<Cleanup>, WorkflowError>>;

/// A `transition_in` / `transition_out` hook.
pub type Hook = Box<dyn FnOnce() -> Result<HookOutput, WorkflowError> + Send>;

/// What a lifecycle hook hands back to the engine.
pub enum HookOutput {
    /// Nothing to undo.
    None,
    /// Undo action available right away.
    Cleanup(Cleanup),
    /// Undo action produced later by an async computation.
    Deferred(HookFuture),
}

impl HookOutput {
    pub fn cleanup(f: impl FnOnce() + Send + 'static) -> Self {
        HookOutput::Cleanup(Box::new(f))
    }

    /// Wraps a future resolving to an optional cleanup.
    ///
    /// The engine spawns the future on the ambient tokio runtime, so the hook
    /// must run inside one; outside a runtime the future is never polled and
    /// the failure is logged.
    ///
    /// ```
    /// use michi::HookOutput;
    ///
    /// let output = HookOutput::deferred(async {
    ///     // subscribe to something slow...
    ///     Ok(Some(Box::new(|| { /* ...and unsubscribe */ }) as michi::Cleanup))
    /// });
    /// assert!(matches!(output, HookOutput::Deferred(_)));
    /// ```
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<Cleanup>, WorkflowError>> + Send + 'static,
    {
        HookOutput::Deferred(future.boxed())
    }
}

impl fmt::Debug for HookOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookOutput::None => write!(f, "HookOutput::None"),
            HookOutput::Cleanup(_) => write!(f, "HookOutput::Cleanup"),
            HookOutput::Deferred(_) => write!(f, "HookOutput::Deferred"),
        }
    }
}

/// Cleanups captured when a step was left, replayed if it is re-entered by
/// going back.
///
/// A deferred `transition_out` hook may resolve after the slot was replayed
/// or discarded. Replayed slots run late cleanups immediately; discarded
/// slots drop them.
#[derive(Clone, Default)]
pub struct DeferredCleanups {
    inner: Arc<Mutex<SlotState>>,
}

#[derive(Default)]
struct SlotState {
    phase: SlotPhase,
    cleanups: Vec<Cleanup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotPhase {
    #[default]
    Held,
    Replayed,
    Discarded,
}

impl DeferredCleanups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cleanup, or runs it right away if the slot was already replayed.
    pub fn push(&self, cleanup: Cleanup) {
        if let Some(late) = self.hold(cleanup) {
            late();
        }
    }

    /// Number of cleanups waiting for a replay.
    pub fn len(&self) -> usize {
        self.inner.lock().cleanups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores the cleanup while held; hands it back when it must run now.
    pub(crate) fn hold(&self, cleanup: Cleanup) -> Option<Cleanup> {
        let mut state = self.inner.lock();
        match state.phase {
            SlotPhase::Held => {
                state.cleanups.push(cleanup);
                None
            }
            SlotPhase::Replayed => Some(cleanup),
            SlotPhase::Discarded => None,
        }
    }

    pub(crate) fn replay(&self) -> Vec<Cleanup> {
        let mut state = self.inner.lock();
        state.phase = SlotPhase::Replayed;
        std::mem::take(&mut state.cleanups)
    }

    pub(crate) fn discard(&self) {
        let dropped = {
            let mut state = self.inner.lock();
            state.phase = SlotPhase::Discarded;
            std::mem::take(&mut state.cleanups)
        };
        drop(dropped);
    }
}

impl fmt::Debug for DeferredCleanups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("DeferredCleanups")
            .field("phase", &state.phase)
            .field("pending", &state.cleanups.len())
            .finish()
    }
}

pub(crate) fn report(step: &StepId, hook_type: HookType, details: String) {
    let error = WorkflowError::HookError {
        step_name: step.clone(),
        hook_type,
        details,
    };
    warn!("{}", error);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Runs a lifecycle hook, isolating errors and panics.
pub(crate) fn run_hook(step: &StepId, hook_type: HookType, hook: Hook) -> Option<HookOutput> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            report(step, hook_type, e.to_string());
            None
        }
        Err(payload) => {
            report(step, hook_type, panic_message(payload.as_ref()));
            None
        }
    }
}

/// Runs an effect body, isolating errors and panics.
pub(crate) fn run_effect(
    step: &StepId,
    effect: impl FnOnce() -> Result<Option<Cleanup>, WorkflowError>,
) -> Option<Cleanup> {
    match catch_unwind(AssertUnwindSafe(effect)) {
        Ok(Ok(cleanup)) => cleanup,
        Ok(Err(e)) => {
            report(step, HookType::Effect, e.to_string());
            None
        }
        Err(payload) => {
            report(step, HookType::Effect, panic_message(payload.as_ref()));
            None
        }
    }
}

pub(crate) fn run_cleanup(step: &StepId, cleanup: Cleanup) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(cleanup)) {
        report(step, HookType::Cleanup, panic_message(payload.as_ref()));
    }
}

pub(crate) fn run_cleanups(step: &StepId, cleanups: Vec<Cleanup>) {
    for cleanup in cleanups {
        run_cleanup(step, cleanup);
    }
}

/// Drives a deferred hook on the ambient tokio runtime.
///
/// `settle` receives the resolved cleanup and decides whether to keep it or
/// run it; failures, panics and timeouts are reported and dropped.
pub(crate) fn spawn_deferred(
    step: StepId,
    hook_type: HookType,
    future: HookFuture,
    limit: Option<Duration>,
    settle: impl FnOnce(Cleanup) + Send + 'static,
) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            report(
                &step,
                hook_type,
                "deferred hook requires a tokio runtime".to_string(),
            );
            return;
        }
    };

    handle.spawn(async move {
        let guarded = AssertUnwindSafe(future).catch_unwind();
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    report(&step, hook_type, format!("timed out after {:?}", limit));
                    return;
                }
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(Some(cleanup))) => settle(cleanup),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => report(&step, hook_type, e.to_string()),
            Err(payload) => report(&step, hook_type, panic_message(payload.as_ref())),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Cleanup) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = Arc::clone(&count);
            move || {
                let count = Arc::clone(&count);
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }) as Cleanup
            }
        };
        (count, make)
    }

    #[test]
    fn test_slot_holds_then_replays() {
        let (count, make) = counter();
        let slot = DeferredCleanups::new();
        slot.push(make());
        slot.push(make());
        assert_eq!(slot.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for cleanup in slot.replay() {
            cleanup();
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(slot.is_empty());

        // Late arrivals run immediately once replayed.
        slot.push(make());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_discarded_slot_drops_cleanups() {
        let (count, make) = counter();
        let slot = DeferredCleanups::new();
        slot.push(make());
        slot.discard();
        slot.push(make());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(slot.replay().is_empty());
    }

    #[test]
    fn test_run_hook_isolates_errors_and_panics() {
        let step = StepId::new("a:a");
        let failed = run_hook(
            &step,
            HookType::TransitionIn,
            Box::new(|| Err(WorkflowError::Configuration("boom".to_string()))),
        );
        assert!(failed.is_none());

        let panicked = run_hook(
            &step,
            HookType::TransitionOut,
            Box::new(|| -> Result<HookOutput, WorkflowError> { panic!("boom") }),
        );
        assert!(panicked.is_none());

        let fine = run_hook(&step, HookType::TransitionIn, Box::new(|| Ok(HookOutput::None)));
        assert!(matches!(fine, Some(HookOutput::None)));
    }

    #[test]
    fn test_run_cleanup_survives_panic() {
        let step = StepId::new("a:a");
        let (count, make) = counter();
        let first: Cleanup = Box::new(|| panic!("first"));
        run_cleanups(&step, vec![first, make()]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_deferred_outside_runtime_never_settles() {
        let settled = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&settled);
        spawn_deferred(
            StepId::new("a:a"),
            HookType::TransitionIn,
            async { Ok(None) }.boxed(),
            None,
            move |_| {
                flag.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(settled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spawn_deferred_settles() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (count, make) = counter();
        let cleanup = make();
        spawn_deferred(
            StepId::new("a:a"),
            HookType::TransitionIn,
            async move { Ok(Some(cleanup)) }.boxed(),
            None,
            move |cleanup| {
                cleanup();
                let _ = tx.send(());
            },
        );
        rx.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_deferred_times_out() {
        let settled = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&settled);
        spawn_deferred(
            StepId::new("a:a"),
            HookType::TransitionIn,
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }
            .boxed(),
            Some(Duration::from_millis(10)),
            move |_| {
                flag.fetch_add(1, Ordering::SeqCst);
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(settled.load(Ordering::SeqCst), 0);
    }
}
