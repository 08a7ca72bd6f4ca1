//! # Michi (道)
//!
//! A step-graph workflow runtime for Rust.
//!
//! "Michi" (道) means "path" or "way" in Japanese: a workflow is a graph of
//! steps, and the engine walks one path through it, remembering the way back.
//!
//! ## Features
//!
//! - **Step definitions**: reusable blueprints with input, output and config
//!   schemas, a per-instance store and a body that builds the step's API
//! - **Edges**: default, conditional and transforming edges, tried in
//!   declaration order, optionally unidirectional
//! - **Lifecycle hooks**: `transition_in` / `transition_out` hooks returning
//!   cleanups, synchronously or from an async computation
//! - **Effects**: re-run on rebuild according to their dependencies
//! - **History**: `go_back` replays the cleanups recorded when a step was left
//! - **Error Handling**: structured errors with `thiserror`; failing hooks are
//!   logged through `tracing` and never break a transition
//!
//! ## Quick Start
//!
//! ```rust
//! use michi::prelude::*;
//! use serde_json::{json, Value};
//!
//! let ask = StepDefinition::builder("ask")
//!     .output(schema::typed::<String>())
//!     .body(|ctx| {
//!         let next = ctx.next_handle();
//!         StepApi::new().action("answer", move |answer: Value| {
//!             next.next(answer)?;
//!             Ok(Value::Null)
//!         })
//!     });
//! let thank = StepDefinition::builder("thank")
//!     .input(schema::typed::<String>())
//!     .body(|ctx| {
//!         let name = ctx.input().cloned().unwrap_or(Value::Null);
//!         StepApi::new().field("message", json!(format!("thanks, {}", name)))
//!     });
//!
//! let workflow = Workflow::builder()
//!     .step(ask.clone())
//!     .step(thank.clone())
//!     .build()?;
//! let a = ask.create()?;
//! let b = thank.create()?;
//! workflow.register([a.clone(), b.clone()])?;
//! workflow.connect(&a, &b)?;
//!
//! workflow.start(&a)?;
//! workflow.call("answer", json!("Hana"))?;
//!
//! let current = workflow.current_step()?;
//! assert_eq!(current.status, Status::Ready);
//! assert_eq!(current.api.get("message"), Some(&json!("thanks, \"Hana\"")));
//! # Ok::<(), WorkflowError>(())
//! ```
//!
//! ## Going Back
//!
//! A step's `transition_out` cleanup is kept with its history entry and runs
//! when the workflow comes back to it:
//!
//! ```rust
//! use michi::prelude::*;
//! use serde_json::json;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let undone = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&undone);
//! let reserve = StepDefinition::builder("reserve").body(move |ctx| {
//!     let counter = Arc::clone(&counter);
//!     ctx.on_transition_out(move || {
//!         Ok(HookOutput::cleanup(move || {
//!             counter.fetch_add(1, Ordering::SeqCst);
//!         }))
//!     });
//!     StepApi::new()
//! });
//! let pay = StepDefinition::builder("pay").body(|_| StepApi::new());
//!
//! let workflow = Workflow::builder().step(reserve.clone()).step(pay.clone()).build()?;
//! let a = reserve.create()?;
//! let b = pay.create()?;
//! workflow.register([a.clone(), b.clone()])?;
//! workflow.connect(&a, &b)?;
//!
//! workflow.start(&a)?;
//! workflow.next(json!(null))?;
//! workflow.go_back()?;
//!
//! assert_eq!(workflow.current_step()?.id, a.id().clone());
//! assert_eq!(undone.load(Ordering::SeqCst), 1);
//! # Ok::<(), WorkflowError>(())
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use michi::prelude::*;
//! use serde_json::json;
//!
//! # let only = StepDefinition::builder("only").body(|_| StepApi::new());
//! # let workflow = Workflow::builder().step(only.clone()).build()?;
//! # let node = only.create()?;
//! # workflow.register([node.clone()])?;
//! # workflow.start(&node)?;
//! match workflow.go_back() {
//!     Err(WorkflowError::HistoryEmpty) => eprintln!("Nothing to go back to"),
//!     Err(WorkflowError::UnidirectionalBack { from, to }) => {
//!         eprintln!("Cannot go back over {} -> {}", from, to);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//!     Ok(()) => {}
//! }
//! # Ok::<(), WorkflowError>(())
//! ```

mod api;
mod config;
mod context;
mod edge;
mod effect;
mod engine;
mod error;
mod graph;
mod history;
mod hooks;
mod internals;
mod listeners;
mod step;
mod store;
mod workflow;

pub mod prelude;
pub mod schema;

pub use api::{Action, StepApi};
pub use config::WorkflowConfig;
pub use context::{NextHandle, StepContext};
pub use edge::{Edge, EdgeKind, EdgeLabel, Guard, Transform};
pub use effect::Deps;
pub use error::{HookType, WorkflowError};
pub use history::{Arrival, HistoryView};
pub use hooks::{Cleanup, DeferredCleanups, HookFuture, HookOutput};
pub use internals::{
    CurrentSnapshot, EdgeSnapshot, HistorySnapshot, Internals, NodeSnapshot, WorkflowSnapshot,
};
pub use listeners::Subscription;
pub use schema::{Schema, ValidationError, ValidationIssue};
pub use step::{
    Capabilities, StepBody, StepDefinition, StepDefinitionBuilder, StepId, StepInstance, StepKind,
};
pub use store::{Store, StoreFactory};
pub use workflow::{CurrentStep, Status, StepChange, Workflow, WorkflowBuilder};
