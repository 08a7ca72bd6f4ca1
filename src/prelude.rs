//! Commonly used types and traits

pub use crate::api::StepApi;
pub use crate::context::{NextHandle, StepContext};
pub use crate::effect::Deps;
pub use crate::error::WorkflowError;
pub use crate::hooks::{Cleanup, HookOutput};
pub use crate::schema::{self, Schema};
pub use crate::step::{StepDefinition, StepInstance};
pub use crate::workflow::{Status, Workflow};
