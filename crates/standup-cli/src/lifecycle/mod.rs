//! Lifecycle commands for the demo stack.
//!
//! - [`types`] defines the command models and IO helpers.
//! - [`error`] captures the error surface exposed to the CLI.
//! - [`controller`] implements the start/stop/status flows.

mod controller;
mod error;
mod types;

pub(crate) use controller::SystemLifecycle;
pub(crate) use error::LifecycleError;
pub(crate) use types::{LifecycleInvocation, LifecycleOutput};
