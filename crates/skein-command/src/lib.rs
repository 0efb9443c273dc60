#![forbid(unsafe_code)]

//! Command registry and dispatch for Skein.
//!
//! Commands are string-identified units of application behavior, split
//! into three kinds: orchestrators ([`CommandKind::Command`]), persisted
//! document changes ([`CommandKind::Mutation`]), and transient changes
//! ([`CommandKind::Operation`]). The [`CommandService`] registers them,
//! fires before/after listeners around each dispatch, and invokes handlers
//! through the dependency container so they can resolve services.
//!
//! Two execution paths share one pipeline: [`CommandService::execute`]
//! awaits handlers that suspend, [`CommandService::execute_sync`] demands
//! an immediate result. See the [`service`] module docs for the pipeline's
//! invariants.

pub mod command;
pub mod error;
pub mod registry;
pub mod service;

pub use command::{
    Command, CommandHandler, CommandInfo, CommandKind, CommandResult, ExecutionOptions,
    HandlerOutput, TRIGGER_PARAM, command_id,
};
pub use error::CommandError;
pub use registry::{CommandRegistry, MultiCommand, MultiImplementation};
pub use service::{COMMAND_SERVICE, CommandListener, CommandService, NIL_COMMAND_ID};
