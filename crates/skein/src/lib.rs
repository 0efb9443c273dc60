#![forbid(unsafe_code)]

//! Skein: dependency scopes and command dispatch for reactive terminal
//! UIs.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`scope`]: dependency container with parent/child scoping, plus
//!   ambient-context publication so services are reachable anywhere
//!   inside a UI scope.
//! - [`command`]: string-identified commands with before/after listeners,
//!   multi-command aggregation, and synchronous/asynchronous dispatch.
//!
//! # Quick start
//!
//! ```
//! use skein::command::{COMMAND_SERVICE, Command, CommandKind, CommandService, ExecutionOptions, HandlerOutput};
//! use skein::scope::{Dependency, provide_dependencies, use_dependency};
//!
//! let _scope = provide_dependencies(vec![Dependency::factory(
//!     COMMAND_SERVICE,
//!     |accessor| CommandService::new(accessor.injector().clone()),
//! )])
//! .unwrap();
//!
//! let service = use_dependency(&COMMAND_SERVICE).unwrap();
//! let _greet = service
//!     .register(Command::new("app.command.greet", CommandKind::Command, |_, _, _| {
//!         HandlerOutput::success()
//!     }))
//!     .unwrap();
//!
//! let result = service
//!     .execute_sync("app.command.greet", None, &ExecutionOptions::new())
//!     .unwrap();
//! assert_eq!(result.as_bool(), Some(true));
//! ```

pub use skein_command as command;
pub use skein_scope as scope;
