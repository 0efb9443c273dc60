#![forbid(unsafe_code)]

//! Dependency scopes for Skein.
//!
//! This crate provides the container and context plumbing the rest of the
//! workspace hangs services on:
//!
//! - [`Injector`]: a dependency container with parent/child scoping and
//!   lazy factories.
//! - [`Accessor`]: the read-only resolution handle handlers and factories
//!   receive through [`Injector::invoke`].
//! - [`ServiceId`]: typed, namespaced identifiers.
//! - [`Disposable`] / [`DisposableCollection`]: RAII undo guards returned
//!   by registration APIs.
//! - The [`context`] module: ambient (thread-local) scope publication, so
//!   a container is reachable anywhere inside a UI scope without prop
//!   drilling.
//!
//! Everything here is single-threaded by design (`Rc`/`RefCell`), matching
//! the cooperative event-loop model of the runtime it serves.

pub mod context;
pub mod disposable;
pub mod error;
pub mod ident;
pub mod injector;

pub use context::{
    ScopeHandle, current_injector, provide_dependencies, provide_injector, use_all_dependencies,
    use_dependency, use_dependency_optional, use_injector,
};
pub use disposable::{Disposable, DisposableCollection};
pub use error::ScopeError;
pub use ident::ServiceId;
pub use injector::{Accessor, Dependency, Injector, Lookup};
