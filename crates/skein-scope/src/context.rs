#![forbid(unsafe_code)]

//! Ambient injector context.
//!
//! Makes an [`Injector`] reachable from any code nested inside a UI scope
//! without threading it through every call, the way a component framework's
//! provide/inject mechanism does. The ambient context is a thread-local
//! stack of injectors; publishing is an RAII affair:
//!
//! - [`provide_dependencies`] creates a root injector when no ambient one
//!   exists, or a child of the nearest ambient injector otherwise, and
//!   publishes it. Dropping the returned [`ScopeHandle`] unpublishes and
//!   disposes the owned injector (the unmount path).
//! - [`provide_injector`] publishes an existing injector without taking
//!   ownership; dropping the handle only unpublishes.
//! - [`use_injector`] / [`use_dependency`] resolve against the nearest
//!   ambient injector and fail with [`ScopeError::OutsideContext`] when
//!   none is published.
//!
//! # Invariants
//!
//! 1. Handles unpublish exactly their own injector, so out-of-order drops
//!    cannot unpublish a sibling scope.
//! 2. An owned injector is disposed after it is unpublished, never while
//!    still reachable.
//! 3. The context is thread-local; scopes on other threads are invisible.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ScopeError;
use crate::ident::ServiceId;
use crate::injector::{Dependency, Injector};

thread_local! {
    static AMBIENT: RefCell<Vec<Injector>> = const { RefCell::new(Vec::new()) };
}

/// RAII handle for a published scope. Unpublishes on drop; disposes the
/// injector too if this handle created it.
pub struct ScopeHandle {
    injector: Injector,
    owned: bool,
}

impl ScopeHandle {
    /// The injector this scope published.
    #[must_use]
    pub fn injector(&self) -> &Injector {
        &self.injector
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        AMBIENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|i| i.ptr_eq(&self.injector)) {
                stack.remove(pos);
            }
        });
        if self.owned {
            self.injector.dispose();
        }
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("owned", &self.owned)
            .finish()
    }
}

/// Publish a new scope built from `deps`.
///
/// With no ambient injector this creates a root; otherwise a child of the
/// nearest ambient injector, so lookups fall back to enclosing scopes.
/// Fails only when the ambient injector is already disposed.
pub fn provide_dependencies(deps: Vec<Dependency>) -> Result<ScopeHandle, ScopeError> {
    let injector = match current_injector() {
        None => {
            tracing::debug!(providers = deps.len(), "publishing root scope");
            Injector::new(deps)
        }
        Some(ambient) => {
            tracing::debug!(providers = deps.len(), "publishing child scope");
            ambient.create_child(deps)?
        }
    };
    publish(injector.clone());
    Ok(ScopeHandle {
        injector,
        owned: true,
    })
}

/// Publish an existing injector without taking ownership of its lifetime.
pub fn provide_injector(injector: &Injector) -> ScopeHandle {
    publish(injector.clone());
    ScopeHandle {
        injector: injector.clone(),
        owned: false,
    }
}

fn publish(injector: Injector) {
    AMBIENT.with(|stack| stack.borrow_mut().push(injector));
}

/// The nearest ambient injector, if any scope is published.
#[must_use]
pub fn current_injector() -> Option<Injector> {
    AMBIENT.with(|stack| stack.borrow().last().cloned())
}

/// The nearest ambient injector, failing outside any published scope.
pub fn use_injector() -> Result<Injector, ScopeError> {
    current_injector().ok_or(ScopeError::OutsideContext)
}

/// Resolve a dependency from the nearest ambient injector.
pub fn use_dependency<T: 'static>(id: &ServiceId<T>) -> Result<Rc<T>, ScopeError> {
    use_injector()?.get(id)
}

/// Resolve an optional dependency from the nearest ambient injector.
pub fn use_dependency_optional<T: 'static>(
    id: &ServiceId<T>,
) -> Result<Option<Rc<T>>, ScopeError> {
    use_injector()?.get_optional(id)
}

/// Resolve all providers for `id` from the nearest ambient injector.
pub fn use_all_dependencies<T: 'static>(id: &ServiceId<T>) -> Result<Vec<Rc<T>>, ScopeError> {
    use_injector()?.get_all(id)
}
