#![forbid(unsafe_code)]

//! Typed service identifiers.
//!
//! A [`ServiceId<T>`] names a dependency while carrying the resolved type as
//! a phantom parameter, so `get` calls downcast without turbofish noise at
//! the call site. By convention names are namespaced
//! (`<namespace>.<name>`), but the convention is not enforced.

use std::marker::PhantomData;

/// A typed identifier for a dependency.
///
/// Equality and hashing use the name only; the type parameter exists so
/// resolution sites know what to downcast to. Two ids with the same name
/// but different types refer to the same provider slot, and resolving
/// through the wrong one fails with
/// [`ScopeError::TypeMismatch`](crate::ScopeError::TypeMismatch).
pub struct ServiceId<T: ?Sized> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> ServiceId<T> {
    /// Create an identifier with the given name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The identifier's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: ?Sized> Clone for ServiceId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for ServiceId<T> {}

impl<T: ?Sized> PartialEq for ServiceId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T: ?Sized> Eq for ServiceId<T> {}

impl<T: ?Sized> std::hash::Hash for ServiceId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T: ?Sized> std::fmt::Debug for ServiceId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServiceId").field(&self.name).finish()
    }
}

impl<T: ?Sized> std::fmt::Display for ServiceId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}
