#![forbid(unsafe_code)]

//! RAII disposal guards.
//!
//! Registration-style APIs in this workspace hand back a [`Disposable`]
//! that undoes the registration when dropped, mirroring how subscriptions
//! are released elsewhere in the stack. [`DisposableCollection`] batches
//! guards for a logical scope and releases them in reverse order.
//!
//! # Invariants
//!
//! 1. The wrapped closure runs exactly once, whether via `dispose()` or
//!    drop.
//! 2. `DisposableCollection` disposes in reverse registration order.

/// A guard that runs a cleanup closure exactly once.
pub struct Disposable {
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl Disposable {
    /// Wrap a cleanup closure.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(f)),
        }
    }

    /// A no-op guard.
    #[must_use]
    pub fn noop() -> Self {
        Self { cleanup: None }
    }

    /// Run the cleanup now instead of at drop. Idempotent.
    pub fn dispose(mut self) {
        if let Some(f) = self.cleanup.take() {
            f();
        }
    }

    /// Whether the cleanup has already run (or never existed).
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cleanup.is_none()
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        if let Some(f) = self.cleanup.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Owns a set of [`Disposable`]s, releasing them in reverse order on drop.
#[derive(Default)]
pub struct DisposableCollection {
    guards: Vec<Disposable>,
}

impl DisposableCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a guard to the collection.
    pub fn add(&mut self, guard: Disposable) {
        self.guards.push(guard);
    }

    /// Number of held guards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether the collection holds no guards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Dispose everything now, in reverse registration order.
    pub fn dispose(&mut self) {
        while let Some(guard) = self.guards.pop() {
            guard.dispose();
        }
    }
}

impl Drop for DisposableCollection {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DisposableCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposableCollection")
            .field("len", &self.guards.len())
            .finish()
    }
}
