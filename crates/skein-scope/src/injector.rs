#![forbid(unsafe_code)]

//! Dependency container with parent/child scoping.
//!
//! An [`Injector`] maps [`ServiceId`] names to providers. Providers are
//! either pre-built values or lazy factories that run at most once, on the
//! first resolution. Child injectors shadow their parents: a lookup
//! consults the local providers first, then walks up the parent chain.
//!
//! `Injector` is a cheap-clone handle over `Rc<RefCell<..>>` for
//! single-threaded shared ownership, the same shape the runtime uses for
//! reactive state. It is not `Send`.
//!
//! # Invariants
//!
//! 1. A factory runs at most once per injector; subsequent lookups return
//!    the cached instance.
//! 2. A factory resolves against the injector that defines it, not the
//!    injector the lookup started from.
//! 3. After `dispose()`, every resolution and invocation fails with
//!    [`ScopeError::Disposed`]; disposal is idempotent.
//! 4. `get_all` returns instances in chain order: local providers first,
//!    then each ancestor's, in registration order within one injector.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Missing provider | id not in chain | `Err(NotProvided)` |
//! | Ambiguous single lookup | >1 local provider for id | `Err(TooMany)` |
//! | Wrong type | id registered under another type | `Err(TypeMismatch)` |
//! | Use after dispose | `dispose()` already ran | `Err(Disposed)` |
//!
//! Circular factories are out of scope: a factory that resolves itself
//! recurses until the stack overflows, as in any service locator without
//! cycle detection.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::ScopeError;
use crate::ident::ServiceId;

/// How a single-instance lookup walks the injector chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    /// Local providers first, then the parent chain.
    #[default]
    Default,
    /// Skip local providers; start the lookup at the parent.
    SkipSelf,
    /// Local providers only; never consult the parent.
    SelfOnly,
}

enum Provider {
    Value(Rc<dyn Any>),
    Factory(Rc<dyn Fn(&Accessor) -> Rc<dyn Any>>),
}

struct Slot {
    provider: Provider,
    resolved: RefCell<Option<Rc<dyn Any>>>,
}

impl Slot {
    /// Resolve against `owner`, the injector this slot is registered in.
    fn resolve(&self, owner: &Injector) -> Rc<dyn Any> {
        if let Some(cached) = self.resolved.borrow().clone() {
            return cached;
        }
        match &self.provider {
            Provider::Value(v) => Rc::clone(v),
            Provider::Factory(f) => {
                let accessor = Accessor {
                    injector: owner.clone(),
                };
                let instance = f(&accessor);
                *self.resolved.borrow_mut() = Some(Rc::clone(&instance));
                instance
            }
        }
    }
}

/// A named provider to seed an [`Injector`] with.
pub struct Dependency {
    name: &'static str,
    provider: Provider,
}

impl Dependency {
    /// Provide a pre-built value.
    pub fn value<T: 'static>(id: ServiceId<T>, value: T) -> Self {
        Self::shared(id, Rc::new(value))
    }

    /// Provide an already-shared instance.
    pub fn shared<T: 'static>(id: ServiceId<T>, value: Rc<T>) -> Self {
        Self {
            name: id.name(),
            provider: Provider::Value(value),
        }
    }

    /// Provide a lazy factory, run at most once on first resolution.
    ///
    /// The factory receives an [`Accessor`] for the injector it is
    /// registered in, so it can resolve its own dependencies.
    pub fn factory<T: 'static>(
        id: ServiceId<T>,
        f: impl Fn(&Accessor) -> T + 'static,
    ) -> Self {
        Self {
            name: id.name(),
            provider: Provider::Factory(Rc::new(move |accessor| Rc::new(f(accessor)))),
        }
    }

    /// The provider's identifier name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.provider {
            Provider::Value(_) => "value",
            Provider::Factory(_) => "factory",
        };
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("provider", &kind)
            .finish()
    }
}

struct Inner {
    parent: Option<Injector>,
    slots: AHashMap<&'static str, Vec<Rc<Slot>>>,
    disposed: bool,
}

/// A dependency injector with parent/child scoping.
pub struct Injector {
    inner: Rc<RefCell<Inner>>,
}

impl Clone for Injector {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Injector {
    /// Create a root injector from a dependency list.
    #[must_use]
    pub fn new(deps: Vec<Dependency>) -> Self {
        Self::with_parent(deps, None)
    }

    fn with_parent(deps: Vec<Dependency>, parent: Option<Injector>) -> Self {
        let mut slots: AHashMap<&'static str, Vec<Rc<Slot>>> = AHashMap::new();
        for dep in deps {
            slots.entry(dep.name).or_default().push(Rc::new(Slot {
                provider: dep.provider,
                resolved: RefCell::new(None),
            }));
        }
        Self {
            inner: Rc::new(RefCell::new(Inner {
                parent,
                slots,
                disposed: false,
            })),
        }
    }

    /// Create a child injector scoped to this one.
    ///
    /// Lookups in the child fall back to this injector's chain. Disposing
    /// the child does not affect the parent.
    pub fn create_child(&self, deps: Vec<Dependency>) -> Result<Injector, ScopeError> {
        if self.is_disposed() {
            return Err(ScopeError::Disposed);
        }
        tracing::trace!("creating child injector");
        Ok(Self::with_parent(deps, Some(self.clone())))
    }

    /// Whether `dispose()` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Whether two handles refer to the same injector.
    #[must_use]
    pub fn ptr_eq(&self, other: &Injector) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve a single instance, consulting the parent chain.
    pub fn get<T: 'static>(&self, id: &ServiceId<T>) -> Result<Rc<T>, ScopeError> {
        self.get_with(id, Lookup::Default)
    }

    /// Resolve a single instance with an explicit chain-walk strategy.
    pub fn get_with<T: 'static>(
        &self,
        id: &ServiceId<T>,
        lookup: Lookup,
    ) -> Result<Rc<T>, ScopeError> {
        match self.get_optional_with(id, lookup)? {
            Some(instance) => Ok(instance),
            None => Err(ScopeError::NotProvided(id.name().to_owned())),
        }
    }

    /// Resolve a single instance, or `None` when no provider exists.
    pub fn get_optional<T: 'static>(
        &self,
        id: &ServiceId<T>,
    ) -> Result<Option<Rc<T>>, ScopeError> {
        self.get_optional_with(id, Lookup::Default)
    }

    /// `get_optional` with an explicit chain-walk strategy.
    pub fn get_optional_with<T: 'static>(
        &self,
        id: &ServiceId<T>,
        lookup: Lookup,
    ) -> Result<Option<Rc<T>>, ScopeError> {
        match self.resolve_raw(id.name(), lookup)? {
            Some(raw) => raw
                .downcast::<T>()
                .map(Some)
                .map_err(|_| ScopeError::TypeMismatch(id.name().to_owned())),
            None => Ok(None),
        }
    }

    /// Resolve every provider for `id` along the chain, local first.
    pub fn get_all<T: 'static>(&self, id: &ServiceId<T>) -> Result<Vec<Rc<T>>, ScopeError> {
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(injector) = current {
            for raw in injector.resolve_local_all(id.name())? {
                let instance = raw
                    .downcast::<T>()
                    .map_err(|_| ScopeError::TypeMismatch(id.name().to_owned()))?;
                out.push(instance);
            }
            current = injector.inner.borrow().parent.clone();
        }
        Ok(out)
    }

    /// Run `f` with an [`Accessor`] over this injector.
    ///
    /// This is the invocation helper dispatch layers route handlers
    /// through: the handler sees only the resolution surface, not the
    /// container's lifecycle.
    pub fn invoke<R>(&self, f: impl FnOnce(&Accessor) -> R) -> Result<R, ScopeError> {
        if self.is_disposed() {
            return Err(ScopeError::Disposed);
        }
        let accessor = Accessor {
            injector: self.clone(),
        };
        Ok(f(&accessor))
    }

    /// Dispose the injector: drop all providers and refuse further use.
    ///
    /// Idempotent. Children keep working for their own local providers but
    /// lose the fallback chain (parent lookups report `Disposed`).
    pub fn dispose(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return;
        }
        tracing::trace!("disposing injector");
        inner.disposed = true;
        inner.slots.clear();
        inner.parent = None;
    }

    /// Single-instance raw resolution per the lookup strategy.
    fn resolve_raw(
        &self,
        name: &'static str,
        lookup: Lookup,
    ) -> Result<Option<Rc<dyn Any>>, ScopeError> {
        if self.is_disposed() {
            return Err(ScopeError::Disposed);
        }
        match lookup {
            Lookup::SelfOnly => self.resolve_local_single(name),
            Lookup::SkipSelf => match self.parent() {
                Some(parent) => parent.resolve_raw(name, Lookup::Default),
                None => Ok(None),
            },
            Lookup::Default => {
                if let Some(found) = self.resolve_local_single(name)? {
                    return Ok(Some(found));
                }
                match self.parent() {
                    Some(parent) => parent.resolve_raw(name, Lookup::Default),
                    None => Ok(None),
                }
            }
        }
    }

    fn parent(&self) -> Option<Injector> {
        self.inner.borrow().parent.clone()
    }

    /// The local slot for `name`, erroring when the id is ambiguous here.
    fn resolve_local_single(
        &self,
        name: &'static str,
    ) -> Result<Option<Rc<dyn Any>>, ScopeError> {
        // Clone the slot handle out so no Inner borrow is held while a
        // factory runs (factories may resolve through this injector).
        let slot = {
            let inner = self.inner.borrow();
            match inner.slots.get(name) {
                None => return Ok(None),
                Some(slots) if slots.len() > 1 => {
                    return Err(ScopeError::TooMany(name.to_owned()));
                }
                Some(slots) => Rc::clone(&slots[0]),
            }
        };
        Ok(Some(slot.resolve(self)))
    }

    fn resolve_local_all(&self, name: &'static str) -> Result<Vec<Rc<dyn Any>>, ScopeError> {
        if self.is_disposed() {
            return Err(ScopeError::Disposed);
        }
        let slots: Vec<Rc<Slot>> = {
            let inner = self.inner.borrow();
            inner.slots.get(name).cloned().unwrap_or_default()
        };
        Ok(slots.iter().map(|slot| slot.resolve(self)).collect())
    }
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Injector")
            .field("providers", &inner.slots.len())
            .field("has_parent", &inner.parent.is_some())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

/// Read-only resolution handle passed to factories and invoked handlers.
pub struct Accessor {
    injector: Injector,
}

impl Accessor {
    /// Resolve a single instance.
    pub fn get<T: 'static>(&self, id: &ServiceId<T>) -> Result<Rc<T>, ScopeError> {
        self.injector.get(id)
    }

    /// Resolve a single instance, or `None` when no provider exists.
    pub fn get_optional<T: 'static>(
        &self,
        id: &ServiceId<T>,
    ) -> Result<Option<Rc<T>>, ScopeError> {
        self.injector.get_optional(id)
    }

    /// Resolve every provider for `id` along the chain.
    pub fn get_all<T: 'static>(&self, id: &ServiceId<T>) -> Result<Vec<Rc<T>>, ScopeError> {
        self.injector.get_all(id)
    }

    /// The underlying injector. Lets factories wire services that need the
    /// container itself (a dispatch service routing handlers back through
    /// `invoke`, say).
    #[must_use]
    pub fn injector(&self) -> &Injector {
        &self.injector
    }
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Config {
        retries: u32,
    }

    #[derive(Debug)]
    struct Client {
        retries: u32,
    }

    const CONFIG: ServiceId<Config> = ServiceId::new("test.config");
    const CLIENT: ServiceId<Client> = ServiceId::new("test.client");

    #[test]
    fn value_round_trip() {
        let injector = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 3 })]);
        let config = injector.get(&CONFIG).unwrap();
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn missing_provider_is_not_provided() {
        let injector = Injector::new(Vec::new());
        assert_eq!(
            injector.get(&CONFIG).unwrap_err(),
            ScopeError::NotProvided("test.config".into())
        );
        assert_eq!(injector.get_optional(&CONFIG).unwrap(), None);
    }

    #[test]
    fn factory_runs_lazily_and_once() {
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        let injector = Injector::new(vec![Dependency::factory(CONFIG, move |_| {
            r.set(r.get() + 1);
            Config { retries: 7 }
        })]);
        assert_eq!(runs.get(), 0, "factory must not run before first get");

        let a = injector.get(&CONFIG).unwrap();
        let b = injector.get(&CONFIG).unwrap();
        assert_eq!(runs.get(), 1, "factory must run exactly once");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn factory_resolves_its_own_dependencies() {
        let injector = Injector::new(vec![
            Dependency::value(CONFIG, Config { retries: 5 }),
            Dependency::factory(CLIENT, |accessor| {
                let config = accessor.get(&CONFIG).unwrap();
                Client {
                    retries: config.retries,
                }
            }),
        ]);
        assert_eq!(injector.get(&CLIENT).unwrap().retries, 5);
    }

    #[test]
    fn child_falls_back_to_parent() {
        let parent = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        let child = parent.create_child(Vec::new()).unwrap();
        assert_eq!(child.get(&CONFIG).unwrap().retries, 1);
    }

    #[test]
    fn child_shadows_parent() {
        let parent = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        let child = parent
            .create_child(vec![Dependency::value(CONFIG, Config { retries: 2 })])
            .unwrap();
        assert_eq!(child.get(&CONFIG).unwrap().retries, 2);
        assert_eq!(parent.get(&CONFIG).unwrap().retries, 1);
    }

    #[test]
    fn skip_self_starts_at_parent() {
        let parent = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        let child = parent
            .create_child(vec![Dependency::value(CONFIG, Config { retries: 2 })])
            .unwrap();
        let resolved = child.get_with(&CONFIG, Lookup::SkipSelf).unwrap();
        assert_eq!(resolved.retries, 1);
    }

    #[test]
    fn self_only_ignores_parent() {
        let parent = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        let child = parent.create_child(Vec::new()).unwrap();
        assert_eq!(
            child.get_with(&CONFIG, Lookup::SelfOnly).unwrap_err(),
            ScopeError::NotProvided("test.config".into())
        );
    }

    #[test]
    fn get_all_collects_chain_local_first() {
        let parent = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        let child = parent
            .create_child(vec![Dependency::value(CONFIG, Config { retries: 2 })])
            .unwrap();
        let all = child.get_all(&CONFIG).unwrap();
        let retries: Vec<u32> = all.iter().map(|c| c.retries).collect();
        assert_eq!(retries, vec![2, 1]);
    }

    #[test]
    fn ambiguous_single_lookup_fails() {
        let injector = Injector::new(vec![
            Dependency::value(CONFIG, Config { retries: 1 }),
            Dependency::value(CONFIG, Config { retries: 2 }),
        ]);
        assert_eq!(
            injector.get(&CONFIG).unwrap_err(),
            ScopeError::TooMany("test.config".into())
        );
        assert_eq!(injector.get_all(&CONFIG).unwrap().len(), 2);
    }

    #[test]
    fn type_mismatch_is_reported() {
        // Same name registered under a different type.
        let other: ServiceId<Client> = ServiceId::new("test.config");
        let injector = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        assert_eq!(
            injector.get(&other).unwrap_err(),
            ScopeError::TypeMismatch("test.config".into())
        );
    }

    #[test]
    fn dispose_blocks_resolution_and_invocation() {
        let injector = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        injector.dispose();
        assert!(injector.is_disposed());
        assert_eq!(injector.get(&CONFIG).unwrap_err(), ScopeError::Disposed);
        assert_eq!(
            injector.invoke(|_| ()).unwrap_err(),
            ScopeError::Disposed
        );
        assert!(injector.create_child(Vec::new()).is_err());
        // Idempotent.
        injector.dispose();
    }

    #[test]
    fn child_survives_locally_after_parent_dispose() {
        let parent = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 1 })]);
        let child = parent
            .create_child(vec![Dependency::value(CLIENT, Client { retries: 9 })])
            .unwrap();
        parent.dispose();
        assert_eq!(child.get(&CLIENT).unwrap().retries, 9);
        assert_eq!(child.get(&CONFIG).unwrap_err(), ScopeError::Disposed);
    }

    #[test]
    fn invoke_passes_an_accessor() {
        let injector = Injector::new(vec![Dependency::value(CONFIG, Config { retries: 4 })]);
        let retries = injector
            .invoke(|accessor| accessor.get(&CONFIG).unwrap().retries)
            .unwrap();
        assert_eq!(retries, 4);
    }

    #[test]
    fn clone_is_shared_state() {
        let injector = Injector::new(Vec::new());
        let alias = injector.clone();
        assert!(injector.ptr_eq(&alias));
        alias.dispose();
        assert!(injector.is_disposed());
    }
}
