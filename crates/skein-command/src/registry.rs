#![forbid(unsafe_code)]

//! Identifier-to-handler registry, including multi-command aggregation.
//!
//! The registry enforces identifier uniqueness for single commands. A
//! *multi-command* relaxes that: one identifier backed by several
//! interchangeable implementations, selected at call time by priority and
//! an optional predicate. Registering the first implementation creates the
//! aggregate entry; disposing the last one removes it.
//!
//! # Invariants
//!
//! 1. An identifier maps to at most one entry: a single command or one
//!    aggregate.
//! 2. Implementations of an aggregate are kept sorted by descending
//!    priority, ties in registration order.
//! 3. An aggregate entry never outlives its last implementation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;

use skein_scope::{Accessor, Disposable};

use crate::command::{Command, CommandKind, ExecutionOptions, HandlerOutput};
use crate::error::CommandError;

/// One implementation of a multi-command.
pub struct MultiImplementation {
    command: Command,
    priority: u16,
    predicate: Option<Rc<dyn Fn(&Accessor) -> bool>>,
}

impl MultiImplementation {
    /// Wrap a command as a multi-command implementation with default
    /// priority and no predicate.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            priority: 0,
            predicate: None,
        }
    }

    /// Set the selection priority (higher wins).
    #[must_use]
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict selection to calls where `predicate` passes.
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&Accessor) -> bool + 'static) -> Self {
        self.predicate = Some(Rc::new(predicate));
        self
    }

    fn id(&self) -> &str {
        self.command.id()
    }
}

impl std::fmt::Debug for MultiImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiImplementation")
            .field("id", &self.command.id())
            .field("priority", &self.priority)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

struct RankedImplementation {
    seq: u64,
    priority: u16,
    predicate: Option<Rc<dyn Fn(&Accessor) -> bool>>,
    command: Command,
}

/// An aggregate entry: several handlers behind one identifier.
pub struct MultiCommand {
    id: String,
    implementations: RefCell<Vec<RankedImplementation>>,
    next_seq: Cell<u64>,
}

impl MultiCommand {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            implementations: RefCell::new(Vec::new()),
            next_seq: Cell::new(0),
        }
    }

    /// Whether any implementation is still registered.
    #[must_use]
    pub fn has_implementations(&self) -> bool {
        !self.implementations.borrow().is_empty()
    }

    /// Append an implementation, keeping the list sorted by descending
    /// priority (ties keep registration order). Returns its sequence
    /// token.
    fn add(&self, item: MultiImplementation) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let ranked = RankedImplementation {
            seq,
            priority: item.priority,
            predicate: item.predicate,
            command: item.command,
        };
        let mut implementations = self.implementations.borrow_mut();
        let pos = implementations
            .iter()
            .position(|existing| existing.priority < ranked.priority)
            .unwrap_or(implementations.len());
        implementations.insert(pos, ranked);
        seq
    }

    fn remove(&self, seq: u64) {
        self.implementations
            .borrow_mut()
            .retain(|imp| imp.seq != seq);
    }

    /// Select and run the first eligible implementation.
    ///
    /// Eligible means highest priority whose predicate passes (no
    /// predicate is always eligible). With none eligible the call resolves
    /// to `false` without invoking any handler.
    pub fn invoke(
        &self,
        accessor: &Accessor,
        params: Option<&Value>,
        options: &ExecutionOptions,
    ) -> HandlerOutput {
        let chosen = {
            let implementations = self.implementations.borrow();
            implementations
                .iter()
                .find(|imp| imp.predicate.as_ref().is_none_or(|p| p(accessor)))
                .map(|imp| imp.command.clone())
        };
        match chosen {
            Some(command) => command.invoke(accessor, params, options),
            None => {
                tracing::debug!(command = %self.id, "no eligible multi-command implementation");
                HandlerOutput::declined()
            }
        }
    }
}

impl std::fmt::Debug for MultiCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCommand")
            .field("id", &self.id)
            .field("implementations", &self.implementations.borrow().len())
            .finish()
    }
}

/// A resolved registry entry, ready to dispatch.
#[derive(Clone)]
pub(crate) enum RegistryEntry {
    Single(Command),
    Multi(Rc<MultiCommand>),
}

impl RegistryEntry {
    pub(crate) fn kind(&self) -> CommandKind {
        match self {
            Self::Single(command) => command.kind(),
            // Aggregates orchestrate; they are never mutations themselves.
            Self::Multi(_) => CommandKind::Command,
        }
    }

    pub(crate) fn invoke(
        &self,
        accessor: &Accessor,
        params: Option<&Value>,
        options: &ExecutionOptions,
    ) -> HandlerOutput {
        match self {
            Self::Single(command) => command.invoke(accessor, params, options),
            Self::Multi(multi) => multi.invoke(accessor, params, options),
        }
    }
}

/// Maps identifiers to commands. Cheap-clone handle over shared state so
/// registration disposers can outlive the borrow they were created under.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    entries: Rc<RefCell<AHashMap<String, RegistryEntry>>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any entry exists for `id`.
    #[must_use]
    pub fn has_command(&self, id: &str) -> bool {
        self.entries.borrow().contains_key(id)
    }

    /// Register a single command. Fails when the identifier is taken.
    /// The returned disposer unregisters it.
    pub fn register(&self, command: Command) -> Result<Disposable, CommandError> {
        let id = command.id().to_owned();
        {
            let mut entries = self.entries.borrow_mut();
            if entries.contains_key(&id) {
                return Err(CommandError::DuplicateCommand(id));
            }
            entries.insert(id.clone(), RegistryEntry::Single(command));
        }
        tracing::trace!(command = %id, "registered command");
        let entries = Rc::clone(&self.entries);
        Ok(Disposable::new(move || {
            entries.borrow_mut().remove(&id);
        }))
    }

    /// Register one implementation of a multi-command, creating the
    /// aggregate entry on first registration. Fails when the identifier is
    /// held by a single command. Disposing the last implementation removes
    /// the aggregate.
    pub fn register_multi(
        &self,
        item: MultiImplementation,
    ) -> Result<Disposable, CommandError> {
        let id = item.id().to_owned();
        let multi = {
            let mut entries = self.entries.borrow_mut();
            match entries.get(&id) {
                Some(RegistryEntry::Single(_)) => {
                    return Err(CommandError::SingleAlreadyRegistered(id));
                }
                Some(RegistryEntry::Multi(multi)) => Rc::clone(multi),
                None => {
                    let multi = Rc::new(MultiCommand::new(id.clone()));
                    entries.insert(id.clone(), RegistryEntry::Multi(Rc::clone(&multi)));
                    multi
                }
            }
        };
        let seq = multi.add(item);
        tracing::trace!(command = %id, seq, "registered multi-command implementation");

        let entries = Rc::clone(&self.entries);
        Ok(Disposable::new(move || {
            multi.remove(seq);
            if !multi.has_implementations() {
                entries.borrow_mut().remove(&id);
            }
        }))
    }

    pub(crate) fn get(&self, id: &str) -> Option<RegistryEntry> {
        self.entries.borrow().get(id).cloned()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}
