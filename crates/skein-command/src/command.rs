#![forbid(unsafe_code)]

//! Command descriptors, execution records, and options.
//!
//! A [`Command`] pairs a string identifier with a handler closure. The
//! identifier convention is `<namespace>.<kind>.<name>`
//! (e.g. `auth.command.sign-in`); the convention aids log grepping and
//! collaboration filtering but is not enforced anywhere.
//!
//! Handlers receive the container's [`Accessor`] for dependency
//! resolution, optional JSON params, and the caller's
//! [`ExecutionOptions`], and produce a [`HandlerOutput`]: either a ready
//! result or a pending (future) one. The synchronous dispatch path rejects
//! pending outputs.

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use skein_scope::Accessor;

use crate::error::CommandError;

/// What a command does to application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CommandKind {
    /// Orchestrates mutations and operations according to business logic.
    /// A delete-row command, say, generates the delete-row mutation plus
    /// the mutations needed for undo.
    Command,
    /// A change to persisted document state; the smallest unit of conflict
    /// resolution when collaboration is layered on top.
    Mutation,
    /// A change to transient state that is never persisted (scroll
    /// position, sidebar visibility, ...), with no conflict resolution.
    Operation,
}

impl CommandKind {
    /// The identifier-convention token for this kind.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Mutation => "mutation",
            Self::Operation => "operation",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Build a conventional `<namespace>.<kind>.<name>` identifier.
#[must_use]
pub fn command_id(namespace: &str, kind: CommandKind, name: &str) -> String {
    format!("{namespace}.{}.{name}", kind.token())
}

/// The result every handler ultimately produces.
pub type CommandResult = Result<Value, CommandError>;

/// A handler's immediate output: ready, or pending on a local future.
pub enum HandlerOutput {
    /// The handler finished synchronously.
    Ready(CommandResult),
    /// The handler suspended; the dispatch layer awaits this on the async
    /// path and rejects it on the synchronous one.
    Pending(LocalBoxFuture<'static, CommandResult>),
}

impl HandlerOutput {
    /// A ready `true` result, the conventional "command succeeded".
    #[must_use]
    pub fn success() -> Self {
        Self::Ready(Ok(Value::Bool(true)))
    }

    /// A ready `false` result, the conventional "command declined".
    #[must_use]
    pub fn declined() -> Self {
        Self::Ready(Ok(Value::Bool(false)))
    }

    /// A ready value result.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Ready(Ok(value.into()))
    }

    /// A ready error result.
    #[must_use]
    pub fn fail(err: CommandError) -> Self {
        Self::Ready(Err(err))
    }

    /// A pending result awaiting `future`.
    pub fn pending(future: impl Future<Output = CommandResult> + 'static) -> Self {
        Self::Pending(Box::pin(future))
    }

    /// A ready result computed by `f`, so handler bodies can use `?`.
    pub fn try_ready(f: impl FnOnce() -> CommandResult) -> Self {
        Self::Ready(f())
    }
}

impl std::fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Handler closure shared by single and multi commands.
pub type CommandHandler =
    Rc<dyn Fn(&Accessor, Option<&Value>, &ExecutionOptions) -> HandlerOutput>;

/// A named, invokable unit of application behavior.
#[derive(Clone)]
pub struct Command {
    id: String,
    kind: CommandKind,
    handler: CommandHandler,
}

impl Command {
    /// Create a command descriptor.
    pub fn new(
        id: impl Into<String>,
        kind: CommandKind,
        handler: impl Fn(&Accessor, Option<&Value>, &ExecutionOptions) -> HandlerOutput + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            handler: Rc::new(handler),
        }
    }

    /// The command's identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The command's kind.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Run the handler.
    pub fn invoke(
        &self,
        accessor: &Accessor,
        params: Option<&Value>,
        options: &ExecutionOptions,
    ) -> HandlerOutput {
        (self.handler)(accessor, params, options)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// One execution of a command, as seen by listeners and the execution
/// stack.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInfo {
    /// Identifier of the command being executed.
    pub id: String,
    /// Kind of the command, when known at dispatch time.
    pub kind: Option<CommandKind>,
    /// Parameters of this execution.
    pub params: Option<Value>,
}

/// Param key a synchronously-executed mutation receives with the id of the
/// orchestrator command that triggered it.
pub const TRIGGER_PARAM: &str = "trigger";

/// Caller-supplied flags for one execution, passed through to listeners.
///
/// Beyond the recognized flags, arbitrary extra scalar fields ride along
/// uninterpreted; collaboration layers use them to tag replication
/// metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    /// Execute on the local machine only; do not sync to replicas.
    pub only_local: Option<bool>,
    /// The execution originates from a collaboration peer.
    pub from_collab: Option<bool>,
    /// Deprecated changeset flag, kept for wire compatibility.
    #[deprecated(note = "use `from_collab`")]
    pub from_changeset: Option<bool>,
    extra: Vec<(String, Value)>,
}

impl ExecutionOptions {
    /// Options with every flag unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local-only flag.
    #[must_use]
    pub fn only_local(mut self, value: bool) -> Self {
        self.only_local = Some(value);
        self
    }

    /// Set the from-collaboration flag.
    #[must_use]
    pub fn from_collab(mut self, value: bool) -> Self {
        self.from_collab = Some(value);
        self
    }

    /// Attach an extra scalar field, passed through to listeners.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Look up an extra field by key.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// All extra fields, in attachment order.
    pub fn extras(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.extra.iter().map(|(k, v)| (k.as_str(), v))
    }
}
