#![forbid(unsafe_code)]

//! Error type for command registration and execution.

use skein_scope::ScopeError;

/// Errors from the command service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No command is registered under the identifier.
    NotRegistered(String),
    /// The identifier is already registered.
    DuplicateCommand(String),
    /// `register_multi` hit an identifier held by a single command.
    SingleAlreadyRegistered(String),
    /// The same listener handle was registered twice.
    DuplicateListener,
    /// A synchronous call reached a handler that returned a pending value.
    PendingInSyncPath(String),
    /// Policy escape hatch: the async path swallows this and reports
    /// `false` instead of propagating.
    Custom(String),
    /// Dependency resolution or container lifecycle failure.
    Scope(ScopeError),
    /// Handler-reported failure detail.
    Failed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRegistered(id) => write!(f, "command '{id}' is not registered"),
            Self::DuplicateCommand(id) => write!(f, "command '{id}' is already registered"),
            Self::SingleAlreadyRegistered(id) => {
                write!(f, "command '{id}' is already registered as a single command")
            }
            Self::DuplicateListener => write!(f, "could not add the same listener twice"),
            Self::PendingInSyncPath(id) => write!(
                f,
                "command '{id}' returned a pending value on the synchronous path"
            ),
            Self::Custom(msg) => write!(f, "custom execution error: {msg}"),
            Self::Scope(err) => write!(f, "scope error: {err}"),
            Self::Failed(msg) => write!(f, "command failed: {msg}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Scope(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ScopeError> for CommandError {
    fn from(err: ScopeError) -> Self {
        Self::Scope(err)
    }
}
