#![forbid(unsafe_code)]

//! Error type for scope and resolution failures.

/// Errors from dependency resolution and scope lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// No provider for the identifier in this injector or its parents.
    NotProvided(String),
    /// A single-instance lookup matched more than one provider.
    TooMany(String),
    /// A provider exists but its instance is not of the requested type.
    TypeMismatch(String),
    /// The injector has been disposed.
    Disposed,
    /// An ambient-context hook was called outside any provided scope.
    OutsideContext,
}

impl std::fmt::Display for ScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotProvided(id) => write!(f, "no provider for '{id}'"),
            Self::TooMany(id) => {
                write!(f, "multiple providers for '{id}' in a single-instance lookup")
            }
            Self::TypeMismatch(id) => {
                write!(f, "provider for '{id}' resolved to a different type")
            }
            Self::Disposed => write!(f, "injector has been disposed"),
            Self::OutsideContext => {
                write!(f, "using dependency injection outside of a provided scope")
            }
        }
    }
}

impl std::error::Error for ScopeError {}
