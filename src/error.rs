/// Errors reported by debouncer and interval construction and use.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebounceError {
    /// Invalid construction arguments, e.g. a negative or non-numeric delay.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The invoker was disposed and no longer accepts calls.
    #[error("debouncer has been disposed")]
    Disposed,
}

/// Crate result alias.
pub type Result<T, E = DebounceError> = std::result::Result<T, E>;
