//! Shared error model for cross-crate APIs.

use thiserror::Error;

/// Unified result type used by all public interfaces in `slotmig`.
pub type SmResult<T> = Result<T, SmError>;

/// High-level error categories shared by storage, replication, migration, and server layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SmError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Another migration task already occupies the coordinator.
    #[error("migration is busy: {0}")]
    Busy(&'static str),

    /// Wire payload is malformed or semantically invalid.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Key holds a value of another data type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Local I/O failed.
    #[error("io error: {0}")]
    Io(String),

    /// Remote peer is unreachable or the link broke mid-conversation.
    #[error("connection error: {0}")]
    Connection(String),
}

impl SmError {
    /// Returns true for failures that invalidate a whole network link.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::SmError;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(SmError::Connection("reset".to_owned()), true)]
    #[case(SmError::Io("broken pipe".to_owned()), true)]
    #[case(SmError::Protocol("bad reply".to_owned()), false)]
    #[case(SmError::WrongType, false)]
    #[case(SmError::Busy("slot 7"), false)]
    fn connection_level_classification(#[case] error: SmError, #[case] expected: bool) {
        assert_that!(error.is_connection_level(), eq(expected));
    }

    #[rstest]
    fn busy_error_names_the_reason() {
        let error = SmError::Busy("another task is active");
        assert_that!(
            error.to_string(),
            eq("migration is busy: another task is active")
        );
    }
}
