//! Error types for heartlink wire types.

use thiserror::Error;

/// Errors raised while parsing or validating wire types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A string could not be parsed as an identifier.
    #[error("invalid {kind}: {value:?}")]
    InvalidId {
        /// Identifier type name.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A request status string is not one of the known states.
    #[error("unknown request status: {0:?}")]
    UnknownStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::UnknownStatus("maybe".into());
        assert_eq!(err.to_string(), "unknown request status: \"maybe\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
