//! Command errors.
//!
//! The `Display` form of every variant is the exact message sent to clients,
//! always starting with the `ERR` class token.

use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Malformed options or option combinations.
    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// A numeric argument or stored value is not a 64-bit integer.
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("ERR command '{0}' cannot be watched")]
    NotWatchable(String),
}

impl CommandError {
    pub(crate) fn arity(command: &str) -> Self {
        CommandError::WrongArity(command.to_ascii_lowercase())
    }
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotAnInteger => CommandError::NotAnInteger,
            StorageError::Overflow => CommandError::Overflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            CommandError::Overflow.to_string(),
            "ERR increment or decrement would overflow"
        );
        assert_eq!(
            CommandError::NotAnInteger.to_string(),
            "ERR value is not an integer or out of range"
        );
        assert_eq!(
            CommandError::arity("DECRBY").to_string(),
            "ERR wrong number of arguments for 'decrby' command"
        );
    }
}
