//! Command Errors
//!
//! Everything that can go wrong while executing a single command. Each
//! variant maps to a RESP error line `-<KIND> <message>`; none of them ends
//! the connection.

use crate::acl::AclError;
use crate::protocol::RespValue;
use crate::storage::{StoreError, StreamError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    // Authentication
    #[error("Authentication required")]
    NoAuth,
    #[error("invalid username-password pair or user is disabled")]
    WrongPass,

    /// A non-subscription command issued while subscribed.
    #[error("Can't execute '{0}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context")]
    ModeRestriction(String),

    // Arguments and values
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("value is not an integer or out of range")]
    NotInteger,
    #[error("increment or decrement would overflow")]
    Overflow,
    #[error("value is not a valid float")]
    NotFloat,
    #[error("{0} is out of range, must be positive")]
    OutOfRange(&'static str),
    #[error("syntax error")]
    Syntax,
    #[error("invalid expire time in '{0}' command")]
    InvalidExpireTime(String),
    #[error("invalid longitude,latitude pair {0:.6},{1:.6}")]
    InvalidCoordinates(f64, f64),
    #[error("could not decode requested zset member")]
    NoSuchMember,

    // Streams
    #[error("The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,
    #[error("Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    // Lookup
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("unknown subcommand '{0}'. Try {1} HELP.")]
    UnknownSubcommand(String, &'static str),

    #[error("{0}")]
    AclSyntax(String),

    // Replication
    #[error("You can't write against a read only replica.")]
    ReadOnlyReplica,
    #[error("PSYNC is only served by a leader")]
    NotLeader,

    // Transactions
    #[error("EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("MULTI calls can not be nested")]
    NestedMulti,
}

impl CommandError {
    /// The leading word of the error line.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::NoAuth => "NOAUTH",
            CommandError::WrongPass => "WRONGPASS",
            CommandError::WrongType => "WRONGTYPE",
            CommandError::ReadOnlyReplica => "READONLY",
            _ => "ERR",
        }
    }

    pub(crate) fn arity(command: &str) -> Self {
        CommandError::WrongArity(command.to_ascii_lowercase())
    }
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error_kind(err.kind(), err)
    }
}

impl From<StreamError> for CommandError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Zero => CommandError::StreamIdZero,
            StreamError::TooSmall => CommandError::StreamIdTooSmall,
            StreamError::Invalid => CommandError::InvalidStreamId,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WrongType => CommandError::WrongType,
            StoreError::NotInteger => CommandError::NotInteger,
            StoreError::Overflow => CommandError::Overflow,
            StoreError::Stream(err) => err.into(),
        }
    }
}

impl From<AclError> for CommandError {
    fn from(err: AclError) -> Self {
        CommandError::AclSyntax(err.to_string())
    }
}
