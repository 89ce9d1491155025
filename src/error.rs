//! Error types for chain establishment and resource lifecycle.
//!
//! Every failure that can land on a hop or a resource is a [`SessionError`].
//! Its [`ErrorKind`] is a closed set the UI layer matches on to decide
//! what to offer the user:
//!
//! | Kind | Raised by | Hop status afterwards | Suggested action |
//! |------|-----------|-----------------------|------------------|
//! | `ConnectFailed` | connect | unchanged (`Connecting`) | retry |
//! | `UnknownKey` | connect | unchanged (`Connecting`) | trust key |
//! | `Authentication` | authenticate | unchanged (`Connected`) | re-authenticate |
//! | `NotFoundSession` | any step | reset to `Connecting` | retry |
//! | `Timeout` | any step | reset to `Connecting` | retry |
//! | `Default` | anything else | unchanged | retry |
//!
//! Errors are serialized as `{type, message, ...}` objects so a status
//! snapshot can be handed to a client unchanged.

use schemars::JsonSchema;
use serde::{Serialize, Serializer};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::types::AuthenticationMethod;

pub type SessionResult<T> = Result<T, SessionError>;

fn credential_noun(method: &AuthenticationMethod) -> &'static str {
    match method {
        AuthenticationMethod::Password => "password",
        AuthenticationMethod::PublicKey => "key",
        AuthenticationMethod::Certificate => "certificate",
    }
}

/// The server rejected the credentials of one hop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The username or {} is incorrect", credential_noun(.method))]
pub struct AuthenticationError {
    pub method: AuthenticationMethod,
    /// Methods the server reported it would still accept, when known.
    pub remaining_methods: Vec<String>,
}

impl AuthenticationError {
    pub fn new(method: AuthenticationMethod) -> Self {
        Self {
            method,
            remaining_methods: Vec::new(),
        }
    }

    pub fn with_remaining(method: AuthenticationMethod, remaining: Vec<String>) -> Self {
        Self {
            method,
            remaining_methods: remaining,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Failed connect to {0}")]
    ConnectFailed(String),

    #[error("{algorithm} key fingerprint is {fingerprint}")]
    UnknownKey {
        algorithm: String,
        fingerprint: String,
    },

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("Not found session")]
    NotFoundSession,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Host key of {endpoint} does not match known_hosts line {line}")]
    HostKeyChanged { endpoint: String, line: usize },

    #[error("Jump host {0} not found")]
    UnresolvedJumpHost(String),

    #[error("Host {0} not found")]
    UnresolvedHost(String),

    #[error("Port forwarding {0} not found")]
    UnresolvedPortForwarding(String),

    #[error("Chain has no hops")]
    EmptyChain,

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Chain is already being established")]
    Busy,

    #[error("Resource was removed while its chain was being established")]
    Abandoned,

    #[error("Resource {0} not found")]
    NotFoundResource(Uuid),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

/// Closed classification of [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub enum ErrorKind {
    ConnectFailed,
    UnknownKey,
    Authentication,
    NotFoundSession,
    Timeout,
    Default,
}

/// What the user should be offered for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Accept the unknown host key, once or permanently.
    TrustKey,
    /// Supply different credentials for the hop.
    Reauthenticate,
    /// Run establishment again from the current status.
    Retry,
}

impl ErrorKind {
    /// Transient session errors put the hop back to `Connecting`.
    pub fn resets_connection(self) -> bool {
        matches!(self, ErrorKind::NotFoundSession | ErrorKind::Timeout)
    }

    pub fn suggested_action(self) -> SuggestedAction {
        match self {
            ErrorKind::UnknownKey => SuggestedAction::TrustKey,
            ErrorKind::Authentication => SuggestedAction::Reauthenticate,
            ErrorKind::ConnectFailed
            | ErrorKind::NotFoundSession
            | ErrorKind::Timeout
            | ErrorKind::Default => SuggestedAction::Retry,
        }
    }
}

impl SessionError {
    pub fn new<T: ToString>(message: T) -> Self {
        SessionError::Other(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::ConnectFailed(_) => ErrorKind::ConnectFailed,
            SessionError::UnknownKey { .. } => ErrorKind::UnknownKey,
            SessionError::Authentication(_) => ErrorKind::Authentication,
            SessionError::NotFoundSession => ErrorKind::NotFoundSession,
            SessionError::Timeout(_) => ErrorKind::Timeout,
            SessionError::HostKeyChanged { .. }
            | SessionError::UnresolvedJumpHost(_)
            | SessionError::UnresolvedHost(_)
            | SessionError::UnresolvedPortForwarding(_)
            | SessionError::EmptyChain
            | SessionError::NotAuthenticated
            | SessionError::Busy
            | SessionError::Abandoned
            | SessionError::NotFoundResource(_)
            | SessionError::Io(_)
            | SessionError::Other(_) => ErrorKind::Default,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            SessionError::ConnectFailed(_) => "ConnectFailed",
            SessionError::UnknownKey { .. } => "UnknownKey",
            SessionError::Authentication(_) => "AuthenticationError",
            SessionError::NotFoundSession => "NotFoundSession",
            SessionError::Timeout(_) => "Timeout",
            SessionError::HostKeyChanged { .. } => "HostKeyChanged",
            SessionError::UnresolvedJumpHost(_) => "UnresolvedJumpHost",
            SessionError::UnresolvedHost(_) => "UnresolvedHost",
            SessionError::UnresolvedPortForwarding(_) => "UnresolvedPortForwarding",
            SessionError::EmptyChain => "EmptyChain",
            SessionError::NotAuthenticated => "NotAuthenticated",
            SessionError::Busy => "Busy",
            SessionError::Abandoned => "Abandoned",
            SessionError::NotFoundResource(_) => "NotFoundResource",
            SessionError::Io(_) => "Io",
            SessionError::Other(_) => "Error",
        }
    }
}

impl Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let value = match self {
            SessionError::UnknownKey {
                algorithm,
                fingerprint,
            } => json!({
                "type": self.type_name(),
                "message": self.to_string(),
                "algorithm": algorithm,
                "fingerprint": fingerprint,
            }),
            SessionError::HostKeyChanged { endpoint, line } => json!({
                "type": self.type_name(),
                "message": self.to_string(),
                "endpoint": endpoint,
                "line": line,
            }),
            SessionError::Authentication(auth) => json!({
                "type": self.type_name(),
                "message": self.to_string(),
                "authenticationMethod": auth.method,
                "remainingMethods": auth.remaining_methods,
            }),
            _ => json!({
                "type": self.type_name(),
                "message": self.to_string(),
            }),
        };
        value.serialize(serializer)
    }
}

impl From<russh::Error> for SessionError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect
            | russh::Error::HUP
            | russh::Error::SendError
            | russh::Error::NotAuthenticated => SessionError::NotFoundSession,
            russh::Error::ConnectionTimeout
            | russh::Error::KeepaliveTimeout
            | russh::Error::InactivityTimeout => SessionError::Timeout(err.to_string()),
            russh::Error::IO(io) => SessionError::Io(io.to_string()),
            other => SessionError::Other(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SessionError {
    fn from(err: russh::keys::Error) -> Self {
        SessionError::Other(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SessionError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        SessionError::Timeout(err.to_string())
    }
}
