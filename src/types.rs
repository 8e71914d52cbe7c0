//! Type definitions and protocol constants for peer authentication.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Size of the pre-shared key in bytes.
pub const SHARED_KEY_LEN: usize = 32;

/// Size of a random challenge (nonce) in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Size of a challenge response (SHA-256 digest) in bytes.
pub const RESPONSE_LEN: usize = 32;

/// Maximum number of concurrent authentication instances.
pub const MAX_AUTH_INSTANCES: u8 = 4;

/// Timeout applied to each receive attempt during the handshake.
pub const RX_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default overall deadline for one handshake attempt.
///
/// The per-read timeout alone cannot bound a handshake: a peer that trickles
/// bytes keeps every read alive. The deadline caps the whole exchange.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

/// Session flag bits passed to [`crate::AuthSession::new`].
///
/// Exactly one role flag and exactly one method flag must be set.
pub mod flags {
    /// Act as the responder.
    pub const SERVER: u32 = 0x0001;
    /// Act as the initiator.
    pub const CLIENT: u32 = 0x0002;
    /// Authenticate with the DTLS method (interface only).
    pub const DTLS_METHOD: u32 = 0x0004;
    /// Authenticate with the SHA-256 challenge-response method.
    pub const CHALLENGE_METHOD: u32 = 0x0008;
}

/// Role of one endpoint in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiator: sends the first challenge.
    Client,
    /// Responder: waits for the client challenge.
    Server,
}

/// Identifier for one of the [`MAX_AUTH_INSTANCES`] concurrent sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u8);

impl InstanceId {
    /// Creates an instance id, rejecting values outside the instance pool.
    pub fn new(id: u8) -> Result<Self> {
        if id >= MAX_AUTH_INSTANCES {
            return Err(AuthError::InvalidParam("instance id out of range"));
        }
        Ok(Self(id))
    }

    /// Returns the raw id.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an authentication session.
///
/// A session moves monotonically from [`AuthStatus::Started`] through zero or
/// more [`AuthStatus::InProcess`] updates to exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Session created but not yet started.
    Idle,
    /// Worker is running, handshake begun.
    Started,
    /// Handshake past the midpoint, awaiting the peer's verdict.
    InProcess,
    /// Canceled by the caller. Terminal.
    Canceled,
    /// Aborted on a transport, decode, or internal error. Terminal.
    Failed,
    /// The peer failed to prove possession of the shared key, or reported
    /// that we failed to prove ours. Terminal.
    AuthenticationFailed,
    /// Both sides verified. Terminal.
    Successful,
}

impl AuthStatus {
    /// Returns true for statuses that end a session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuthStatus::Canceled
                | AuthStatus::Failed
                | AuthStatus::AuthenticationFailed
                | AuthStatus::Successful
        )
    }

    /// Human-readable description of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            AuthStatus::Idle => "Not started",
            AuthStatus::Started => "Authentication started",
            AuthStatus::InProcess => "In process",
            AuthStatus::Canceled => "Canceled",
            AuthStatus::Failed => "Failure",
            AuthStatus::AuthenticationFailed => "Authentication Failed",
            AuthStatus::Successful => "Authentication Successful",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during authentication.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid flags, ids, sizes, or call ordering.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// Thread or allocation resources exhausted.
    #[error("out of resources: {0}")]
    NoResource(String),

    /// The crypto backend reported a failure.
    ///
    /// Never produced by the built-in SHA-256 and RNG backends; present for
    /// hash engines that can fail.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The cancel flag was observed.
    #[error("authentication canceled")]
    Canceled,

    /// No data arrived within the receive timeout.
    #[error("receive timed out")]
    TimedOut,

    /// Carrier I/O error.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Generic handshake abort.
    #[error("handshake failed: {0}")]
    Failed(String),

    /// The peer's response did not match the expected hash, or the peer
    /// reported failure.
    #[error("peer authentication failed")]
    AuthenticationFailed,
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_bounds() {
        assert!(InstanceId::new(0).is_ok());
        assert!(InstanceId::new(MAX_AUTH_INSTANCES - 1).is_ok());

        let result = InstanceId::new(MAX_AUTH_INSTANCES);
        assert!(matches!(result, Err(AuthError::InvalidParam(_))));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AuthStatus::Canceled.is_terminal());
        assert!(AuthStatus::Failed.is_terminal());
        assert!(AuthStatus::AuthenticationFailed.is_terminal());
        assert!(AuthStatus::Successful.is_terminal());

        assert!(!AuthStatus::Idle.is_terminal());
        assert!(!AuthStatus::Started.is_terminal());
        assert!(!AuthStatus::InProcess.is_terminal());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AuthStatus::Started.as_str(), "Authentication started");
        assert_eq!(AuthStatus::Successful.as_str(), "Authentication Successful");
        assert_eq!(AuthStatus::Canceled.to_string(), "Canceled");
    }
}
