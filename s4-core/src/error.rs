//! Error taxonomy for the object store. Every public operation returns
//! `Result<_, S4Error>`; the HTTP surface maps `kind` to a status code and
//! the CLI maps `is_retryable()` to its backoff loop.

use std::fmt;

#[derive(Debug, Clone)]
pub enum S4ErrorKind {
    /// Key without scheme, contains a space, reserved bucket, missing
    /// numeric prefix where required.
    Malformed,
    /// Blob or sidecar absent on the owning node.
    NotFound,
    /// Create-only PUT race lost.
    AlreadyExists,
    /// Admission queue exceeded its start-countdown.
    Busy,
    /// A user pipeline exited non-zero.
    CmdFailure {
        stdout: String,
        stderr: String,
        exitcode: i32,
    },
    /// Checksum mismatch or pipeline non-zero in a transfer.
    Integrity,
    /// Anything else.
    Internal,
}

#[derive(Debug, Clone)]
pub struct S4Error {
    pub kind: S4ErrorKind,
    pub message: String,
    pub module: String,
}

impl S4Error {
    pub fn new(kind: S4ErrorKind, message: impl Into<String>, module: impl Into<String>) -> Self {
        S4Error {
            kind,
            message: message.into(),
            module: module.into(),
        }
    }

    pub fn malformed(message: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(S4ErrorKind::Malformed, message, module)
    }

    pub fn not_found(message: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(S4ErrorKind::NotFound, message, module)
    }

    pub fn already_exists(message: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(S4ErrorKind::AlreadyExists, message, module)
    }

    pub fn busy(message: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(S4ErrorKind::Busy, message, module)
    }

    pub fn cmd_failure(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exitcode: i32,
        module: impl Into<String>,
    ) -> Self {
        let stdout = stdout.into();
        let stderr = stderr.into();
        S4Error {
            message: format!("command exited {exitcode}"),
            kind: S4ErrorKind::CmdFailure {
                stdout,
                stderr,
                exitcode,
            },
            module: module.into(),
        }
    }

    pub fn integrity(message: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(S4ErrorKind::Integrity, message, module)
    }

    pub fn internal(message: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(S4ErrorKind::Internal, message, module)
    }

    /// HTTP status code for this error kind, per the error taxonomy table.
    pub fn status_code(&self) -> u16 {
        match self.kind {
            S4ErrorKind::Malformed => 400,
            S4ErrorKind::NotFound => 404,
            S4ErrorKind::AlreadyExists => 409,
            S4ErrorKind::Busy => 429,
            S4ErrorKind::CmdFailure { .. } => 400,
            S4ErrorKind::Integrity => 500,
            S4ErrorKind::Internal => 500,
        }
    }

    /// Whether a client should retry this error with backoff. 429 always,
    /// 500 by policy; 404 and 409 are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, S4ErrorKind::Busy | S4ErrorKind::Integrity | S4ErrorKind::Internal)
    }
}

impl fmt::Display for S4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S4Error[{}] {}: {}", self.module, self.status_code(), self.message)
    }
}

impl std::error::Error for S4Error {}

impl From<std::io::Error> for S4Error {
    fn from(err: std::io::Error) -> Self {
        S4Error::internal(err.to_string(), "io")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(S4Error::malformed("x", "m").status_code(), 400);
        assert_eq!(S4Error::not_found("x", "m").status_code(), 404);
        assert_eq!(S4Error::already_exists("x", "m").status_code(), 409);
        assert_eq!(S4Error::busy("x", "m").status_code(), 429);
        assert_eq!(S4Error::cmd_failure("", "", 1, "m").status_code(), 400);
        assert_eq!(S4Error::integrity("x", "m").status_code(), 500);
        assert_eq!(S4Error::internal("x", "m").status_code(), 500);
    }

    #[test]
    fn only_busy_integrity_internal_are_retryable() {
        assert!(S4Error::busy("x", "m").is_retryable());
        assert!(S4Error::integrity("x", "m").is_retryable());
        assert!(S4Error::internal("x", "m").is_retryable());
        assert!(!S4Error::not_found("x", "m").is_retryable());
        assert!(!S4Error::already_exists("x", "m").is_retryable());
        assert!(!S4Error::malformed("x", "m").is_retryable());
    }
}
