//! Error types for vix-core.

use crate::handle::{HandleType, RawHandle};
use crate::property::{PropertyId, PropertyKind};
use crate::registry::Token;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for vix-core operations.
pub type Result<T> = std::result::Result<T, VixError>;

/// A raw `VixError` value as returned by the native library.
///
/// The low 16 bits carry the error code; the upper bits carry flags and
/// extra information that callers normally ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub u64);

impl ErrorCode {
    pub const OK: ErrorCode = ErrorCode(0);
    pub const FAIL: ErrorCode = ErrorCode(1);
    pub const OUT_OF_MEMORY: ErrorCode = ErrorCode(2);
    pub const INVALID_ARG: ErrorCode = ErrorCode(3);
    pub const FILE_NOT_FOUND: ErrorCode = ErrorCode(4);
    pub const OBJECT_IS_BUSY: ErrorCode = ErrorCode(5);
    pub const NOT_SUPPORTED: ErrorCode = ErrorCode(6);
    pub const FILE_ERROR: ErrorCode = ErrorCode(7);
    pub const CANCELLED: ErrorCode = ErrorCode(10);
    pub const FILE_ALREADY_EXISTS: ErrorCode = ErrorCode(12);
    pub const INVALID_HANDLE: ErrorCode = ErrorCode(1000);
    pub const NOT_SUPPORTED_ON_HANDLE_TYPE: ErrorCode = ErrorCode(1001);
    pub const TOO_MANY_HANDLES: ErrorCode = ErrorCode(1002);
    pub const NOT_FOUND: ErrorCode = ErrorCode(2000);
    pub const TYPE_MISMATCH: ErrorCode = ErrorCode(2001);
    pub const TIMEOUT_WAITING_FOR_TOOLS: ErrorCode = ErrorCode(3000);
    pub const UNRECOGNIZED_COMMAND: ErrorCode = ErrorCode(3001);
    pub const OP_NOT_SUPPORTED_ON_GUEST: ErrorCode = ErrorCode(3003);
    pub const PROGRAM_NOT_STARTED: ErrorCode = ErrorCode(3004);
    pub const VM_NOT_RUNNING: ErrorCode = ErrorCode(3006);
    pub const VM_IS_RUNNING: ErrorCode = ErrorCode(3007);
    pub const INVALID_PROPERTY_VALUE: ErrorCode = ErrorCode(6000);

    /// The error code with flag bits masked off (`VIX_ERROR_CODE`).
    pub fn code(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn is_ok(self) -> bool {
        self.code() == 0
    }

    /// Convert a native status into a `Result`.
    pub fn check(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(VixError::Native(self))
        }
    }

    /// Symbolic name for well-known codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.code() {
            0 => "VIX_OK",
            1 => "VIX_E_FAIL",
            2 => "VIX_E_OUT_OF_MEMORY",
            3 => "VIX_E_INVALID_ARG",
            4 => "VIX_E_FILE_NOT_FOUND",
            5 => "VIX_E_OBJECT_IS_BUSY",
            6 => "VIX_E_NOT_SUPPORTED",
            7 => "VIX_E_FILE_ERROR",
            10 => "VIX_E_CANCELLED",
            12 => "VIX_E_FILE_ALREADY_EXISTS",
            1000 => "VIX_E_INVALID_HANDLE",
            1001 => "VIX_E_NOT_SUPPORTED_ON_HANDLE_TYPE",
            1002 => "VIX_E_TOO_MANY_HANDLES",
            2000 => "VIX_E_NOT_FOUND",
            2001 => "VIX_E_TYPE_MISMATCH",
            3000 => "VIX_E_TIMEOUT_WAITING_FOR_TOOLS",
            3001 => "VIX_E_UNRECOGNIZED_COMMAND",
            3003 => "VIX_E_OP_NOT_SUPPORTED_ON_GUEST",
            3004 => "VIX_E_PROGRAM_NOT_STARTED",
            3006 => "VIX_E_VM_NOT_RUNNING",
            3007 => "VIX_E_VM_IS_RUNNING",
            6000 => "VIX_E_INVALID_PROPERTY_VALUE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.code()),
            None => write!(f, "{}", self.code()),
        }
    }
}

/// Breaches of the contract between the native runtime and the completion
/// bridge. These indicate a runtime-integrity fault, not a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// A completion referenced a token that is not registered.
    #[error("completion for unregistered token {0}")]
    UnknownToken(Token),

    /// The native runtime delivered an event kind the bridge does not handle.
    #[error("unexpected event type {0}")]
    UnexpectedEvent(i32),

    /// A later-reported pid does not match the one already observed.
    #[error("pid changed for token {token}: recorded {recorded}, reported {reported}")]
    PidMismatch {
        token: Token,
        recorded: u64,
        reported: u64,
    },

    /// A record received a second completion.
    #[error("token {0} already completed")]
    AlreadyCompleted(Token),

    /// A single-result job returned a different number of rows.
    #[error("expected exactly {expected} result row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },
}

/// Errors that can occur while driving the VIX API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VixError {
    /// A native call returned a non-success status.
    #[error("native error: {0}")]
    Native(ErrorCode),

    /// A handle was used as the wrong kind.
    #[error("handle type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: HandleType,
        actual: HandleType,
    },

    /// An operation was attempted on a released handle.
    #[error("handle {0} used after release")]
    UseAfterRelease(RawHandle),

    /// The native runtime broke the completion protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    /// A property value did not have the expected type.
    #[error("property {property} is not of type {expected}")]
    PropertyType {
        property: PropertyId,
        expected: PropertyKind,
    },

    /// The caller gave up waiting. Native work keeps running.
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    /// The worker thread running a blocking wait was torn down.
    #[error("wait aborted: {0}")]
    WaitAborted(String),

    /// A process-tracked launch was requested for an operation that does not
    /// start a guest process.
    #[error("operation {0} does not launch a guest process")]
    NotALaunch(&'static str),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ErrorCode> for VixError {
    fn from(code: ErrorCode) -> Self {
        VixError::Native(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_masks_flags() {
        let code = ErrorCode(0x0001_0000_0000_0004);
        assert_eq!(code.code(), 4);
        assert_eq!(code.name(), Some("VIX_E_FILE_NOT_FOUND"));
        assert!(!code.is_ok());
    }

    #[test]
    fn test_error_code_check() {
        assert!(ErrorCode::OK.check().is_ok());
        assert_eq!(
            ErrorCode::INVALID_ARG.check(),
            Err(VixError::Native(ErrorCode::INVALID_ARG))
        );
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::VM_NOT_RUNNING.to_string(), "VIX_E_VM_NOT_RUNNING (3006)");
        assert_eq!(ErrorCode(4242).to_string(), "4242");
    }

    #[test]
    fn test_violation_converts_to_protocol_error() {
        let err: VixError = Violation::UnexpectedEvent(9).into();
        assert!(matches!(
            err,
            VixError::ProtocolViolation(Violation::UnexpectedEvent(9))
        ));
    }
}
