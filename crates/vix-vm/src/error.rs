//! Error types for vix-vm.

use thiserror::Error;
use vix_core::{ErrorCode, VixError};

/// Result type alias for vix-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors that can occur during host, VM and guest operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Error from vix-core or the native library
    #[error("VIX error: {0}")]
    Vix(#[from] VixError),

    /// Argument rejected before any native call was made
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl VmError {
    /// The native error code, if this error came from the VIX library.
    pub fn native_code(&self) -> Option<ErrorCode> {
        match self {
            VmError::Vix(VixError::Native(code)) => Some(*code),
            _ => None,
        }
    }
}
