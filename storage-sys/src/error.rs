// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use storage_contracts::{StorageError, StorageErrorKind};
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Tool not available: {0}")]
    ToolMissing(String),

    #[error("Command failed: {command}; stderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Invalid inventory {path:?}: {reason}")]
    Inventory { path: PathBuf, reason: String },

    #[error("Unexpected output from {tool}: {reason}")]
    Parse { tool: String, reason: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl From<SysError> for StorageError {
    fn from(error: SysError) -> Self {
        let kind = match &error {
            SysError::PermissionDenied(_) => StorageErrorKind::PermissionDenied,
            SysError::DeviceNotFound(_) => StorageErrorKind::NotFound,
            SysError::ToolMissing(_) => StorageErrorKind::Unavailable,
            SysError::Inventory { .. } => StorageErrorKind::InvalidInput,
            SysError::Io(_)
            | SysError::CommandFailed { .. }
            | SysError::Parse { .. }
            | SysError::OperationFailed(_) => StorageErrorKind::Io,
        };
        StorageError::new(kind, error.to_string())
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
