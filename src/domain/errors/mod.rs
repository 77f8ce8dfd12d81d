// Domain errors - Error types for the domain layer

use std::fmt;

/// Domain-specific error types returned by every port
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// File not found
    FileNotFound(String),
    /// Insufficient permissions
    PermissionDenied(String),
    /// File system operation failed
    FsFail(String),
    /// Image decoding failed
    DecodeFail(String),
    /// Backend execution failed
    ExecFail(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            DomainError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            DomainError::FsFail(msg) => write!(f, "File system error: {}", msg),
            DomainError::DecodeFail(msg) => write!(f, "Decode failed: {}", msg),
            DomainError::ExecFail(msg) => write!(f, "Execution failed: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => DomainError::FileNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => DomainError::PermissionDenied(err.to_string()),
            _ => DomainError::FsFail(err.to_string()),
        }
    }
}
