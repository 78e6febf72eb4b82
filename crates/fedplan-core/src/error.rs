// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error kinds surfaced to the host, with stable numeric status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    Forbidden,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal",
        }
    }

    pub const fn status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Forbidden => 403,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The conflicting key(s) are echoed back to the caller.
    #[error("{message}")]
    Conflict { message: String, keys: Vec<String> },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

impl LedgerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            keys: vec![key.into()],
        }
    }

    pub fn conflict_keys(message: impl Into<String>, keys: Vec<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            keys,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> u16 {
        self.kind().status()
    }

    pub fn keys(&self) -> &[String] {
        match self {
            Self::Conflict { keys, .. } => keys,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_stable_status_codes() {
        assert_eq!(LedgerError::bad_request("x").status(), 400);
        assert_eq!(LedgerError::not_found("x").status(), 404);
        assert_eq!(LedgerError::conflict("x", "k").status(), 409);
        assert_eq!(LedgerError::forbidden("x").status(), 403);
        assert_eq!(LedgerError::internal("x").status(), 500);
    }

    #[test]
    fn conflict_carries_keys() {
        let err = LedgerError::conflict("tuple already exists", "abc");
        assert_eq!(err.keys(), ["abc".to_string()]);
        assert_eq!(err.kind().as_str(), "conflict");
    }
}
