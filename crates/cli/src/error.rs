// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use boidmux::error::{ErrorResponse, MuxError};

/// A non-2xx answer from the fabric API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    /// Fabric error code, when the body carried one.
    pub code: Option<MuxError>,
    pub message: String,
}

impl ApiError {
    /// Decode an error envelope; fall back to the raw body.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(resp) => Self {
                status,
                code: MuxError::from_code(&resp.error.code),
                message: resp.error.message,
            },
            Err(_) => Self {
                status,
                code: None,
                message: String::from_utf8_lossy(body).trim().to_owned(),
            },
        }
    }

    pub fn is(&self, code: MuxError) -> bool {
        self.code == Some(code)
    }

    /// Transient: retry with backoff.
    pub fn is_retryable(&self) -> bool {
        self.code.is_some_and(|c| c.is_retryable()) || self.status >= 500
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(MuxError::NameConflict) => write!(f, "name taken: {}", self.message),
            Some(code) => write!(f, "{} ({}): {}", code.as_str(), self.status, self.message),
            None => write!(f, "HTTP {}: {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// The fabric error code behind an `anyhow` error, if any.
pub fn api_code(err: &anyhow::Error) -> Option<MuxError> {
    err.downcast_ref::<ApiError>().and_then(|e| e.code)
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
