// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by the registry, router, resolver, and transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuxError {
    NotFound,
    NameConflict,
    Unauthorized,
    InvalidName,
    Reserved,
    TopicClosed,
    /// Transient storage or collaborator failure; the caller may retry.
    Retryable,
    /// A resource path already maps to a different locator.
    Conflict,
    BadRequest,
    Internal,
}

impl MuxError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::NameConflict => 409,
            Self::Unauthorized => 401,
            Self::InvalidName => 422,
            Self::Reserved => 403,
            Self::TopicClosed => 410,
            Self::Retryable => 503,
            Self::Conflict => 409,
            Self::BadRequest => 400,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::NameConflict => "NAME_CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidName => "INVALID_NAME",
            Self::Reserved => "RESERVED",
            Self::TopicClosed => "TOPIC_CLOSED",
            Self::Retryable => "RETRYABLE",
            Self::Conflict => "CONFLICT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the caller may retry the same request after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }

    /// Parse a machine-readable code back into an error (client side).
    pub fn from_code(code: &str) -> Option<Self> {
        let err = match code {
            "NOT_FOUND" => Self::NotFound,
            "NAME_CONFLICT" => Self::NameConflict,
            "UNAUTHORIZED" => Self::Unauthorized,
            "INVALID_NAME" => Self::InvalidName,
            "RESERVED" => Self::Reserved,
            "TOPIC_CLOSED" => Self::TopicClosed,
            "RETRYABLE" => Self::Retryable,
            "CONFLICT" => Self::Conflict,
            "BAD_REQUEST" => Self::BadRequest,
            "INTERNAL" => Self::Internal,
            _ => return None,
        };
        Some(err)
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }

    /// Default human-readable message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::NameConflict => "name taken",
            Self::Unauthorized => "unauthorized",
            Self::InvalidName => "invalid name",
            Self::Reserved => "reserved namespace",
            Self::TopicClosed => "topic has no subscribers",
            Self::Retryable => "temporarily unavailable, retry",
            Self::Conflict => "path already mapped to a different locator",
            Self::BadRequest => "bad request",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for MuxError {}

impl axum::response::IntoResponse for MuxError {
    fn into_response(self) -> axum::response::Response {
        self.to_http_response(self.default_message()).into_response()
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
