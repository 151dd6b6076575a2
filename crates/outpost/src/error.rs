// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the engine layers.
//!
//! Action outcomes reported by the game server are not errors; they travel
//! as [`FailureKind`] values inside events. The enums here cover the
//! infrastructure underneath: transport, session persistence, rule stores
//! and configuration.

use serde::{Deserialize, Serialize};

/// Failure while exchanging one request with the server.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("server error: HTTP {0}")]
    ServerError(u16),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the pipeline may re-queue the request after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_)
                | Self::ConnectionReset(_)
                | Self::Timeout(_)
                | Self::Transient(_)
                | Self::ServerError(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionRefused(_) => "connection_refused",
            Self::ConnectionReset(_) => "connection_reset",
            Self::Timeout(_) => "timeout",
            Self::Transient(_) => "transient",
            Self::ServerError(_) => "server_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Other(_) => "network",
        }
    }

    /// Classify a reqwest error into the retryable taxonomy.
    pub fn from_reqwest(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            return Self::Timeout(timeout_ms);
        }
        let text = err.to_string();
        if err.is_connect() {
            if text.contains("refused") {
                return Self::ConnectionRefused(text);
            }
            return Self::Transient(text);
        }
        if err.is_builder() {
            return Self::InvalidRequest(text);
        }
        if text.contains("reset") || text.contains("closed") {
            return Self::ConnectionReset(text);
        }
        if err.is_request() || err.is_body() {
            return Self::Transient(text);
        }
        Self::Other(text)
    }
}

/// Errors from loading or saving the cookie file.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("no saved session at {0}")]
    Missing(String),

    #[error("saved session is empty")]
    Empty,

    #[error("saved session expired")]
    Expired,

    #[error("saved session has no {0} cookie")]
    NoAuthCookie(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed session file: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "session_missing",
            Self::Empty => "session_empty",
            Self::Expired => "session_expired",
            Self::NoAuthCookie(_) => "session_no_auth_cookie",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Errors from persisted rule files.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unrecognized rule file shape: {0}")]
    Shape(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
            Self::Shape(_) => "shape",
        }
    }
}

/// Errors from reading configuration or the pattern table.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid pattern table: {0}")]
    Patterns(#[from] serde_json::Error),

    #[error("invalid base URL {0:?}")]
    BaseUrl(String),
}

/// Typed reason attached to every failed action outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Authentication,
    SessionExpired,
    InsufficientResources,
    NotFound,
    NoTargets,
    Server,
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::SessionExpired => "session expired",
            Self::InsufficientResources => "insufficient resources",
            Self::NotFound => "not found",
            Self::NoTargets => "no targets",
            Self::Server => "server",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
