// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the Loglens client.
//!
//! Only [`ConfigError`] is fatal, and only at startup. Per-envelope failures
//! are reported as [`SendError`] and left to the caller to log or drop.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Invalid or missing configuration, raised before any event is accepted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    Missing(&'static str),

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("option `oauth2_token` must not be empty")]
    EmptyToken,

    #[error("option `index` must not be empty")]
    EmptyIndex,

    #[error("invalid value `{value}` for option `{field}`")]
    InvalidValue { field: &'static str, value: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to build http transport: {0}")]
    Transport(String),
}

/// Whether a failed delivery could succeed if tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Timeouts, connection resets, 5xx. Already retried up to the budget.
    Transient,
    /// Bad credentials, malformed payload, any other 4xx. Never retried.
    Rejected,
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryErrorKind::Transient => write!(f, "transient"),
            DeliveryErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("delivery of envelope {envelope_id} failed ({kind}) after {attempts} attempt(s): {cause}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub envelope_id: Uuid,
    pub attempts: u32,
    pub cause: String,
}

impl DeliveryError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == DeliveryErrorKind::Transient
    }
}

/// Outcome of a failed `send`.
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SendError {
    /// The delivery failure kind, if this was a delivery failure.
    #[must_use]
    pub fn delivery_kind(&self) -> Option<DeliveryErrorKind> {
        match self {
            SendError::Delivery(e) => Some(e.kind),
            SendError::Serialization(_) => None,
        }
    }
}
