// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Event field the envelope type is read from.
pub const LEVEL_FIELD: &str = "level";

/// Envelope type used when the event carries no usable level.
pub const UNDEFINED_TYPE: &str = "UNDEFINED";

/// Total attempts per envelope, first try included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;

/// Per-attempt request deadline.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Zero keeps delivery inline with the caller.
pub const DEFAULT_QUEUE_CAPACITY: usize = 0;

/// Upper bound for a configured queue, matching the connector's buffer limit.
pub const MAX_QUEUE_CAPACITY: usize = 5000;

/// Longest response body kept in a delivery error cause.
pub const MAX_ERROR_BODY_BYTES: usize = 512;
