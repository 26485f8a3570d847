// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery envelopes.
//!
//! An [`Envelope`] wraps one inbound [`Event`] with the routing metadata the
//! indexing service needs:
//!
//! ```text
//! {"index":"app-logs","type":"ERROR","id":"<uuid v4>","source":{...event...}}
//! ```
//!
//! Field order on the wire is fixed (`index`, `type`, `id`, `source`) and the
//! event keys keep their original order, so the serialized form is stable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{LEVEL_FIELD, UNDEFINED_TYPE};

/// A structured log record as received from the upstream pipeline.
pub type Event = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    index: String,
    #[serde(rename = "type")]
    kind: String,
    id: Uuid,
    source: Event,
}

impl Envelope {
    /// Wraps a copy of `event` for delivery to `index`.
    ///
    /// Never fails. The event's `level` becomes the envelope type, falling
    /// back to `UNDEFINED` when it is missing or empty.
    #[must_use]
    pub fn build(event: &Event, index: &str) -> Self {
        Envelope {
            index: index.to_string(),
            kind: type_from_level(event.get(LEVEL_FIELD)),
            id: Uuid::new_v4(),
            source: event.clone(),
        }
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn source(&self) -> &Event {
        &self.source
    }

    /// Canonical single-line JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn type_from_level(level: Option<&Value>) -> String {
    match level {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => UNDEFINED_TYPE.to_string(),
    }
}
