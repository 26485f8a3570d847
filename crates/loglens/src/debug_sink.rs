// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local, no-network output used when `is_debug` is set.

use std::io::{self, Write};
use std::sync::Mutex;
use tracing::error;

use crate::envelope::Envelope;

/// Writes the wire form of each envelope, one per line.
pub struct DebugSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl DebugSink {
    /// Sink printing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        DebugSink {
            writer: Mutex::new(writer),
        }
    }

    /// Never fails; problems are logged and the envelope is dropped.
    pub fn emit(&self, envelope: &Envelope) {
        let line = match envelope.to_json() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize envelope {}: {e}", envelope.id());
                return;
            }
        };

        let Ok(mut writer) = self.writer.lock() else {
            error!("Debug sink writer lock poisoned, dropping envelope {}", envelope.id());
            return;
        };
        let written = writeln!(writer, "{line}");
        if let Err(e) = written.and_then(|()| writer.flush()) {
            error!("Failed to write envelope {}: {e}", envelope.id());
        }
    }
}

impl std::fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DebugSink")
    }
}
