// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-event dispatch.
//!
//! [`LoglensOutput`] is what a host pipeline talks to: it is registered once
//! from a [`Config`] and then receives events one at a time. Each event is
//! wrapped in an [`Envelope`] and handed to exactly one route, chosen at
//! registration:
//!
//! | config                         | route                         |
//! |--------------------------------|-------------------------------|
//! | `is_debug`                     | [`DebugSink`] on stdout       |
//! | `queue_capacity == 0`          | [`DeliveryClient`], inline    |
//! | `queue_capacity > 0`           | bounded queue + client        |

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::client::{Ack, Deliver, DeliveryClient};
use crate::config::Config;
use crate::debug_sink::DebugSink;
use crate::envelope::{Envelope, Event};
use crate::error::{ConfigError, DeliveryError, DeliveryErrorKind, SendError};
use crate::queue::{DeliveryReceipt, QueueError, QueueHandle, QueueService};

/// One call's worth of input from the host pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(Event),
    /// Pipeline teardown marker. Never forwarded and never logged.
    Shutdown,
}

impl From<Event> for Inbound {
    fn from(event: Event) -> Self {
        Inbound::Event(event)
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// The shutdown marker was ignored.
    Skipped,
    /// Written to the debug sink.
    Printed(Uuid),
    /// Delivered inline and acknowledged.
    Delivered(Ack),
    /// Accepted by the delivery queue; the receipt resolves later.
    Enqueued(DeliveryReceipt),
}

enum Route {
    Debug(DebugSink),
    Inline(Arc<dyn Deliver>),
    Queued {
        handle: QueueHandle,
        worker: Mutex<Option<JoinHandle<()>>>,
    },
}

pub struct LoglensOutput {
    index: String,
    route: Route,
}

impl LoglensOutput {
    /// Validates `config`, logs the resolved endpoint and index, and picks
    /// the route.
    ///
    /// A queued route spawns its worker, so it needs a running tokio
    /// runtime.
    pub fn register(config: Config) -> Result<Self, ConfigError> {
        let endpoint = config.validate()?;

        info!("Loglens output configuration");
        info!("url: {endpoint}");
        info!("loglens index: {}", config.index);

        if config.is_debug {
            info!("Debug mode: envelopes are printed, not sent");
            return Ok(Self::debug(&config.index, DebugSink::stdout()));
        }

        let client: Arc<dyn Deliver> = Arc::new(DeliveryClient::open(&config)?);
        if config.queue_capacity == 0 {
            return Ok(Self::inline(&config.index, client));
        }

        let output = Self::queued(&config.index, config.queue_capacity, client)?;
        info!("Delivery queue enabled, capacity {}", config.queue_capacity);
        Ok(output)
    }

    #[must_use]
    pub fn debug(index: &str, sink: DebugSink) -> Self {
        LoglensOutput {
            index: index.to_string(),
            route: Route::Debug(sink),
        }
    }

    pub fn inline(index: &str, deliverer: Arc<dyn Deliver>) -> Self {
        LoglensOutput {
            index: index.to_string(),
            route: Route::Inline(deliverer),
        }
    }

    /// Spawns the queue worker on the current tokio runtime. Fails when
    /// called outside of one.
    pub fn queued(
        index: &str,
        capacity: usize,
        deliverer: Arc<dyn Deliver>,
    ) -> Result<Self, ConfigError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ConfigError::Transport("a delivery queue needs a running tokio runtime".to_string())
        })?;
        let (service, handle) = QueueService::new(capacity, deliverer);
        let worker = runtime.spawn(service.run());
        Ok(LoglensOutput {
            index: index.to_string(),
            route: Route::Queued {
                handle,
                worker: Mutex::new(Some(worker)),
            },
        })
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Handles one inbound item.
    ///
    /// Inline delivery returns only after the envelope is acknowledged or
    /// has failed for good. Queued delivery returns once the envelope is
    /// accepted, waiting while the queue is full.
    pub async fn receive(&self, inbound: Inbound) -> Result<Outcome, SendError> {
        let event = match inbound {
            Inbound::Shutdown => return Ok(Outcome::Skipped),
            Inbound::Event(event) => event,
        };
        let envelope = Envelope::build(&event, &self.index);

        match &self.route {
            Route::Debug(sink) => {
                sink.emit(&envelope);
                Ok(Outcome::Printed(envelope.id()))
            }
            Route::Inline(deliverer) => deliverer.deliver(&envelope).await.map(Outcome::Delivered),
            Route::Queued { handle, .. } => match handle.submit(envelope).await {
                Ok(receipt) => Ok(Outcome::Enqueued(receipt)),
                Err(e) => Err(queue_rejection(e)),
            },
        }
    }

    /// Shuts the route down. Queued envelopes are delivered before this
    /// returns.
    pub async fn close(&self) {
        match &self.route {
            Route::Debug(_) => {}
            Route::Inline(deliverer) => deliverer.close(),
            Route::Queued { handle, worker } => {
                handle.shutdown();
                let worker = match worker.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(_) => {
                        error!("Delivery queue worker lock poisoned");
                        None
                    }
                };
                if let Some(worker) = worker {
                    if let Err(e) = worker.await {
                        error!("Delivery queue worker failed: {e}");
                    }
                }
            }
        }
        debug!("Loglens output for index {} closed", self.index);
    }
}

fn queue_rejection(e: QueueError) -> SendError {
    let cause = e.to_string();
    let envelope = e.into_envelope();
    DeliveryError {
        kind: DeliveryErrorKind::Rejected,
        envelope_id: envelope.id(),
        attempts: 0,
        cause,
    }
    .into()
}

impl std::fmt::Debug for LoglensOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let route = match &self.route {
            Route::Debug(_) => "debug",
            Route::Inline(_) => "inline",
            Route::Queued { .. } => "queued",
        };
        f.debug_struct("LoglensOutput")
            .field("index", &self.index)
            .field("route", &route)
            .finish()
    }
}
