// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded delivery queue in front of a [`Deliver`] implementation.
//!
//! ```text
//!    ┌──────────────┐
//!    │ QueueHandles │ (clonable producers)
//!    └──────┬───────┘
//!           │ bounded mpsc, FIFO
//!           v
//!    ┌──────────────┐
//!    │ QueueService │ (single worker task)
//!    └──────┬───────┘
//!           │ one envelope at a time
//!           v
//!    ┌──────────────┐
//!    │   Deliver    │
//!    └──────────────┘
//! ```
//!
//! A single worker keeps envelopes in arrival order. When the channel is
//! full, [`QueueHandle::submit`] waits for room and
//! [`QueueHandle::try_submit`] hands the envelope back. Every accepted
//! envelope gets a [`DeliveryReceipt`] that resolves to its outcome.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use crate::client::{Ack, Deliver};
use crate::envelope::Envelope;
use crate::error::{DeliveryError, DeliveryErrorKind, SendError};

struct Job {
    envelope: Envelope,
    reply: oneshot::Sender<Result<Ack, SendError>>,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("delivery queue is full")]
    Full(Envelope),

    #[error("delivery queue is shut down")]
    Closed(Envelope),
}

impl QueueError {
    /// Gives the rejected envelope back to the caller.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        match self {
            QueueError::Full(envelope) | QueueError::Closed(envelope) => envelope,
        }
    }
}

/// Resolves to the delivery outcome of one queued envelope.
#[derive(Debug)]
pub struct DeliveryReceipt {
    envelope_id: Uuid,
    rx: oneshot::Receiver<Result<Ack, SendError>>,
}

impl DeliveryReceipt {
    #[must_use]
    pub fn envelope_id(&self) -> Uuid {
        self.envelope_id
    }

    /// Waits for the worker to finish with this envelope.
    ///
    /// If the worker goes away first, the envelope is reported as a
    /// transient failure rather than silently lost.
    pub async fn outcome(self) -> Result<Ack, SendError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError {
                kind: DeliveryErrorKind::Transient,
                envelope_id: self.envelope_id,
                attempts: 0,
                cause: "delivery worker stopped before sending".to_string(),
            }
            .into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueHandle {
    tx: mpsc::Sender<Job>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl QueueHandle {
    /// Queues an envelope, waiting while the queue is full.
    pub async fn submit(&self, envelope: Envelope) -> Result<DeliveryReceipt, QueueError> {
        let envelope_id = envelope.id();
        let (reply, rx) = oneshot::channel();
        match self.tx.send(Job { envelope, reply }).await {
            Ok(()) => Ok(DeliveryReceipt { envelope_id, rx }),
            Err(mpsc::error::SendError(job)) => Err(QueueError::Closed(job.envelope)),
        }
    }

    /// Queues an envelope without waiting; a full queue hands it back.
    pub fn try_submit(&self, envelope: Envelope) -> Result<DeliveryReceipt, QueueError> {
        let envelope_id = envelope.id();
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(Job { envelope, reply }) {
            Ok(()) => Ok(DeliveryReceipt { envelope_id, rx }),
            Err(mpsc::error::TrySendError::Full(job)) => Err(QueueError::Full(job.envelope)),
            Err(mpsc::error::TrySendError::Closed(job)) => Err(QueueError::Closed(job.envelope)),
        }
    }

    /// Stops intake. The worker still delivers everything already queued.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Free slots right now.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Job({})", self.envelope.id())
    }
}

pub struct QueueService {
    deliverer: Arc<dyn Deliver>,
    rx: mpsc::Receiver<Job>,
    shutdown: watch::Receiver<bool>,
}

impl QueueService {
    /// Returns the service (to be spawned) and a handle for producers.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize, deliverer: Arc<dyn Deliver>) -> (Self, QueueHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = QueueService {
            deliverer,
            rx,
            shutdown: shutdown_rx,
        };
        let handle = QueueHandle {
            tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (service, handle)
    }

    /// Delivers queued envelopes in order until shut down or every handle
    /// is dropped, then closes the deliverer.
    pub async fn run(mut self) {
        debug!("Delivery queue started");
        let mut draining = false;

        loop {
            tokio::select! {
                biased;
                job = self.rx.recv() => {
                    let Some(Job { envelope, reply }) = job else {
                        break;
                    };
                    let result = self.deliverer.deliver(&envelope).await;
                    if reply.send(result).is_err() {
                        debug!("Receipt for envelope {} was dropped", envelope.id());
                    }
                }
                _ = self.shutdown.changed(), if !draining => {
                    debug!("Delivery queue shutting down, draining queued envelopes");
                    self.rx.close();
                    draining = true;
                }
            }
        }

        self.deliverer.close();
        debug!("Delivery queue stopped");
    }
}
