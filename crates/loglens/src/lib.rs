// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Loglens
//!
//! Client library for shipping structured log events to the Loglens indexing
//! service.
//!
//! Every inbound event is wrapped in an [`envelope::Envelope`] carrying the
//! target index, a type derived from the event's `level`, and a random id.
//! The envelope is then routed to exactly one destination:
//!
//! - [`debug_sink::DebugSink`]: prints the envelope locally, no network
//! - [`client::DeliveryClient`]: POSTs the envelope with bounded retries
//! - [`queue::QueueHandle`]: bounded FIFO in front of a delivery client
//!
//! [`output::LoglensOutput`] is the entry point that hosts call once per
//! event.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod constants;
pub mod debug_sink;
pub mod envelope;
pub mod error;
pub mod output;
pub mod queue;
pub mod retry;
pub mod token;

pub use client::{Ack, DeliveryClient};
pub use config::Config;
pub use envelope::{Envelope, Event};
pub use error::{ConfigError, DeliveryError, DeliveryErrorKind, SendError};
pub use output::{Inbound, LoglensOutput, Outcome};
