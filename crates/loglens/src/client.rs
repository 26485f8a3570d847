// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of envelopes to the Loglens endpoint.
//!
//! Each envelope is POSTed as a single JSON document with a bearer token.
//! Failures are split in two:
//!
//! - **Transient**: transport errors, timeouts, 5xx, 408 and 429. Retried
//!   according to the configured [`RetryStrategy`].
//! - **Rejected**: every other non-success status. Reported after the first
//!   attempt.
//!
//! A client sends one envelope at a time; concurrent callers queue on an
//! internal lock, so at most one request is in flight per client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::constants::MAX_ERROR_BODY_BYTES;
use crate::envelope::Envelope;
use crate::error::{ConfigError, DeliveryError, DeliveryErrorKind, SendError};
use crate::retry::RetryStrategy;

/// Acknowledgement for a delivered envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub envelope_id: Uuid,
}

/// Anything that can take an envelope off the caller's hands.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, envelope: &Envelope) -> Result<Ack, SendError>;

    /// Releases resources once no more envelopes will be delivered.
    fn close(&self) {}
}

pub struct DeliveryClient {
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    retry_strategy: RetryStrategy,
    send_lock: Mutex<()>,
    closed: AtomicBool,
}

impl DeliveryClient {
    /// Validates `config` and prepares the pooled transport.
    ///
    /// Connections are opened lazily on the first send.
    pub fn open(config: &Config) -> Result<Self, ConfigError> {
        let endpoint = config.validate()?;
        let client = build_client(config.https_proxy.as_deref(), config.timeout)?;

        let mut authorization = HeaderValue::from_str(&config.oauth2_token.header_value())
            .map_err(|_| ConfigError::InvalidValue {
                field: "oauth2_token",
                value: "<redacted>".to_string(),
            })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-B3-Flags", HeaderValue::from_static("1"));

        debug!("Delivery client ready for {endpoint}");
        Ok(DeliveryClient {
            client,
            endpoint,
            headers,
            retry_strategy: config.retry_strategy,
            send_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Sends one envelope, retrying transient failures.
    ///
    /// Returns once the envelope is acknowledged, rejected, or the retry
    /// budget is spent.
    pub async fn send(&self, envelope: &Envelope) -> Result<Ack, SendError> {
        let envelope_id = envelope.id();
        let body = envelope.to_json()?;

        let _in_flight = self.send_lock.lock().await;
        if self.is_closed() {
            return Err(DeliveryError {
                kind: DeliveryErrorKind::Rejected,
                envelope_id,
                attempts: 0,
                cause: "client closed".to_string(),
            }
            .into());
        }

        let max_attempts = self.retry_strategy.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let time = Instant::now();
            let resp = self
                .client
                .post(self.endpoint.clone())
                .headers(self.headers.clone())
                .body(body.clone())
                .send()
                .await;
            let elapsed = time.elapsed();

            let (kind, cause) = match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!(
                            "Delivered envelope {envelope_id} in {} ms (attempt {attempts})",
                            elapsed.as_millis()
                        );
                        return Ok(Ack { envelope_id });
                    }
                    let text = resp.text().await.unwrap_or_default();
                    (
                        classify_status(status),
                        format!("HTTP {status}: {}", truncate(&text, MAX_ERROR_BODY_BYTES)),
                    )
                }
                Err(e) => (DeliveryErrorKind::Transient, format!("transport error: {e}")),
            };

            if kind == DeliveryErrorKind::Rejected || attempts >= max_attempts {
                error!(
                    "Failed to deliver envelope {envelope_id} after {} ms and {attempts} attempts ({kind}): {cause}",
                    elapsed.as_millis()
                );
                return Err(DeliveryError {
                    kind,
                    envelope_id,
                    attempts,
                    cause,
                }
                .into());
            }

            let delay = self.retry_strategy.delay_after(attempts);
            warn!(
                "Attempt {attempts}/{max_attempts} for envelope {envelope_id} failed, retrying in {} ms: {cause}",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Stops accepting envelopes. Safe to call any number of times.
    ///
    /// Pooled connections are released when the client is dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Delivery client for {} closed", self.endpoint);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deliver for DeliveryClient {
    async fn deliver(&self, envelope: &Envelope) -> Result<Ack, SendError> {
        self.send(envelope).await
    }

    fn close(&self) {
        DeliveryClient::close(self);
    }
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("retry_strategy", &self.retry_strategy)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    // A redirected POST becomes a body-less GET; surface 3xx instead.
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none());
    if let Some(proxy) = proxy_url {
        let proxy = reqwest::Proxy::https(proxy)
            .map_err(|e| ConfigError::Transport(format!("invalid https proxy: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| ConfigError::Transport(e.to_string()))
}

fn classify_status(status: StatusCode) -> DeliveryErrorKind {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        DeliveryErrorKind::Transient
    } else {
        DeliveryErrorKind::Rejected
    }
}

fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
