// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::{env, process};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use loglens::{queue::DeliveryReceipt, Config, Event, Inbound, LoglensOutput, Outcome};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGLENS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading configuration, forwarder will not start: {e}");
            process::exit(1);
        }
    };

    let output = match LoglensOutput::register(config) {
        Ok(o) => o,
        Err(e) => {
            error!("Error registering Loglens output: {e}");
            process::exit(1);
        }
    };

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        signal_token.cancel();
    });

    let (receipt_tx, receipt_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_receipts(receipt_rx));

    let stdin = BufReader::new(tokio::io::stdin());
    forward(stdin, &output, &cancel_token, &receipt_tx).await;

    drop(receipt_tx);
    if let Err(e) = reporter.await {
        error!("Receipt reporter failed: {e}");
    }
    info!("Forwarder stopped");
}

/// Feeds every line of `reader` to `output` until end of input or
/// cancellation, then sends the teardown marker and closes the output.
async fn forward<R>(
    reader: R,
    output: &LoglensOutput,
    cancel_token: &CancellationToken,
    receipt_tx: &mpsc::UnboundedSender<DeliveryReceipt>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.split(b'\n');
    let mut line_number: u64 = 0;

    loop {
        let line = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            line = lines.next_segment() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("End of input after {line_number} lines");
                break;
            }
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        };
        line_number += 1;

        let event = match parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(reason) => {
                warn!("Skipping line {line_number}: {reason}");
                continue;
            }
        };

        match output.receive(Inbound::Event(event)).await {
            Ok(Outcome::Enqueued(receipt)) => {
                if receipt_tx.send(receipt).is_err() {
                    error!("Receipt reporter stopped; delivery outcomes will not be logged");
                }
            }
            Ok(_) => {}
            Err(e) => error!("Dropping event from line {line_number}: {e}"),
        }
    }

    if let Err(e) = output.receive(Inbound::Shutdown).await {
        error!("Unexpected failure on shutdown marker: {e}");
    }
    output.close().await;
}

/// Logs the outcome of queued envelopes, in submission order.
async fn report_receipts(mut rx: mpsc::UnboundedReceiver<DeliveryReceipt>) {
    while let Some(receipt) = rx.recv().await {
        let envelope_id = receipt.envelope_id();
        match receipt.outcome().await {
            Ok(_) => debug!("Envelope {envelope_id} acknowledged"),
            Err(e) => error!("Dropping envelope {envelope_id}: {e}"),
        }
    }
}

/// Blank lines are ignored; anything else must be a UTF-8 JSON object.
fn parse_line(line: &[u8]) -> Result<Option<Event>, String> {
    let line = std::str::from_utf8(line).map_err(|e| format!("not valid UTF-8: {e}"))?;
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(event)) => Ok(Some(event)),
        Ok(_) => Err("not a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loglens::client::{Ack, Deliver};
    use loglens::debug_sink::DebugSink;
    use loglens::{DeliveryError, DeliveryErrorKind, Envelope, SendError};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Rejects events whose `fail` field is true, accepts the rest.
    #[derive(Default)]
    struct FlakyDeliverer {
        delivered: Mutex<Vec<serde_json::Value>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Deliver for FlakyDeliverer {
        async fn deliver(&self, envelope: &Envelope) -> Result<Ack, SendError> {
            if envelope.source().get("fail") == Some(&serde_json::Value::Bool(true)) {
                return Err(DeliveryError {
                    kind: DeliveryErrorKind::Rejected,
                    envelope_id: envelope.id(),
                    attempts: 1,
                    cause: "HTTP 400 Bad Request".to_string(),
                }
                .into());
            }
            self.delivered
                .lock()
                .unwrap()
                .push(serde_json::Value::Object(envelope.source().clone()));
            Ok(Ack {
                envelope_id: envelope.id(),
            })
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    async fn run(input: &[u8], output: &LoglensOutput) {
        let (receipt_tx, _receipt_rx) = mpsc::unbounded_channel();
        forward(input, output, &CancellationToken::new(), &receipt_tx).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_forward_skips_bad_lines_and_keeps_going() {
        let buffer = Capture::default();
        let output = LoglensOutput::debug("app-logs", DebugSink::new(Box::new(buffer.clone())));

        let input = b"{\"n\":1}\n\xff\xfe\n[1,2]\n{oops\n\n{\"n\":2}\n{\"n\":3}";
        run(input, &output).await;

        let printed = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let sources: Vec<serde_json::Value> = printed
            .lines()
            .map(|line| Envelope::from_json(line).unwrap().source().clone().into())
            .collect();
        assert_eq!(
            sources,
            vec![
                serde_json::json!({"n": 1}),
                serde_json::json!({"n": 2}),
                serde_json::json!({"n": 3}),
            ]
        );
        assert!(logs_contain("Skipping line 2: not valid UTF-8"));
        assert!(logs_contain("Skipping line 3: not a JSON object"));
        assert!(logs_contain("Skipping line 4: invalid JSON"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_forward_survives_delivery_failures_and_closes_at_eof() {
        let deliverer = Arc::new(FlakyDeliverer::default());
        let output = LoglensOutput::inline("app-logs", deliverer.clone());

        run(b"{\"n\":1}\n{\"n\":2,\"fail\":true}\n{\"n\":3}\n", &output).await;

        assert_eq!(
            *deliverer.delivered.lock().unwrap(),
            vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 3})]
        );
        assert!(deliverer.closed.load(Ordering::SeqCst));
        assert!(logs_contain("Dropping event from line 2"));
    }

    #[tokio::test]
    async fn test_forward_stops_when_cancelled() {
        let deliverer = Arc::new(FlakyDeliverer::default());
        let output = LoglensOutput::inline("app-logs", deliverer.clone());
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let (receipt_tx, _receipt_rx) = mpsc::unbounded_channel();

        forward(&b"{\"n\":1}\n"[..], &output, &cancel_token, &receipt_tx).await;

        assert!(deliverer.delivered.lock().unwrap().is_empty());
        assert!(deliverer.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_parse_line_object() {
        let event = parse_line(br#"{"level":"ERROR","msg":"boom"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event["level"], "ERROR");
        assert_eq!(event["msg"], "boom");
    }

    #[test]
    fn test_parse_line_keeps_key_order() {
        let event = parse_line(br#"{"z":1,"a":2}"#).unwrap().unwrap();
        let keys: Vec<&str> = event.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_parse_line_blank() {
        assert_eq!(parse_line(b"   \t\r"), Ok(None));
    }

    #[test]
    fn test_parse_line_rejects_non_objects() {
        assert_eq!(parse_line(b"[1,2]"), Err("not a JSON object".to_string()));
        assert!(parse_line(b"{not json").unwrap_err().starts_with("invalid JSON"));
        assert!(parse_line(b"\xff\xfe").unwrap_err().starts_with("not valid UTF-8"));
    }
}
