//! Outbound report delivery.
//!
//! The sink never raises: every failure mode is absorbed and logged, with
//! bounded retry/backoff inside the webhook client. A worker's run must not
//! depend on the notification channel being healthy.

use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config;
use crate::report::TestReport;

/// Sink for finished test reports. Implementations must not panic.
pub trait ReportSink: Send + Sync {
    /// Deliver a report. Returns whether delivery succeeded; failure is
    /// informational only.
    fn send_report(&self, report: &TestReport) -> bool;
}

/// Sink used when no webhook is configured: drops reports with a log line.
#[derive(Debug, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn send_report(&self, report: &TestReport) -> bool {
        debug!("[Notify] delivery disabled, dropping report for {}", report.identifier);
        false
    }
}

/// In-memory sink collecting reports; used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<TestReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn reports(&self) -> Vec<TestReport> {
        self.reports.lock().expect("sink mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().expect("sink mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for MemorySink {
    fn send_report(&self, report: &TestReport) -> bool {
        self.reports
            .lock()
            .expect("sink mutex poisoned")
            .push(report.clone());
        true
    }
}

/// Text-message webhook client with bounded retry and linear backoff.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    webhook: String,
    retries: u32,
    timeout: u64,
}

impl WebhookClient {
    /// Create a client for the given webhook URL.
    pub fn new(webhook: impl Into<String>) -> Self {
        let settings = &config::get().webhook;
        Self {
            webhook: webhook.into().trim().to_string(),
            retries: settings.retries,
            timeout: settings.timeout,
        }
    }

    /// Create a client from the environment, when a webhook is configured.
    pub fn from_env() -> Option<Self> {
        config::webhook_url().map(Self::new)
    }

    pub fn enabled(&self) -> bool {
        !self.webhook.is_empty()
    }

    /// Send a text message. Absorbs every failure; returns success.
    pub fn send_text(&self, text: &str) -> bool {
        if !self.enabled() {
            debug!("[Notify] webhook unset, skipping message: {:.60}", text);
            return false;
        }

        let payload = serde_json::json!({
            "msg_type": "text",
            "content": { "text": text },
        });
        let payload = match serde_json::to_string(&payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("[Notify] cannot serialize payload: {}", err);
                return false;
            }
        };

        for attempt in 0..=self.retries {
            match self.post_json(&payload) {
                Ok(status) if (200..300).contains(&status) => {
                    info!("[Notify] report delivered");
                    return true;
                }
                Ok(status) => {
                    warn!("[Notify] non-2xx response: {}", status);
                }
                Err(err) => {
                    warn!(
                        "[Notify] delivery failed (try {}/{}): {}",
                        attempt + 1,
                        self.retries + 1,
                        err
                    );
                }
            }
            thread::sleep(Duration::from_millis(800 * (attempt as u64 + 1)));
        }

        warn!("[Notify] delivery gave up after {} attempts", self.retries + 1);
        false
    }

    /// POST the payload via curl and return the HTTP status code.
    fn post_json(&self, payload: &str) -> std::io::Result<u16> {
        let output = Command::new("curl")
            .args([
                "-s",
                "-o", "/dev/null",
                "-w", "%{http_code}",
                "-X", "POST",
                &self.webhook,
                "-H", "Content-Type: application/json",
                "-d", payload,
                "--connect-timeout", &self.timeout.to_string(),
                "--max-time", &self.timeout.to_string(),
            ])
            .output()?;

        let status = String::from_utf8_lossy(&output.stdout);
        Ok(status.trim().parse().unwrap_or(0))
    }
}

impl ReportSink for WebhookClient {
    fn send_report(&self, report: &TestReport) -> bool {
        self.send_text(&report.render_text())
    }
}

/// Build the sink for a run: the webhook when configured, else the null sink.
pub fn sink_from_env() -> Arc<dyn ReportSink> {
    match WebhookClient::from_env() {
        Some(client) => {
            info!("[Notify] webhook delivery enabled");
            Arc::new(client)
        }
        None => {
            warn!("[Notify] {} unset, report delivery disabled", config::ENV_WEBHOOK_URL);
            Arc::new(NullSink)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TestReport;

    #[test]
    fn test_memory_sink_collects_reports() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        let report = TestReport::new("http://x", "id", "T");
        assert!(sink.send_report(&report));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.reports()[0].identifier, "id");
    }

    #[test]
    fn test_null_sink_reports_failure() {
        let sink = NullSink;
        let report = TestReport::new("http://x", "id", "T");
        assert!(!sink.send_report(&report));
    }

    #[test]
    fn test_disabled_webhook_short_circuits() {
        let client = WebhookClient {
            webhook: String::new(),
            retries: 2,
            timeout: 1,
        };
        assert!(!client.enabled());
        assert!(!client.send_text("hello"));
    }
}
