//! Background security-event monitor for a running execution.
//!
//! Output lines from the sandboxed process are forwarded over a channel and
//! matched against known anomaly markers. Matches become [`SecurityEvent`]s
//! tagged with the execution id and returned alongside the run result.

use crate::clock::now_ms;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Category of a recorded security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// The process tried to reach the network while it was disabled.
    NetworkBlocked,
    /// Output looks like a port scanner.
    PortScan,
    /// A runtime anomaly detector reported something.
    RuntimeAnomaly,
    /// The process hit a dropped capability or read-only mount.
    CapabilityDenied,
    /// The execution hit its wall-clock timeout and was killed.
    Timeout,
}

/// A discrete security event correlated to one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Execution the event belongs to.
    pub execution_id: String,
    /// Event category.
    pub kind: SecurityEventKind,
    /// The output line (or message) that triggered the event.
    pub detail: String,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl SecurityEvent {
    pub(crate) fn new(execution_id: &str, kind: SecurityEventKind, detail: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            kind,
            detail: detail.into(),
            timestamp_ms: now_ms(),
        }
    }
}

static MARKERS: Lazy<Vec<(SecurityEventKind, Regex)>> = Lazy::new(|| {
    [
        (
            SecurityEventKind::NetworkBlocked,
            r"(?i)network is unreachable|could not resolve host|temporary failure in name resolution|name or service not known|bad address",
        ),
        (
            SecurityEventKind::PortScan,
            r"(?i)starting nmap|nmap scan report|discovered open port|\bmasscan\b|\bzmap\b",
        ),
        (
            SecurityEventKind::RuntimeAnomaly,
            r"(?i)\bfalco\b|anomaly detected|terminal shell in container|unexpected (process|connection|outbound)",
        ),
        (
            SecurityEventKind::CapabilityDenied,
            r"(?i)operation not permitted|read-only file system",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("marker regex is valid")))
    .collect()
});

/// Classify a single output line, if it carries a known anomaly marker.
pub fn classify_line(line: &str) -> Option<SecurityEventKind> {
    MARKERS
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(kind, _)| *kind)
}

/// Handle to a spawned monitor task.
pub(crate) struct SecurityMonitor {
    handle: JoinHandle<Vec<SecurityEvent>>,
    cancel: CancellationToken,
}

impl SecurityMonitor {
    /// Spawn a monitor that consumes lines until the channel closes or it is cancelled.
    pub(crate) fn spawn(execution_id: String, mut lines: mpsc::UnboundedReceiver<String>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut events = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    line = lines.recv() => match line {
                        Some(line) => {
                            if let Some(kind) = classify_line(&line) {
                                tracing::warn!(
                                    execution_id = %execution_id,
                                    kind = ?kind,
                                    "sandbox security event"
                                );
                                events.push(SecurityEvent::new(&execution_id, kind, line.trim_end()));
                            }
                        }
                        None => break,
                    },
                }
            }
            events
        });
        Self { handle, cancel }
    }

    /// Let the monitor drain for at most `grace`, then cancel it and collect its events.
    pub(crate) async fn finish(mut self, grace: Duration) -> Vec<SecurityEvent> {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                tracing::debug!("security monitor task failed: {e}");
                Vec::new()
            }
            Err(_) => {
                self.cancel.cancel();
                self.handle.await.unwrap_or_default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_markers() {
        assert_eq!(
            classify_line("curl: (6) Could not resolve host: example.com"),
            Some(SecurityEventKind::NetworkBlocked)
        );
        assert_eq!(
            classify_line("Nmap scan report for 10.0.0.1"),
            Some(SecurityEventKind::PortScan)
        );
        assert_eq!(
            classify_line("touch: /etc/x: Read-only file system"),
            Some(SecurityEventKind::CapabilityDenied)
        );
        assert_eq!(classify_line("hello world"), None);
    }

    #[tokio::test]
    async fn test_monitor_collects_events_until_channel_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = SecurityMonitor::spawn("exec-1".to_string(), rx);
        tx.send("ping: Network is unreachable".to_string()).unwrap();
        tx.send("plain output".to_string()).unwrap();
        drop(tx);

        let events = monitor.finish(Duration::from_secs(1)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].execution_id, "exec-1");
        assert_eq!(events[0].kind, SecurityEventKind::NetworkBlocked);
    }

    #[tokio::test]
    async fn test_monitor_is_cancelled_after_grace() {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = SecurityMonitor::spawn("exec-2".to_string(), rx);
        tx.send("Starting Nmap 7.94".to_string()).unwrap();
        // Sender stays open, so only cancellation can end the task.
        let events = monitor.finish(Duration::from_millis(50)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::PortScan);
        drop(tx);
    }
}
