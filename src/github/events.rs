//! The push-event subscription consumed by the org monitors.
//!
//! The event bus speaks newline-delimited JSON over a long-lived HTTP response, filtered
//! server-side to one organization and one event type. Each monitor supplies a fresh
//! installation credential on every connect; the transport itself performs no reconnection,
//! that is the monitor's connection manager's job.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use log::{debug, trace, warn};
use serde::Deserialize;

use crate::error::AssignError;
use crate::nested;

/// The kind of a push event. Anything the bus emits beyond pull-request events is carried as
/// [`EventKind::Other`] and dropped by the monitors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EventKind {
    PullRequest,
    Other(String),
}

impl From<String> for EventKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pull_request" => EventKind::PullRequest,
            _ => EventKind::Other(raw),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::PullRequest => write!(f, "pull_request"),
            EventKind::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// One event as delivered by the bus.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub url: String,
}

/// A live, connected event stream. `None` from [`next_event`](EventSource::next_event) means the
/// stream has closed and the caller should reconnect.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<PushEvent>;
}

/// Factory for event streams; one connect per (organization, credential) pair.
#[async_trait]
pub trait EventConnector: Send + Sync {
    async fn connect(
        &self, org: &str, token: &str,
    ) -> Result<Box<dyn EventSource>, AssignError>;
}

/// The production connector: one streaming GET against the event bus.
pub struct HttpEventConnector {
    http: reqwest::Client,
    server_url: String,
}

impl HttpEventConnector {
    pub fn new(http: reqwest::Client, server_url: &str) -> Self {
        HttpEventConnector {
            http,
            server_url: server_url.to_string(),
        }
    }
}

#[async_trait]
impl EventConnector for HttpEventConnector {
    async fn connect(
        &self, org: &str, token: &str,
    ) -> Result<Box<dyn EventSource>, AssignError> {
        let response = self
            .http
            .get(&self.server_url)
            .query(&[("org", org), ("events", "pull_request")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AssignError::GitHubAPIError {
                msg: format!("Error connecting to event bus [{}] for [{}].", self.server_url, org),
                nested: nested!(e),
            })?;

        if !response.status().is_success() {
            return Err(AssignError::EventStreamError {
                org: org.to_string(),
                msg: format!(
                    "Event bus [{}] rejected the subscription with status [{}].",
                    self.server_url,
                    response.status()
                ),
            });
        }

        debug!("Subscribed to pull_request events for [{}].", org);

        let chunks = response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()));

        Ok(Box::new(HttpEventSource {
            org: org.to_string(),
            stream: Box::pin(chunks),
            buffer: Vec::new(),
        }))
    }
}

struct HttpEventSource {
    org: String,
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>,
    buffer: Vec<u8>,
}

impl HttpEventSource {
    /// Pops the first complete line off the buffer, if any.
    fn take_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn next_event(&mut self) -> Option<PushEvent> {
        loop {
            while let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue; // keep-alive
                }

                match serde_json::from_str::<PushEvent>(&line) {
                    Ok(event) => {
                        trace!("Event for [{}]: [{}] [{}]", self.org, event.kind, event.url);
                        return Some(event);
                    }
                    Err(e) => {
                        warn!("Dropping unparseable event line for [{}]: {}", self.org, e);
                    }
                }
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("Event stream for [{}] broke: {}", self.org, e);
                    return None;
                }
                None => {
                    debug!("Event stream for [{}] closed by the server.", self.org);
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds_deserialize_from_wire_names() {
        let event: PushEvent = serde_json::from_str(
            r#"{"type": "pull_request", "url": "https://github.com/acme/rockets/pull/42"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::PullRequest);

        let event: PushEvent =
            serde_json::from_str(r#"{"type": "issue_comment", "url": "x"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Other("issue_comment".to_string()));
    }
}
