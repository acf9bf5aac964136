//! Realtime database client over REST
//!
//! One-shot reads and writes map to `GET`, `PUT` and `PATCH` on
//! `{base}/{path}.json`. Subscriptions use the database's event stream
//! (`Accept: text/event-stream`): the server sends `put` and `patch` events
//! relative to the watched location, which are folded into a local copy
//! and forwarded as full snapshots.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::tree::{apply_update, get_path, set_path};
use super::{RemoteStore, StoreEvent, Subscription};
use crate::error::StoreError;

/// Connect timeout for every request
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall timeout for one-shot requests (streams have none)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for a Firebase-style realtime database
#[derive(Clone)]
pub struct RtdbStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RtdbStore {
    /// Create a client for the database at `base_url`
    ///
    /// `auth_token` is sent as the `auth` query parameter when present.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("ricecooker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Unreachable {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(transport_error)?;
        check_status(path, response).await
    }
}

impl RemoteStore for RtdbStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let builder = self
            .request(Method::GET, path)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        // The stream itself stays open indefinitely; only the headers are timed
        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.send(path, builder))
            .await
            .map_err(|_| StoreError::Unreachable {
                details: format!("no response to subscription on '{}'", path),
            })??;

        let (tx, rx) = mpsc::unbounded_channel();
        let watched = path.to_string();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = EventStreamParser::default();
            let mut cache = Value::Null;

            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Subscription on {} dropped", watched);
                        return;
                    }
                    chunk = stream.next() => {
                        let bytes = match chunk {
                            Some(Ok(bytes)) => bytes,
                            Some(Err(e)) => {
                                let _ = tx.send(StoreEvent::Error(transport_error(e)));
                                return;
                            }
                            None => {
                                let _ = tx.send(StoreEvent::Error(StoreError::Unreachable {
                                    details: "event stream closed by server".to_string(),
                                }));
                                return;
                            }
                        };

                        for event in parser.push(&bytes) {
                            match apply_stream_event(&mut cache, &event, &watched) {
                                Ok(true) => {
                                    let snapshot = get_path(&cache, "").cloned();
                                    if tx.send(StoreEvent::Snapshot(snapshot)).is_err() {
                                        return;
                                    }
                                }
                                Ok(false) => {}
                                Err(e) => {
                                    warn!("Subscription on {} ended: {}", watched, e);
                                    let _ = tx.send(StoreEvent::Error(e));
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(path, rx))
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let builder = self.request(Method::GET, path).timeout(REQUEST_TIMEOUT);
        let response = self.send(path, builder).await?;
        let value: Value = response.json().await.map_err(|e| StoreError::Decode {
            details: e.to_string(),
        })?;
        Ok(get_path(&value, "").cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let builder = self
            .request(Method::PUT, path)
            .query(&[("print", "silent")])
            .timeout(REQUEST_TIMEOUT)
            .json(&value);
        self.send(path, builder).await?;
        Ok(())
    }

    async fn update(&self, path: &str, patch: Map<String, Value>) -> Result<(), StoreError> {
        let builder = self
            .request(Method::PATCH, path)
            .query(&[("print", "silent")])
            .timeout(REQUEST_TIMEOUT)
            .json(&patch);
        self.send(path, builder).await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode {
            details: err.to_string(),
        }
    } else {
        StoreError::Unreachable {
            details: err.to_string(),
        }
    }
}

async fn check_status(path: &str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(path, status, &body))
}

fn status_error(path: &str, status: StatusCode, body: &str) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied {
            path: path.to_string(),
        },
        _ => {
            // Error bodies look like {"error": "..."}
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.trim().to_string());
            StoreError::Remote {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq)]
struct StreamEvent {
    name: String,
    data: String,
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    /// Feed a chunk and return the events it completed
    fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            if line.is_empty() {
                events.extend(self.dispatch());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let name = self.event.take();
        let data = std::mem::take(&mut self.data);
        if name.is_none() && data.is_empty() {
            return None;
        }
        Some(StreamEvent {
            name: name.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Fold one stream event into the cached value
///
/// Returns whether the cache changed.
fn apply_stream_event(
    cache: &mut Value,
    event: &StreamEvent,
    watched: &str,
) -> Result<bool, StoreError> {
    match event.name.as_str() {
        "put" | "patch" => {
            let payload: StreamPayload =
                serde_json::from_str(&event.data).map_err(|e| StoreError::Decode {
                    details: format!("bad {} event: {}", event.name, e),
                })?;

            if event.name == "put" {
                set_path(cache, &payload.path, payload.data);
            } else {
                let Value::Object(patch) = payload.data else {
                    return Err(StoreError::Decode {
                        details: "patch event without an object body".to_string(),
                    });
                };
                apply_update(cache, &payload.path, &patch);
            }
            Ok(true)
        }
        "keep-alive" => Ok(false),
        "cancel" | "auth_revoked" => Err(StoreError::PermissionDenied {
            path: watched.to_string(),
        }),
        other => {
            debug!("Ignoring stream event '{}'", other);
            Ok(false)
        }
    }
}
