//! ==============================================================================
//! shadow/http.rs - device shadow over a REST endpoint
//! ==============================================================================
//!
//! endpoints:
//!     GET  {endpoint}/things/{thing}/shadow   -> full shadow, incl. state.delta
//!     POST {endpoint}/things/{thing}/shadow   <- update document
//!
//! how it maps onto the transport contract:
//!     - publish spawns the POST and returns; the response becomes an Ack
//!       event on a later yield (2xx accepted, 4xx rejected, no answer timeout)
//!     - yield polls GET once, bounded by the yield timeout, and turns a
//!       newer version with a non-empty delta into a Delta event
//!     - a failed request while connected yields Disconnected; with
//!       auto-reconnect on, later yields probe and report Reconnected
//!
//! ==============================================================================

use super::codec::{self, ShadowDocument};
use super::transport::{AckStatus, ConnectParams, ShadowTransport, TransportError, TransportEvent};

use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// what spawned publish requests report back
#[derive(Debug)]
enum Completion {
    Ack { client_token: String, status: AckStatus },
    LinkLost,
}

pub struct HttpShadowTransport {
    client: reqwest::Client,
    endpoint: String,
    url: Option<String>,
    connected: bool,
    auto_reconnect: bool,
    last_version: Option<u64>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl HttpShadowTransport {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            url: None,
            connected: false,
            auto_reconnect: false,
            last_version: None,
            completions_tx,
            completions_rx,
        })
    }

    /// GET the shadow. 404 means no shadow document exists yet.
    async fn fetch(&self, url: &str) -> Result<Option<Value>, TransportError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TransportError::Auth(format!("{} returned {}", url, resp.status())))
            }
            s if s.is_success() => {
                let body = resp.json::<Value>().await.map_err(|e| TransportError::Network(e.to_string()))?;
                Ok(Some(body))
            }
            s => Err(TransportError::Network(format!("{} returned {}", url, s))),
        }
    }

    async fn poll(&mut self, url: &str) -> Result<Option<TransportEvent>, TransportError> {
        let Some(body) = self.fetch(url).await? else {
            return Ok(None);
        };
        let Some((version, delta)) = pending_delta(&body, self.last_version) else {
            return Ok(None);
        };
        self.last_version = Some(version);
        Ok(Some(TransportEvent::Delta(codec::encode_delta(version, delta))))
    }
}

/// the delta section of a shadow response, if it is newer than `seen`
fn pending_delta(body: &Value, seen: Option<u64>) -> Option<(u64, Map<String, Value>)> {
    let version = body.get("version")?.as_u64()?;
    if seen.is_some_and(|v| version <= v) {
        return None;
    }
    let delta = body.get("state")?.get("delta")?.as_object()?;
    if delta.is_empty() {
        return None;
    }
    Some((version, delta.clone()))
}

impl ShadowTransport for HttpShadowTransport {
    async fn connect(&mut self, params: &ConnectParams) -> Result<(), TransportError> {
        let url = format!("{}/things/{}/shadow", self.endpoint, params.thing_name);
        tracing::info!("[HTTP] connecting to {} as {}", url, params.client_id);
        match self.fetch(&url).await {
            Ok(_) => {}
            Err(TransportError::Network(e)) => return Err(TransportError::Connect(e)),
            Err(e) => return Err(e),
        }
        self.url = Some(url);
        self.connected = true;
        Ok(())
    }

    async fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), TransportError> {
        self.auto_reconnect = enabled;
        Ok(())
    }

    fn is_auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect
    }

    async fn yield_once(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        let Some(url) = self.url.clone() else {
            return Err(TransportError::NotConnected);
        };
        let mut events = Vec::new();

        while let Ok(done) = self.completions_rx.try_recv() {
            match done {
                Completion::Ack { client_token, status } => {
                    events.push(TransportEvent::Ack { client_token, status })
                }
                Completion::LinkLost if self.connected => {
                    self.connected = false;
                    events.push(TransportEvent::Disconnected);
                }
                Completion::LinkLost => {}
            }
        }

        if !self.connected && !self.auto_reconnect {
            return Ok(events);
        }

        match tokio::time::timeout(timeout, self.poll(&url)).await {
            Err(_) => tracing::debug!("[HTTP] poll did not finish within {:?}", timeout),
            Ok(Ok(delta)) => {
                if !self.connected {
                    self.connected = true;
                    events.push(TransportEvent::Reconnected);
                }
                events.extend(delta);
            }
            Ok(Err(e)) => {
                tracing::debug!("[HTTP] poll failed: {}", e);
                if self.connected {
                    self.connected = false;
                    events.push(TransportEvent::Disconnected);
                }
            }
        }
        Ok(events)
    }

    async fn publish(&mut self, document: &ShadowDocument) -> Result<(), TransportError> {
        let Some(url) = self.url.clone() else {
            return Err(TransportError::NotConnected);
        };
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(document.bytes.clone());
        let client_token = document.client_token.clone();
        let tx = self.completions_tx.clone();

        tokio::spawn(async move {
            let (status, lost) = match request.send().await {
                Ok(resp) if resp.status().is_success() => (AckStatus::Accepted, false),
                Ok(resp) if resp.status().is_client_error() => {
                    tracing::debug!("[HTTP] update {} refused: {}", client_token, resp.status());
                    (AckStatus::Rejected, false)
                }
                Ok(resp) => {
                    tracing::debug!("[HTTP] update {} failed: {}", client_token, resp.status());
                    (AckStatus::Timeout, false)
                }
                Err(e) => {
                    tracing::debug!("[HTTP] update {} not delivered: {}", client_token, e);
                    (AckStatus::Timeout, !e.is_timeout())
                }
            };
            // receiver gone means the transport was dropped
            let _ = tx.send(Completion::Ack { client_token, status });
            if lost {
                let _ = tx.send(Completion::LinkLost);
            }
        });
        Ok(())
    }

    async fn attempt_reconnect(&mut self) -> Result<(), TransportError> {
        let Some(url) = self.url.clone() else {
            return Err(TransportError::NotConnected);
        };
        self.fetch(&url).await?;
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.url = None;
        Ok(())
    }
}
