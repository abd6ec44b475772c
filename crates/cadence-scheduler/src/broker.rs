//! Event publishers — in-process fan-out and HTTP forwarding.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::EventPublisher;
use cadence_core::types::{Envelope, RoutingKey};

/// Envelopes kept for inspection.
const HISTORY_LIMIT: usize = 100;

#[derive(Default)]
struct BrokerState {
    subscribers: HashMap<RoutingKey, Vec<mpsc::UnboundedSender<Envelope>>>,
    history: VecDeque<Envelope>,
}

/// In-process broker. Every subscriber of a routing key gets every envelope
/// published under it.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving envelopes published under `key` from now on.
    pub fn subscribe(&self, key: RoutingKey) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.entry(key).or_default().push(tx);
        }
        rx
    }

    /// The most recent envelopes, oldest first.
    pub fn history(&self) -> Vec<Envelope> {
        self.state
            .lock()
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn history_for(&self, key: RoutingKey) -> Vec<Envelope> {
        self.history()
            .into_iter()
            .filter(|e| e.routing_key == key)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CadenceError::Broker("memory broker lock poisoned".into()))?;

        if let Some(subscribers) = state.subscribers.get_mut(&envelope.routing_key) {
            subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        }

        state.history.push_back(envelope);
        if state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
        Ok(())
    }
}

/// Forwards envelopes to an HTTP broker bridge: `POST {endpoint}/{routing_key}`.
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(CadenceError::Config("broker.endpoint is required for http mode".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CadenceError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, key: RoutingKey) -> String {
        format!("{}/{}", self.endpoint, key)
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let url = self.url_for(envelope.routing_key);
        let resp = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| CadenceError::Broker(format!("POST {url}: {e}")))?;

        if resp.status().is_success() {
            tracing::trace!("📤 {} → {}", envelope.routing_key, url);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(CadenceError::Broker(format!("POST {url} returned {status}: {body}")))
        }
    }
}
