//! Health feedback — applies failure and rejection events from downstream
//! workers to the feed store. Every handler is idempotent.

use std::sync::Arc;

use tokio::sync::mpsc;

use cadence_core::error::Result;
use cadence_core::filter::FeedFilter;
use cadence_core::traits::{FeedStore, FieldUpdate};
use cadence_core::types::{
    ConnectionRejected, DisabledCode, Envelope, HealthStatus, RoutingKey, UrlFetchFailed,
};

/// Outcome of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// Number of feeds or connections written.
    Applied(u64),
    /// Target feed does not exist.
    Missing,
    /// Routing key is not a feedback event.
    Ignored,
}

/// Consumes `url.failed.disable-feeds` and
/// `feed.rejected-article.disable-connection`.
#[derive(Clone)]
pub struct HealthFeedbackConsumer {
    store: Arc<dyn FeedStore>,
}

impl HealthFeedbackConsumer {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Disable every feed fetching `url` and mark it failed.
    pub async fn handle_url_fetch_failed(&self, event: &UrlFetchFailed) -> Result<u64> {
        let filter = FeedFilter::UrlEquals(event.url.clone());
        let updates = [
            FieldUpdate::DisabledCode(DisabledCode::FailedRequests),
            FieldUpdate::HealthStatus(HealthStatus::Failed),
        ];
        let matched = self.store.update_many(&filter, &updates).await?;
        tracing::info!("🔴 Disabled {} feed(s) for failing url {}", matched, event.url);
        Ok(matched)
    }

    /// Disable the rejected connection on its feed. Sibling connections are
    /// left alone.
    pub async fn handle_connection_rejected(&self, event: &ConnectionRejected) -> Result<FeedbackOutcome> {
        let Some(feed) = self.store.find_by_id(&event.feed.id).await? else {
            tracing::warn!(
                "⚠️ Rejected article for unknown feed {} (connection {})",
                event.feed.id,
                event.medium.id
            );
            return Ok(FeedbackOutcome::Missing);
        };

        let updates: Vec<FieldUpdate> = feed
            .connections
            .positions_of(&event.medium.id)
            .into_iter()
            .map(|(kind, index)| FieldUpdate::ConnectionDisabledCode {
                kind,
                index,
                code: DisabledCode::BadFormat,
            })
            .collect();

        if updates.is_empty() {
            tracing::debug!("Feed {} has no connection {}", feed.id, event.medium.id);
            return Ok(FeedbackOutcome::Applied(0));
        }
        self.store.update_by_id(&feed.id, &updates).await?;
        tracing::info!(
            "🔴 Disabled connection {} on feed {} (bad format)",
            event.medium.id,
            feed.id
        );
        Ok(FeedbackOutcome::Applied(updates.len() as u64))
    }

    /// Route an envelope to its handler. Undecodable payloads are dropped
    /// with a warning; storage errors are returned.
    pub async fn handle_envelope(&self, envelope: &Envelope) -> Result<FeedbackOutcome> {
        match envelope.routing_key {
            RoutingKey::UrlFetchFailed => match envelope.decode::<UrlFetchFailed>() {
                Ok(event) => Ok(FeedbackOutcome::Applied(self.handle_url_fetch_failed(&event).await?)),
                Err(e) => {
                    tracing::warn!("⚠️ Dropping malformed {} event {}: {e}", envelope.routing_key, envelope.id);
                    Ok(FeedbackOutcome::Ignored)
                }
            },
            RoutingKey::ConnectionRejected => match envelope.decode::<ConnectionRejected>() {
                Ok(event) => self.handle_connection_rejected(&event).await,
                Err(e) => {
                    tracing::warn!("⚠️ Dropping malformed {} event {}: {e}", envelope.routing_key, envelope.id);
                    Ok(FeedbackOutcome::Ignored)
                }
            },
            other => {
                tracing::debug!("Ignoring {} event on feedback consumer", other);
                Ok(FeedbackOutcome::Ignored)
            }
        }
    }

    /// Consume envelopes until the channel closes.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        tracing::info!("👂 Health feedback consumer started");
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = self.handle_envelope(&envelope).await {
                tracing::error!("❌ Feedback event {} failed: {e}", envelope.id);
            }
        }
        tracing::info!("Health feedback consumer stopped");
    }
}
