//! Broker publisher trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Envelope;

/// Publishes envelopes onto the message broker. Transport-level retries, if
/// any, belong to the implementation; callers never retry.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, envelope: Envelope) -> Result<()>;
}
