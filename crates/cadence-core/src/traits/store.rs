//! Storage traits — the feed collection and the schedule registry backend.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::filter::FeedFilter;
use crate::types::{ConnectionKind, CustomSchedule, DisabledCode, Feed, HealthStatus};

/// Forward-only lazy sequence of feeds. Pages are fetched as the stream is
/// polled; a cursor can be reopened at any offset with [`FeedStore::find`].
pub type FeedCursor = BoxStream<'static, Result<Feed>>;

/// A narrow, single-field write. Stores never replace whole documents.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    DisabledCode(DisabledCode),
    HealthStatus(HealthStatus),
    /// Set the disabled code of the connection at `index` in group `kind`.
    /// A missing position is left alone.
    ConnectionDisabledCode {
        kind: ConnectionKind,
        index: usize,
        code: DisabledCode,
    },
}

impl FieldUpdate {
    /// Apply to an in-memory document.
    pub fn apply(&self, feed: &mut Feed) {
        match self {
            FieldUpdate::DisabledCode(code) => feed.disabled_code = Some(*code),
            FieldUpdate::HealthStatus(status) => feed.health_status = *status,
            FieldUpdate::ConnectionDisabledCode { kind, index, code } => {
                if let Some(con) = feed.connections.group_mut(*kind).get_mut(*index) {
                    con.disabled_code = Some(*code);
                }
            }
        }
    }
}

/// The queryable feed collection.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Distinct source URLs of every matching feed.
    async fn distinct_urls(&self, filter: &FeedFilter) -> Result<Vec<String>>;

    /// Open a cursor over matching feeds, skipping the first `offset`.
    async fn find(&self, filter: &FeedFilter, offset: usize) -> Result<FeedCursor>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Feed>>;

    /// Returns whether a feed with that id existed.
    async fn update_by_id(&self, id: &str, updates: &[FieldUpdate]) -> Result<bool>;

    /// Returns the number of feeds matched.
    async fn update_many(&self, filter: &FeedFilter, updates: &[FieldUpdate]) -> Result<u64>;
}

/// Rate comparison used by schedule lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMatch {
    Equal(u64),
    NotEqual(u64),
}

impl RateMatch {
    pub fn accepts(&self, rate: u64) -> bool {
        match self {
            RateMatch::Equal(r) => rate == *r,
            RateMatch::NotEqual(r) => rate != *r,
        }
    }
}

/// Backing store of custom schedules. Read-only to the scheduler.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn find_schedules(&self, rate: RateMatch) -> Result<Vec<CustomSchedule>>;

    /// Every distinct rate that has at least one schedule.
    async fn list_rates(&self) -> Result<Vec<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, Destination, MessageTemplate};

    #[test]
    fn test_apply_connection_update_ignores_missing_index() {
        let mut feed = Feed::new("f1", "https://a.com", "u1");
        feed.connections.webhooks.push(Connection {
            id: "w1".into(),
            name: String::new(),
            destination: Destination::Channel { guild_id: "g".into(), channel_id: "c".into() },
            template: MessageTemplate::default(),
            filter_expression: None,
            disabled_code: None,
        });
        let before = feed.clone();
        FieldUpdate::ConnectionDisabledCode {
            kind: ConnectionKind::Webhook,
            index: 3,
            code: DisabledCode::BadFormat,
        }
        .apply(&mut feed);
        assert_eq!(feed, before);

        FieldUpdate::ConnectionDisabledCode {
            kind: ConnectionKind::Webhook,
            index: 0,
            code: DisabledCode::BadFormat,
        }
        .apply(&mut feed);
        assert_eq!(feed.connections.webhooks[0].disabled_code, Some(DisabledCode::BadFormat));
    }

    #[test]
    fn test_rate_match() {
        assert!(RateMatch::Equal(60).accepts(60));
        assert!(!RateMatch::Equal(60).accepts(600));
        assert!(RateMatch::NotEqual(60).accepts(600));
    }
}
