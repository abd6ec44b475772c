//! In-memory feed and schedule stores, plus the paged cursor shared by every
//! store adapter.
//! Seeded from a JSON snapshot file — handy for dry runs and tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use cadence_core::error::{CadenceError, Result};
use cadence_core::filter::FeedFilter;
use cadence_core::traits::{FeedCursor, FeedStore, FieldUpdate, RateMatch, ScheduleStore};
use cadence_core::types::{CustomSchedule, Feed};

/// One page request issued by a cursor.
///
/// The first page skips `skip` matching feeds; later pages continue strictly
/// after the id of the last feed returned, so feeds leaving the result set
/// mid-iteration do not shift the remaining ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub after: Option<String>,
    pub skip: usize,
    pub limit: usize,
}

struct CursorState<F> {
    fetch: F,
    next: PageRequest,
    buffer: VecDeque<Feed>,
    exhausted: bool,
}

/// Build a lazy cursor from a page fetcher. Only one page is buffered.
pub fn paged_cursor<F, Fut>(fetch: F, offset: usize, page_size: usize) -> FeedCursor
where
    F: Fn(PageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Feed>>> + Send + 'static,
{
    let state = CursorState {
        fetch,
        next: PageRequest {
            after: None,
            skip: offset,
            limit: page_size.max(1),
        },
        buffer: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        if st.buffer.is_empty() && !st.exhausted {
            match (st.fetch)(st.next.clone()).await {
                Ok(page) => {
                    if page.len() < st.next.limit {
                        st.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        st.next.after = Some(last.id.clone());
                        st.next.skip = 0;
                    }
                    st.buffer.extend(page);
                }
                Err(e) => {
                    st.exhausted = true;
                    return Some((Err(e), st));
                }
            }
        }
        st.buffer.pop_front().map(|feed| (Ok(feed), st))
    })
    .boxed()
}

fn poisoned() -> CadenceError {
    CadenceError::Store("memory store lock poisoned".into())
}

/// Feeds held in process, ordered by id.
#[derive(Clone)]
pub struct MemoryFeedStore {
    feeds: Arc<RwLock<BTreeMap<String, Feed>>>,
    page_size: usize,
}

impl MemoryFeedStore {
    pub fn new(feeds: Vec<Feed>) -> Self {
        Self::with_page_size(feeds, 100)
    }

    pub fn with_page_size(feeds: Vec<Feed>, page_size: usize) -> Self {
        let feeds = feeds.into_iter().map(|f| (f.id.clone(), f)).collect();
        Self {
            feeds: Arc::new(RwLock::new(feeds)),
            page_size: page_size.max(1),
        }
    }

    /// Insert or replace a feed.
    pub fn insert(&self, feed: Feed) -> Result<()> {
        let mut feeds = self.feeds.write().map_err(|_| poisoned())?;
        feeds.insert(feed.id.clone(), feed);
        Ok(())
    }

    /// Copy of every stored feed, ordered by id.
    pub fn all(&self) -> Result<Vec<Feed>> {
        let feeds = self.feeds.read().map_err(|_| poisoned())?;
        Ok(feeds.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.feeds.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn page(&self, filter: &FeedFilter, req: &PageRequest) -> Result<Vec<Feed>> {
        let feeds = self.feeds.read().map_err(|_| poisoned())?;
        let iter: Box<dyn Iterator<Item = &Feed>> = match &req.after {
            Some(after) => Box::new(
                feeds
                    .range::<String, _>((
                        std::ops::Bound::Excluded(after),
                        std::ops::Bound::Unbounded,
                    ))
                    .map(|(_, f)| f),
            ),
            None => Box::new(feeds.values()),
        };
        Ok(iter
            .filter(|f| filter.matches(f))
            .skip(req.skip)
            .take(req.limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn distinct_urls(&self, filter: &FeedFilter) -> Result<Vec<String>> {
        let feeds = self.feeds.read().map_err(|_| poisoned())?;
        let urls: BTreeSet<String> = feeds
            .values()
            .filter(|f| filter.matches(f))
            .map(|f| f.url.clone())
            .collect();
        Ok(urls.into_iter().collect())
    }

    async fn find(&self, filter: &FeedFilter, offset: usize) -> Result<FeedCursor> {
        let store = self.clone();
        let filter = Arc::new(filter.clone());
        Ok(paged_cursor(
            move |req| {
                let store = store.clone();
                let filter = filter.clone();
                async move { store.page(&filter, &req) }
            },
            offset,
            self.page_size,
        ))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Feed>> {
        let feeds = self.feeds.read().map_err(|_| poisoned())?;
        Ok(feeds.get(id).cloned())
    }

    async fn update_by_id(&self, id: &str, updates: &[FieldUpdate]) -> Result<bool> {
        let mut feeds = self.feeds.write().map_err(|_| poisoned())?;
        match feeds.get_mut(id) {
            Some(feed) => {
                for update in updates {
                    update.apply(feed);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_many(&self, filter: &FeedFilter, updates: &[FieldUpdate]) -> Result<u64> {
        let mut feeds = self.feeds.write().map_err(|_| poisoned())?;
        let mut matched = 0;
        for feed in feeds.values_mut().filter(|f| filter.matches(f)) {
            for update in updates {
                update.apply(feed);
            }
            matched += 1;
        }
        Ok(matched)
    }
}

/// Custom schedules held in process.
#[derive(Clone, Default)]
pub struct MemoryScheduleStore {
    schedules: Arc<RwLock<Vec<CustomSchedule>>>,
}

impl MemoryScheduleStore {
    pub fn new(schedules: Vec<CustomSchedule>) -> Self {
        Self {
            schedules: Arc::new(RwLock::new(schedules)),
        }
    }

    pub fn insert(&self, schedule: CustomSchedule) -> Result<()> {
        self.schedules.write().map_err(|_| poisoned())?.push(schedule);
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<CustomSchedule>> {
        Ok(self.schedules.read().map_err(|_| poisoned())?.clone())
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn find_schedules(&self, rate: RateMatch) -> Result<Vec<CustomSchedule>> {
        let schedules = self.schedules.read().map_err(|_| poisoned())?;
        Ok(schedules
            .iter()
            .filter(|s| rate.accepts(s.refresh_rate_seconds))
            .cloned()
            .collect())
    }

    async fn list_rates(&self) -> Result<Vec<u64>> {
        let schedules = self.schedules.read().map_err(|_| poisoned())?;
        let rates: BTreeSet<u64> = schedules.iter().map(|s| s.refresh_rate_seconds).collect();
        Ok(rates.into_iter().collect())
    }
}

/// JSON snapshot of feeds and schedules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default)]
    pub schedules: Vec<CustomSchedule>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&json)?;
        tracing::debug!(
            "📂 Loaded snapshot {}: {} feeds, {} schedules",
            path.display(),
            snapshot.feeds.len(),
            snapshot.schedules.len()
        );
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!("💾 Saved snapshot to {}", path.display());
        Ok(())
    }

    pub fn into_stores(self, page_size: usize) -> (MemoryFeedStore, MemoryScheduleStore) {
        (
            MemoryFeedStore::with_page_size(self.feeds, page_size),
            MemoryScheduleStore::new(self.schedules),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{
        Connection, ConnectionKind, Destination, DisabledCode, HealthStatus, MessageTemplate,
    };
    use futures::TryStreamExt;

    fn feed(id: &str, url: &str) -> Feed {
        let mut feed = Feed::new(id, url, "u1");
        feed.connections.channels.push(Connection {
            id: format!("{id}-c"),
            name: String::new(),
            destination: Destination::Channel { guild_id: "g".into(), channel_id: "c".into() },
            template: MessageTemplate::default(),
            filter_expression: None,
            disabled_code: None,
        });
        feed
    }

    fn store(n: usize, page_size: usize) -> MemoryFeedStore {
        let feeds = (0..n)
            .map(|i| feed(&format!("f{i:03}"), &format!("https://site{}.com/rss", i % 3)))
            .collect();
        MemoryFeedStore::with_page_size(feeds, page_size)
    }

    #[tokio::test]
    async fn test_cursor_pages_through_everything() {
        let store = store(25, 4);
        let filter = FeedFilter::All(vec![]);
        let feeds: Vec<Feed> = store.find(&filter, 0).await.unwrap().try_collect().await.unwrap();
        assert_eq!(feeds.len(), 25);
        assert_eq!(feeds[0].id, "f000");
        assert_eq!(feeds[24].id, "f024");
    }

    #[tokio::test]
    async fn test_cursor_restarts_at_offset() {
        let store = store(10, 3);
        let filter = FeedFilter::All(vec![]);
        let feeds: Vec<Feed> = store.find(&filter, 7).await.unwrap().try_collect().await.unwrap();
        let ids: Vec<_> = feeds.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f007", "f008", "f009"]);
    }

    #[tokio::test]
    async fn test_cursor_survives_concurrent_disable() {
        let store = store(6, 2);
        let filter = FeedFilter::All(FeedFilter::eligible());
        let mut cursor = store.find(&filter, 0).await.unwrap();

        let first = cursor.next().await.unwrap().unwrap();
        assert_eq!(first.id, "f000");
        // Disabling an already-returned feed must not shift the rest.
        store
            .update_by_id("f000", &[FieldUpdate::DisabledCode(DisabledCode::Manual)])
            .await
            .unwrap();
        let rest: Vec<Feed> = cursor.try_collect().await.unwrap();
        assert_eq!(rest.len(), 5);
    }

    #[tokio::test]
    async fn test_cursor_surfaces_fetch_errors() {
        let cursor = paged_cursor(
            |_req| async { Err(CadenceError::Store("gone".into())) },
            0,
            10,
        );
        let items: Vec<Result<Feed>> = cursor.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_distinct_urls() {
        let store = store(9, 100);
        let urls = store.distinct_urls(&FeedFilter::All(vec![])).await.unwrap();
        assert_eq!(urls.len(), 3);
    }

    #[tokio::test]
    async fn test_update_many_by_url() {
        let store = store(9, 100);
        let filter = FeedFilter::UrlEquals("https://site1.com/rss".into());
        let updates = [
            FieldUpdate::DisabledCode(DisabledCode::FailedRequests),
            FieldUpdate::HealthStatus(HealthStatus::Failed),
        ];
        assert_eq!(store.update_many(&filter, &updates).await.unwrap(), 3);

        let failed = store
            .all()
            .unwrap()
            .into_iter()
            .filter(|f| f.health_status == HealthStatus::Failed)
            .count();
        assert_eq!(failed, 3);
    }

    #[tokio::test]
    async fn test_update_connection_field() {
        let store = store(1, 10);
        let found = store
            .update_by_id(
                "f000",
                &[FieldUpdate::ConnectionDisabledCode {
                    kind: ConnectionKind::Channel,
                    index: 0,
                    code: DisabledCode::BadFormat,
                }],
            )
            .await
            .unwrap();
        assert!(found);
        let feed = store.find_by_id("f000").await.unwrap().unwrap();
        assert_eq!(feed.connections.channels[0].disabled_code, Some(DisabledCode::BadFormat));
        assert!(!store.update_by_id("missing", &[]).await.unwrap());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = std::env::temp_dir().join("cadence-test-snapshot");
        let path = dir.join("snapshot.json");
        let snapshot = Snapshot {
            feeds: vec![feed("a", "https://a.com")],
            schedules: vec![CustomSchedule::new("fast", 60).with_keywords(&["a.com"])],
        };
        snapshot.save(&path).unwrap();

        let (feeds, schedules) = Snapshot::load(&path).unwrap().into_stores(10);
        assert_eq!(feeds.len(), 1);
        assert_eq!(schedules.all().unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
