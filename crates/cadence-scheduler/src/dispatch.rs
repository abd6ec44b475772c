//! Tick dispatch — turns one tier tick into fetch and delivery events.
//!
//! A tick resolves benefits once, asks the [`TierSelector`] for the tier's
//! filter, publishes one fetch request per distinct URL (bounded fan-out) and
//! then walks the feed cursor publishing one delivery request per feed.
//! Per-item failures are counted in the [`TickReport`], never fatal.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;

use cadence_core::error::Result;
use cadence_core::filter::FeedFilter;
use cadence_core::traits::{BenefitResolver, EventPublisher, FeedStore, TemplateRenderer};
use cadence_core::types::{
    Benefit, DeliveryRequest, Envelope, Feed, FetchRequest, Medium, MediumFilters, RoutingKey,
};

use crate::render::DiscordRenderer;
use crate::selector::TierSelector;

/// Medium type stamped on every delivery target.
const MEDIUM_KIND: &str = "discord";

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub rate_seconds: u64,
    pub urls_total: usize,
    pub urls_published: usize,
    pub url_failures: usize,
    pub feeds_total: usize,
    pub deliveries_published: usize,
    pub delivery_failures: usize,
    /// Feeds whose connections are all disabled.
    pub skipped_without_mediums: usize,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl TickReport {
    pub fn failures(&self) -> usize {
        self.url_failures + self.delivery_failures
    }
}

mod millis {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// What a tick would touch, without publishing anything.
#[derive(Debug, Clone, Serialize)]
pub struct TierPlan {
    pub rate_seconds: u64,
    pub urls: Vec<String>,
    pub feed_ids: Vec<String>,
}

/// Runs tier ticks against the store, benefit service and broker.
pub struct DispatchOrchestrator {
    feeds: Arc<dyn FeedStore>,
    selector: TierSelector,
    benefits: Arc<dyn BenefitResolver>,
    publisher: Arc<dyn EventPublisher>,
    renderer: Arc<dyn TemplateRenderer>,
    max_daily_default: u32,
    publish_concurrency: usize,
}

impl DispatchOrchestrator {
    pub fn new(
        feeds: Arc<dyn FeedStore>,
        selector: TierSelector,
        benefits: Arc<dyn BenefitResolver>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            feeds,
            selector,
            benefits,
            publisher,
            renderer: Arc::new(DiscordRenderer),
            max_daily_default: 50,
            publish_concurrency: 16,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_max_daily_default(mut self, limit: u32) -> Self {
        self.max_daily_default = limit;
        self
    }

    pub fn with_publish_concurrency(mut self, n: usize) -> Self {
        self.publish_concurrency = n.max(1);
        self
    }

    pub fn selector(&self) -> &TierSelector {
        &self.selector
    }

    pub fn default_rate(&self) -> u64 {
        self.selector.default_rate()
    }

    /// Every rate something currently claims: the default, each schedule rate
    /// and each entitled user's override.
    pub async fn claimed_rates(&self) -> Result<BTreeSet<u64>> {
        let schedule_rates = self.selector.registry().known_rates().await?;
        let mut rates: BTreeSet<u64> = schedule_rates.into_iter().collect();
        let benefits = self.benefits.list_benefits().await?;
        rates.extend(benefits.iter().filter_map(Benefit::effective_rate));
        rates.insert(self.default_rate());
        rates.remove(&0);
        Ok(rates)
    }

    /// Resolve benefits and build the filter for `rate`.
    async fn select(&self, rate: u64) -> Result<(FeedFilter, Vec<Benefit>)> {
        let benefits = self.benefits.list_benefits().await?;
        tracing::debug!(
            "💳 {} benefit(s) from {} resolver",
            benefits.len(),
            self.benefits.name()
        );
        let filter = self.selector.select(rate, &benefits).await?;
        Ok((filter, benefits))
    }

    /// List the URLs and feeds `rate` would cover right now.
    pub async fn plan(&self, rate: u64) -> Result<TierPlan> {
        let (filter, _) = self.select(rate).await?;
        let urls = self.feeds.distinct_urls(&filter).await?;
        let feed_ids = self
            .feeds
            .find(&filter, 0)
            .await?
            .map_ok(|feed| feed.id)
            .try_collect()
            .await?;
        Ok(TierPlan {
            rate_seconds: rate,
            urls,
            feed_ids,
        })
    }

    /// Run one tick of the tier at `rate`.
    ///
    /// Fails only when benefits, schedules, the URL query or the cursor fail;
    /// individual publish failures are logged and counted.
    pub async fn run_tick(&self, rate: u64) -> Result<TickReport> {
        let started = Instant::now();
        let mut report = TickReport {
            rate_seconds: rate,
            ..Default::default()
        };

        let (filter, benefits) = self.select(rate).await?;
        let limits = daily_limits(&benefits);
        tracing::debug!("🎯 Tier {}s filter has {} clause(s)", rate, filter.clause_count());

        let urls = self.feeds.distinct_urls(&filter).await?;
        report.urls_total = urls.len();
        report.url_failures = self.publish_fetches(rate, urls).await;
        report.urls_published = report.urls_total - report.url_failures;

        let mut cursor = self.feeds.find(&filter, 0).await?;
        while let Some(feed) = cursor.try_next().await? {
            report.feeds_total += 1;
            let limit = limits
                .get(feed.user_id.as_str())
                .copied()
                .unwrap_or(self.max_daily_default);

            let Some(request) = self.delivery_request(&feed, limit) else {
                tracing::debug!("⏭️ Feed {} has no active connections", feed.id);
                report.skipped_without_mediums += 1;
                continue;
            };
            match self.publish(RoutingKey::DeliveryRequest, &request).await {
                Ok(()) => report.deliveries_published += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Delivery request for feed {} failed: {e}", feed.id);
                    report.delivery_failures += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            "✅ Tier {}s: {}/{} urls, {}/{} feeds, {} skipped in {:?}",
            rate,
            report.urls_published,
            report.urls_total,
            report.deliveries_published,
            report.feeds_total,
            report.skipped_without_mediums,
            report.elapsed
        );
        Ok(report)
    }

    /// Publish fetch requests concurrently. Returns the number that failed.
    async fn publish_fetches(&self, rate: u64, urls: Vec<String>) -> usize {
        let failures = AtomicUsize::new(0);
        futures::stream::iter(urls)
            .for_each_concurrent(self.publish_concurrency, |url| {
                let failures = &failures;
                async move {
                    let request = FetchRequest {
                        url,
                        rate_seconds: rate,
                    };
                    if let Err(e) = self.publish(RoutingKey::FetchRequest, &request).await {
                        tracing::warn!("⚠️ Fetch request for {} failed: {e}", request.url);
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;
        failures.into_inner()
    }

    async fn publish<T: Serialize>(&self, key: RoutingKey, payload: &T) -> Result<()> {
        let envelope = Envelope::new(key, payload)?;
        self.publisher.publish(envelope).await
    }

    /// Build the delivery request for a feed, or None if nothing is active.
    pub fn delivery_request(&self, feed: &Feed, article_day_limit: u32) -> Option<DeliveryRequest> {
        let mediums: Vec<Medium> = feed
            .connections
            .iter()
            .filter(|(_, _, con)| con.is_active())
            .map(|(_, _, con)| {
                let rendered = self.renderer.render(&con.template);
                Medium {
                    id: con.id.clone(),
                    kind: MEDIUM_KIND.to_string(),
                    filters: con
                        .filter_expression
                        .clone()
                        .map(|expression| MediumFilters { expression }),
                    destination: con.destination.clone(),
                    content: rendered.content,
                    embeds: rendered.embeds,
                }
            })
            .collect();

        if mediums.is_empty() {
            return None;
        }
        Some(DeliveryRequest {
            feed_id: feed.id.clone(),
            url: feed.url.clone(),
            passing_comparisons: feed.passing_comparisons.clone(),
            blocking_comparisons: feed.blocking_comparisons.clone(),
            article_day_limit,
            mediums,
        })
    }
}

/// Per-user daily delivery overrides. Zero counts as absent; the last
/// benefit for a user wins.
fn daily_limits(benefits: &[Benefit]) -> HashMap<&str, u32> {
    let mut limits = HashMap::new();
    for benefit in benefits {
        match benefit.max_daily_articles {
            Some(n) if n > 0 => {
                limits.insert(benefit.user_id.as_str(), n);
            }
            _ => {
                limits.remove(benefit.user_id.as_str());
            }
        }
    }
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benefits::StaticBenefits;
    use crate::broker::MemoryBroker;
    use crate::registry::ScheduleRegistry;
    use crate::store::{MemoryFeedStore, MemoryScheduleStore};
    use async_trait::async_trait;
    use cadence_core::CadenceError;
    use cadence_core::types::{
        Connection, CustomSchedule, Destination, DisabledCode, EmbedTemplate, MessageTemplate,
    };
    use std::collections::HashSet;

    /// Records successful publishes; fails delivery requests for chosen feeds
    /// and fetch requests for chosen URLs.
    #[derive(Default)]
    struct FlakyPublisher {
        inner: MemoryBroker,
        failing_feeds: HashSet<String>,
        failing_urls: HashSet<String>,
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn publish(&self, envelope: Envelope) -> Result<()> {
            let fails = match envelope.routing_key {
                RoutingKey::DeliveryRequest => {
                    let req: DeliveryRequest = envelope.decode()?;
                    self.failing_feeds.contains(&req.feed_id)
                }
                RoutingKey::FetchRequest => {
                    let req: FetchRequest = envelope.decode()?;
                    self.failing_urls.contains(&req.url)
                }
                _ => false,
            };
            if fails {
                return Err(CadenceError::Broker("channel closed".into()));
            }
            self.inner.publish(envelope).await
        }
    }

    struct DownBilling;

    #[async_trait]
    impl BenefitResolver for DownBilling {
        fn name(&self) -> &str {
            "down"
        }

        async fn list_benefits(&self) -> Result<Vec<Benefit>> {
            Err(CadenceError::Benefits("503 from billing".into()))
        }
    }

    fn connection(id: &str) -> Connection {
        Connection {
            id: id.into(),
            name: String::new(),
            destination: Destination::Channel { guild_id: "g".into(), channel_id: id.into() },
            template: MessageTemplate {
                content: Some(" {{title}} ".into()),
                embeds: vec![EmbedTemplate {
                    title: Some("{{title}}".into()),
                    color: Some("#FF0000".into()),
                    ..Default::default()
                }],
            },
            filter_expression: None,
            disabled_code: None,
        }
    }

    fn feed(id: &str, url: &str, user: &str) -> Feed {
        let mut feed = Feed::new(id, url, user);
        feed.connections.channels.push(connection(&format!("{id}-c")));
        feed
    }

    fn orchestrator(
        feeds: Vec<Feed>,
        schedules: Vec<CustomSchedule>,
        benefits: Vec<Benefit>,
        publisher: Arc<dyn EventPublisher>,
    ) -> DispatchOrchestrator {
        let registry = ScheduleRegistry::new(Arc::new(MemoryScheduleStore::new(schedules)));
        DispatchOrchestrator::new(
            Arc::new(MemoryFeedStore::with_page_size(feeds, 2)),
            TierSelector::new(600, registry),
            Arc::new(StaticBenefits::new(benefits)),
            publisher,
        )
        .with_max_daily_default(50)
        .with_publish_concurrency(4)
    }

    fn deliveries(broker: &MemoryBroker) -> Vec<DeliveryRequest> {
        broker
            .history_for(RoutingKey::DeliveryRequest)
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_failing_feed_does_not_stop_the_rest() {
        let broker = MemoryBroker::new();
        let publisher = Arc::new(FlakyPublisher {
            inner: broker.clone(),
            failing_feeds: HashSet::from(["f3".to_string()]),
            ..Default::default()
        });
        let feeds = (1..=5)
            .map(|i| feed(&format!("f{i}"), &format!("https://site{i}.com"), "u"))
            .collect();
        let orch = orchestrator(feeds, vec![], vec![], publisher);

        let report = orch.run_tick(600).await.unwrap();
        assert_eq!(report.feeds_total, 5);
        assert_eq!(report.deliveries_published, 4);
        assert_eq!(report.delivery_failures, 1);

        let ids: Vec<String> = deliveries(&broker).into_iter().map(|d| d.feed_id).collect();
        assert!(ids.contains(&"f4".to_string()));
        assert!(ids.contains(&"f5".to_string()));
        assert!(!ids.contains(&"f3".to_string()));
    }

    #[tokio::test]
    async fn test_urls_are_deduplicated_and_failures_counted() {
        let broker = MemoryBroker::new();
        let publisher = Arc::new(FlakyPublisher {
            inner: broker.clone(),
            failing_urls: HashSet::from(["https://b.com".to_string()]),
            ..Default::default()
        });
        let feeds = vec![
            feed("f1", "https://a.com", "u"),
            feed("f2", "https://a.com", "u"),
            feed("f3", "https://b.com", "u"),
            feed("f4", "https://c.com", "u"),
        ];
        let orch = orchestrator(feeds, vec![], vec![], publisher);

        let report = orch.run_tick(600).await.unwrap();
        assert_eq!(report.urls_total, 3);
        assert_eq!(report.urls_published, 2);
        assert_eq!(report.url_failures, 1);
        assert_eq!(report.failures(), 1);

        let fetches: Vec<FetchRequest> = broker
            .history_for(RoutingKey::FetchRequest)
            .iter()
            .map(|e| e.decode().unwrap())
            .collect();
        assert_eq!(fetches.len(), 2);
        assert!(fetches.iter().all(|f| f.rate_seconds == 600));
    }

    #[tokio::test]
    async fn test_daily_limit_and_mediums() {
        let broker = Arc::new(MemoryBroker::new());
        let mut mixed = feed("mixed", "https://a.com", "vip");
        let mut off = connection("off");
        off.disabled_code = Some(DisabledCode::BadFormat);
        mixed.connections.webhooks.push(off);
        mixed.connections.channels[0].filter_expression = Some(serde_json::json!({"type": "LOGICAL"}));

        let feeds = vec![mixed, feed("plain", "https://b.com", "free"), feed("zero", "https://c.com", "z")];
        let benefits = vec![
            Benefit {
                user_id: "vip".into(),
                is_entitled: true,
                refresh_rate_seconds: None,
                max_daily_articles: Some(500),
            },
            Benefit {
                user_id: "z".into(),
                is_entitled: true,
                refresh_rate_seconds: None,
                max_daily_articles: Some(0),
            },
        ];
        let orch = orchestrator(feeds, vec![], benefits, broker.clone());
        orch.run_tick(600).await.unwrap();

        let by_id: HashMap<String, DeliveryRequest> = deliveries(&broker)
            .into_iter()
            .map(|d| (d.feed_id.clone(), d))
            .collect();
        let mixed = &by_id["mixed"];
        assert_eq!(mixed.article_day_limit, 500);
        assert_eq!(mixed.mediums.len(), 1);
        assert_eq!(mixed.mediums[0].id, "mixed-c");
        assert_eq!(mixed.mediums[0].kind, "discord");
        assert_eq!(mixed.mediums[0].content.as_deref(), Some("{{title}}"));
        assert_eq!(mixed.mediums[0].embeds[0].color, Some(0xFF0000));
        assert!(mixed.mediums[0].filters.is_some());
        assert_eq!(by_id["plain"].article_day_limit, 50);
        assert_eq!(by_id["zero"].article_day_limit, 50);
    }

    #[tokio::test]
    async fn test_feed_with_only_disabled_connections_is_skipped() {
        let broker = Arc::new(MemoryBroker::new());
        let mut dead = feed("dead", "https://a.com", "u");
        dead.connections.channels[0].disabled_code = Some(DisabledCode::MissingPermissions);
        let orch = orchestrator(vec![dead, feed("live", "https://b.com", "u")], vec![], vec![], broker.clone());

        let report = orch.run_tick(600).await.unwrap();
        assert_eq!(report.feeds_total, 2);
        assert_eq!(report.skipped_without_mediums, 1);
        assert_eq!(report.deliveries_published, 1);
    }

    #[tokio::test]
    async fn test_tiers_publish_disjoint_feeds() {
        let broker = Arc::new(MemoryBroker::new());
        let feeds = vec![
            feed("a", "https://nyt.com/rss", "u1"),
            feed("b", "https://other.com/rss", "u2"),
            feed("c", "https://third.com/rss", "u3"),
        ];
        let schedules = vec![CustomSchedule::new("news", 60).with_keywords(&["nyt"])];
        let benefits = vec![Benefit {
            user_id: "u2".into(),
            is_entitled: true,
            refresh_rate_seconds: Some(60),
            max_daily_articles: None,
        }];
        let orch = orchestrator(feeds, schedules, benefits, broker.clone());

        let fast = orch.run_tick(60).await.unwrap();
        let default = orch.run_tick(600).await.unwrap();
        assert_eq!(fast.deliveries_published, 2);
        assert_eq!(default.deliveries_published, 1);

        let plan = orch.plan(600).await.unwrap();
        assert_eq!(plan.feed_ids, vec!["c"]);
        assert_eq!(plan.urls, vec!["https://third.com/rss"]);
    }

    #[tokio::test]
    async fn test_benefit_failure_aborts_before_publishing() {
        let broker = Arc::new(MemoryBroker::new());
        let registry = ScheduleRegistry::new(Arc::new(MemoryScheduleStore::default()));
        let orch = DispatchOrchestrator::new(
            Arc::new(MemoryFeedStore::new(vec![feed("a", "https://a.com", "u")])),
            TierSelector::new(600, registry),
            Arc::new(DownBilling),
            broker.clone(),
        );

        let err = orch.run_tick(600).await.unwrap_err();
        assert!(matches!(err, CadenceError::Benefits(_)));
        assert!(broker.history().is_empty());
    }

    #[test]
    fn test_daily_limits_last_benefit_wins() {
        let benefit = |n| Benefit {
            user_id: "u".into(),
            is_entitled: true,
            refresh_rate_seconds: None,
            max_daily_articles: n,
        };
        let benefits = vec![benefit(Some(10)), benefit(Some(20))];
        assert_eq!(daily_limits(&benefits).get("u"), Some(&20));
        let benefits = vec![benefit(Some(10)), benefit(None)];
        assert!(daily_limits(&benefits).get("u").is_none());
    }
}
