//! Tier Engine — one tokio interval loop per refresh-rate tier.
//! Ticks of the same tier never overlap; different tiers run concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use cadence_core::error::{CadenceError, Result};

use crate::dispatch::{DispatchOrchestrator, TickReport};

/// Running counters for one tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub rate_seconds: u64,
    pub ticks_run: u64,
    pub ticks_failed: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<TickReport>,
}

/// Drives every tier's ticks.
#[derive(Clone)]
pub struct TierEngine {
    orchestrator: Arc<DispatchOrchestrator>,
    run_on_start: bool,
    /// How often newly claimed rates are looked for once running.
    discovery_interval: Duration,
    /// Per-tier lock, held for the duration of a tick. Tiers are only added.
    tiers: Arc<Mutex<BTreeMap<u64, Arc<Mutex<()>>>>>,
    stats: Arc<Mutex<BTreeMap<u64, TierStats>>>,
}

impl TierEngine {
    /// Build an engine ticking the default rate, `extra_rates` and every rate
    /// currently claimed by a schedule or an entitled benefit override.
    pub async fn resolve(
        orchestrator: Arc<DispatchOrchestrator>,
        extra_rates: &[u64],
        run_on_start: bool,
    ) -> Result<Self> {
        let default_rate = orchestrator.default_rate();
        let engine = Self::with_rates(
            orchestrator,
            extra_rates.iter().copied().chain([default_rate]),
            run_on_start,
        );
        engine.refresh().await?;
        Ok(engine)
    }

    pub fn with_rates(
        orchestrator: Arc<DispatchOrchestrator>,
        rates: impl IntoIterator<Item = u64>,
        run_on_start: bool,
    ) -> Self {
        let rates: BTreeSet<u64> = rates.into_iter().filter(|r| *r > 0).collect();
        let stats = rates
            .iter()
            .map(|&rate| (rate, TierStats { rate_seconds: rate, ..Default::default() }))
            .collect();
        let discovery_interval = Duration::from_secs(orchestrator.default_rate().max(1));
        Self {
            orchestrator,
            run_on_start,
            discovery_interval,
            tiers: Arc::new(Mutex::new(
                rates.iter().map(|&r| (r, Arc::new(Mutex::new(())))).collect(),
            )),
            stats: Arc::new(Mutex::new(stats)),
        }
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub async fn rates(&self) -> Vec<u64> {
        self.tiers.lock().await.keys().copied().collect()
    }

    /// Add a tier for every rate claimed since the last look. Returns the
    /// rates added.
    pub async fn refresh(&self) -> Result<Vec<u64>> {
        let claimed = self.orchestrator.claimed_rates().await?;

        let mut tiers = self.tiers.lock().await;
        let mut stats = self.stats.lock().await;
        let mut added = Vec::new();
        for rate in claimed {
            if tiers.contains_key(&rate) {
                continue;
            }
            tiers.insert(rate, Arc::new(Mutex::new(())));
            stats.insert(rate, TierStats { rate_seconds: rate, ..Default::default() });
            added.push(rate);
        }
        Ok(added)
    }

    /// Run one tick of `rate` now, waiting for any in-flight tick of the
    /// same tier to finish first.
    pub async fn tick_now(&self, rate: u64) -> Result<TickReport> {
        let lock = self
            .tiers
            .lock()
            .await
            .get(&rate)
            .cloned()
            .ok_or_else(|| CadenceError::NotFound(format!("tier {rate}s")))?;
        let _guard = lock.lock().await;

        let result = self.orchestrator.run_tick(rate).await;

        let mut stats = self.stats.lock().await;
        let entry = stats.entry(rate).or_default();
        entry.rate_seconds = rate;
        entry.ticks_run += 1;
        entry.last_run = Some(Utc::now());
        match &result {
            Ok(report) => {
                entry.last_error = None;
                entry.last_report = Some(report.clone());
            }
            Err(e) => {
                entry.ticks_failed += 1;
                entry.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Snapshot of every tier's counters, fastest tier first.
    pub async fn stats(&self) -> Vec<TierStats> {
        self.stats.lock().await.values().cloned().collect()
    }

    /// Spawn the supervisor. It runs one loop per tier and starts loops for
    /// rates claimed later. Aborting the handle stops every tier loop.
    pub fn start(&self) -> JoinHandle<()> {
        tracing::info!(
            "⏰ Tier engine started (default {}s, rediscovering every {}s)",
            self.orchestrator.default_rate(),
            self.discovery_interval.as_secs()
        );
        tokio::spawn(self.clone().supervise())
    }

    async fn supervise(self) {
        let mut loops = JoinSet::new();
        let mut running = BTreeSet::new();
        let mut discovery = tokio::time::interval(self.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            for rate in self.rates().await {
                if running.insert(rate) {
                    tracing::info!("⏰ Tier {}s loop started", rate);
                    let engine = self.clone();
                    loops.spawn(async move { engine.run_tier(rate).await });
                }
            }

            discovery.tick().await;
            match self.refresh().await {
                Ok(added) if !added.is_empty() => {
                    tracing::info!("🆕 New tier(s) claimed: {:?}s", added);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("⚠️ Tier discovery failed, keeping current tiers: {e}"),
            }
        }
    }

    async fn run_tier(&self, rate: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(rate));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_start {
            // The first tick completes immediately.
            interval.tick().await;
        }

        loop {
            interval.tick().await;
            match self.tick_now(rate).await {
                Ok(report) if report.failures() > 0 => {
                    tracing::warn!(
                        "⚠️ Tier {}s finished with {} publish failure(s)",
                        rate,
                        report.failures()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("❌ Tier {}s tick failed, retrying next interval: {e}", rate);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benefits::StaticBenefits;
    use crate::broker::MemoryBroker;
    use crate::registry::ScheduleRegistry;
    use crate::selector::TierSelector;
    use crate::store::{MemoryFeedStore, MemoryScheduleStore};
    use cadence_core::types::{
        Benefit, Connection, CustomSchedule, Destination, Feed, MessageTemplate, RoutingKey,
    };

    fn feed(id: &str, url: &str, user: &str) -> Feed {
        let mut feed = Feed::new(id, url, user);
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

    fn build(
        schedules: MemoryScheduleStore,
        benefits: Vec<Benefit>,
        feeds: Vec<Feed>,
        broker: Arc<MemoryBroker>,
    ) -> Arc<DispatchOrchestrator> {
        Arc::new(DispatchOrchestrator::new(
            Arc::new(MemoryFeedStore::new(feeds)),
            TierSelector::new(600, ScheduleRegistry::new(Arc::new(schedules))),
            Arc::new(StaticBenefits::new(benefits)),
            broker,
        ))
    }

    fn orchestrator(broker: Arc<MemoryBroker>) -> Arc<DispatchOrchestrator> {
        let schedules = MemoryScheduleStore::new(vec![
            CustomSchedule::new("fast", 60).with_keywords(&["fast"]),
            CustomSchedule::new("slow", 86_400).with_feed_ids(&["archive"]),
        ]);
        let feeds = vec![
            feed("a", "https://fast.example/rss", "u"),
            feed("b", "https://normal.example/rss", "u"),
        ];
        build(schedules, vec![], feeds, broker)
    }

    fn vip(rate: u64) -> Benefit {
        Benefit {
            user_id: "vip".into(),
            is_entitled: true,
            refresh_rate_seconds: Some(rate),
            max_daily_articles: None,
        }
    }

    async fn wait_for(engine: &TierEngine, done: impl Fn(&[TierStats]) -> bool) -> Vec<TierStats> {
        for _ in 0..200 {
            let stats = engine.stats().await;
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        engine.stats().await
    }

    #[tokio::test]
    async fn test_rates_include_default_extras_and_schedules() {
        let engine = TierEngine::resolve(orchestrator(Arc::new(MemoryBroker::new())), &[120, 0], true)
            .await
            .unwrap();
        assert_eq!(engine.rates().await, vec![60, 120, 600, 86_400]);
    }

    #[tokio::test]
    async fn test_benefit_only_rate_is_ticked() {
        let broker = Arc::new(MemoryBroker::new());
        let orchestrator = build(
            MemoryScheduleStore::default(),
            vec![vip(300)],
            vec![feed("v", "https://vip.example/rss", "vip")],
            broker.clone(),
        );
        let engine = TierEngine::resolve(orchestrator, &[], false).await.unwrap();
        assert_eq!(engine.rates().await, vec![300, 600]);

        let mut delivered = 0;
        for rate in engine.rates().await {
            delivered += engine.tick_now(rate).await.unwrap().deliveries_published;
        }
        assert_eq!(delivered, 1);
        assert_eq!(engine.stats().await[0].last_report.as_ref().unwrap().deliveries_published, 1);
        assert_eq!(broker.history_for(RoutingKey::DeliveryRequest).len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_adds_only_new_rates() {
        let schedules = MemoryScheduleStore::default();
        let orchestrator = build(schedules.clone(), vec![vip(600)], vec![], Arc::new(MemoryBroker::new()));
        let engine = TierEngine::resolve(orchestrator, &[], false).await.unwrap();
        assert_eq!(engine.rates().await, vec![600]);
        assert!(engine.refresh().await.unwrap().is_empty());

        schedules.insert(CustomSchedule::new("hourly", 3600).with_keywords(&["x"])).unwrap();
        assert_eq!(engine.refresh().await.unwrap(), vec![3600]);
        assert_eq!(engine.rates().await, vec![600, 3600]);
        assert!(engine.tick_now(3600).await.is_ok());
    }

    #[tokio::test]
    async fn test_running_engine_picks_up_new_schedule_rates() {
        let schedules = MemoryScheduleStore::default();
        let orchestrator = build(
            schedules.clone(),
            vec![],
            vec![feed("f", "https://fast.example/rss", "u")],
            Arc::new(MemoryBroker::new()),
        );
        let engine = TierEngine::with_rates(orchestrator, [600], true)
            .with_discovery_interval(Duration::from_millis(20));
        let handle = engine.start();

        schedules.insert(CustomSchedule::new("fast", 60).with_keywords(&["fast"])).unwrap();
        let stats = wait_for(&engine, |stats| {
            stats.iter().any(|s| s.rate_seconds == 60 && s.ticks_run >= 1)
        })
        .await;
        let fast = stats.iter().find(|s| s.rate_seconds == 60).unwrap();
        assert_eq!(fast.last_report.as_ref().unwrap().deliveries_published, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_tick_now_records_stats() {
        let broker = Arc::new(MemoryBroker::new());
        let engine = TierEngine::with_rates(orchestrator(broker.clone()), [60, 600], false);

        let report = engine.tick_now(60).await.unwrap();
        assert_eq!(report.deliveries_published, 1);
        engine.tick_now(60).await.unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats[0].rate_seconds, 60);
        assert_eq!(stats[0].ticks_run, 2);
        assert_eq!(stats[0].ticks_failed, 0);
        assert!(stats[0].last_report.is_some());
        assert_eq!(stats[1].ticks_run, 0);
        assert_eq!(broker.history_for(RoutingKey::DeliveryRequest).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tier_is_not_found() {
        let engine = TierEngine::with_rates(orchestrator(Arc::new(MemoryBroker::new())), [600], false);
        let err = engine.tick_now(5).await.unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_run_on_start_fires_every_tier() {
        let broker = Arc::new(MemoryBroker::new());
        let engine = TierEngine::with_rates(orchestrator(broker.clone()), [60, 600], true);
        let handle = engine.start();

        let stats = wait_for(&engine, |stats| stats.iter().all(|s| s.ticks_run >= 1)).await;
        assert!(stats.iter().all(|s| s.ticks_run == 1));
        handle.abort();
    }
}
