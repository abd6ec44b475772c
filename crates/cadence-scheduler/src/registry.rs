//! Schedule Registry — read-only lookups of custom schedules by rate.

use std::sync::Arc;

use cadence_core::error::Result;
use cadence_core::traits::{RateMatch, ScheduleStore};
use cadence_core::types::CustomSchedule;

/// Thin query layer over the schedule backing store.
#[derive(Clone)]
pub struct ScheduleRegistry {
    store: Arc<dyn ScheduleStore>,
}

impl ScheduleRegistry {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// All schedules whose rate equals `rate`.
    pub async fn schedules_matching_rate(&self, rate: u64) -> Result<Vec<CustomSchedule>> {
        let schedules = self.store.find_schedules(RateMatch::Equal(rate)).await?;
        tracing::debug!("🗂️ {} schedule(s) at {}s", schedules.len(), rate);
        Ok(schedules)
    }

    /// All schedules whose rate is not `rate`.
    pub async fn schedules_excluding(&self, rate: u64) -> Result<Vec<CustomSchedule>> {
        let schedules = self.store.find_schedules(RateMatch::NotEqual(rate)).await?;
        tracing::debug!("🗂️ {} schedule(s) not at {}s", schedules.len(), rate);
        Ok(schedules)
    }

    /// Distinct rates that have at least one schedule.
    pub async fn known_rates(&self) -> Result<Vec<u64>> {
        self.store.list_rates().await
    }
}
