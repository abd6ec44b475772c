//! Tier Selector — partitions feeds into refresh-rate tiers.
//!
//! Every eligible feed belongs to exactly one tier per tick:
//! ```text
//! claims (non-default rates only)       precedence
//!   explicit feed id in a schedule       1  (ties: lowest rate)
//!   URL matches a schedule keyword       2  (ties: lowest rate)
//!   owner's benefit overrides the rate   3
//! default tier = eligible feeds with no claim at all
//! ```
//! The default tier is built as an exclusion query and every other tier as
//! an inclusion query. The two are only complements at the partition level.

use std::collections::{BTreeSet, HashMap};

use cadence_core::error::Result;
use cadence_core::filter::{FeedFilter, UrlPattern};
use cadence_core::types::{Benefit, CustomSchedule};

use crate::registry::ScheduleRegistry;

/// Builds the selection predicate for a tier.
#[derive(Clone)]
pub struct TierSelector {
    default_rate: u64,
    registry: ScheduleRegistry,
}

impl TierSelector {
    pub fn new(default_rate: u64, registry: ScheduleRegistry) -> Self {
        Self {
            default_rate,
            registry,
        }
    }

    pub fn default_rate(&self) -> u64 {
        self.default_rate
    }

    pub fn registry(&self) -> &ScheduleRegistry {
        &self.registry
    }

    /// Predicate selecting the feeds due at `rate` for this tick.
    pub async fn select(&self, rate: u64, benefits: &[Benefit]) -> Result<FeedFilter> {
        let filter = if rate == self.default_rate {
            tracing::debug!("{}s is the default refresh rate", rate);
            let claiming = self.registry.schedules_excluding(rate).await?;
            default_tier_filter(self.default_rate, &claiming, benefits)
        } else {
            let own = self.registry.schedules_matching_rate(rate).await?;
            let others = self.registry.schedules_excluding(rate).await?;
            tier_filter(rate, self.default_rate, &own, &others, benefits)
        };
        tracing::debug!("🧮 Tier {}s predicate built ({} clauses)", rate, filter.clause_count());
        Ok(filter)
    }
}

/// Latest benefit per user, reduced to the overriding rate of entitled users.
fn user_rates(benefits: &[Benefit]) -> HashMap<&str, u64> {
    let mut latest: HashMap<&str, &Benefit> = HashMap::new();
    for benefit in benefits {
        latest.insert(benefit.user_id.as_str(), benefit);
    }
    latest
        .into_iter()
        .filter_map(|(user, benefit)| benefit.effective_rate().map(|rate| (user, rate)))
        .collect()
}

/// Compile every keyword of the given schedules. Invalid patterns are
/// reported and dropped, which makes them match nothing.
fn keyword_patterns<'a, I>(schedules: I) -> Vec<UrlPattern>
where
    I: IntoIterator<Item = &'a CustomSchedule>,
{
    let mut seen = BTreeSet::new();
    let mut patterns = Vec::new();
    for schedule in schedules {
        for keyword in &schedule.keywords {
            if !seen.insert(keyword.as_str()) {
                continue;
            }
            match UrlPattern::new(keyword) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => tracing::warn!(
                    "⚠️ Invalid keyword '{}' in schedule '{}' ignored: {}",
                    keyword,
                    schedule.name,
                    e
                ),
            }
        }
    }
    patterns
}

fn feed_ids<'a, I>(schedules: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a CustomSchedule>,
{
    schedules
        .into_iter()
        .flat_map(|s| s.feed_ids.iter().cloned())
        .collect()
}

fn push_excluded_ids(clauses: &mut Vec<FeedFilter>, ids: BTreeSet<String>) {
    if !ids.is_empty() {
        clauses.push(FeedFilter::not(FeedFilter::IdIn(ids)));
    }
}

fn push_excluded_patterns(clauses: &mut Vec<FeedFilter>, patterns: Vec<UrlPattern>) {
    clauses.extend(
        patterns
            .into_iter()
            .map(|p| FeedFilter::not(FeedFilter::UrlMatches(p))),
    );
}

/// Exclusion query for the default tier.
///
/// `claiming` holds every schedule whose rate differs from the default.
/// Users overriding to any other rate are excluded wholesale, even when none
/// of their feeds match a keyword or id.
pub fn default_tier_filter(
    default_rate: u64,
    claiming: &[CustomSchedule],
    benefits: &[Benefit],
) -> FeedFilter {
    let claiming: Vec<&CustomSchedule> = claiming
        .iter()
        .filter(|s| s.refresh_rate_seconds != default_rate)
        .collect();

    let excluded_users: BTreeSet<String> = user_rates(benefits)
        .into_iter()
        .filter(|(_, rate)| *rate != default_rate)
        .map(|(user, _)| user.to_string())
        .collect();

    let mut clauses = FeedFilter::eligible();
    if !excluded_users.is_empty() {
        clauses.push(FeedFilter::not(FeedFilter::UserIn(excluded_users)));
    }
    push_excluded_patterns(&mut clauses, keyword_patterns(claiming.iter().copied()));
    push_excluded_ids(&mut clauses, feed_ids(claiming.iter().copied()));

    FeedFilter::All(clauses)
}

/// Inclusion query for a non-default tier.
///
/// `own` holds the schedules at `rate`, `others` every schedule at any other
/// rate. Claims made at other non-default rates with higher precedence are
/// subtracted so no feed lands in two tiers.
pub fn tier_filter(
    rate: u64,
    default_rate: u64,
    own: &[CustomSchedule],
    others: &[CustomSchedule],
    benefits: &[Benefit],
) -> FeedFilter {
    let others: Vec<&CustomSchedule> = others
        .iter()
        .filter(|s| s.refresh_rate_seconds != default_rate && s.refresh_rate_seconds != rate)
        .collect();
    let faster: Vec<&CustomSchedule> = others
        .iter()
        .copied()
        .filter(|s| s.refresh_rate_seconds < rate)
        .collect();

    let mut claims = Vec::new();

    let own_ids = feed_ids(own);
    if !own_ids.is_empty() {
        let mut clauses = vec![FeedFilter::IdIn(own_ids)];
        push_excluded_ids(&mut clauses, feed_ids(faster.iter().copied()));
        claims.push(FeedFilter::All(clauses));
    }

    let own_patterns = keyword_patterns(own);
    if !own_patterns.is_empty() {
        let mut clauses = vec![FeedFilter::Any(
            own_patterns.into_iter().map(FeedFilter::UrlMatches).collect(),
        )];
        push_excluded_ids(&mut clauses, feed_ids(others.iter().copied()));
        push_excluded_patterns(&mut clauses, keyword_patterns(faster.iter().copied()));
        claims.push(FeedFilter::All(clauses));
    }

    let users: BTreeSet<String> = user_rates(benefits)
        .into_iter()
        .filter(|(_, r)| *r == rate)
        .map(|(user, _)| user.to_string())
        .collect();
    if !users.is_empty() {
        let mut clauses = vec![FeedFilter::UserIn(users)];
        push_excluded_ids(&mut clauses, feed_ids(others.iter().copied()));
        push_excluded_patterns(&mut clauses, keyword_patterns(others.iter().copied()));
        claims.push(FeedFilter::All(clauses));
    }

    let mut clauses = FeedFilter::eligible();
    clauses.push(FeedFilter::Any(claims));
    FeedFilter::All(clauses)
}
