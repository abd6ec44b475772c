//! # Cadence Scheduler
//!
//! Refresh-rate tiers for feed polling: each tier periodically selects the
//! feeds it owns and publishes fetch and delivery work for them. Failure
//! events from downstream workers flow back and disable feeds or connections.
//!
//! ## Architecture
//! ```text
//! TierEngine (one tokio interval per rate)
//!   └── DispatchOrchestrator::run_tick(rate)
//!         ├── BenefitResolver   → per-user rate + daily limit overrides
//!         ├── TierSelector      → FeedFilter (via ScheduleRegistry)
//!         ├── FeedStore         → distinct URLs + lazy feed cursor
//!         └── EventPublisher    → url.fetch / feed.deliver-articles
//!
//! HealthFeedbackConsumer
//!   ├── url.failed.disable-feeds                 → disable feeds by URL
//!   └── feed.rejected-article.disable-connection → disable one connection
//! ```

pub mod benefits;
pub mod broker;
pub mod dispatch;
pub mod engine;
pub mod feedback;
pub mod persistence;
pub mod registry;
pub mod render;
pub mod selector;
pub mod store;

pub use benefits::{HttpBenefits, StaticBenefits};
pub use broker::{HttpPublisher, MemoryBroker};
pub use dispatch::{DispatchOrchestrator, TickReport, TierPlan};
pub use engine::{TierEngine, TierStats};
pub use feedback::{FeedbackOutcome, HealthFeedbackConsumer};
pub use persistence::SqliteStore;
pub use registry::ScheduleRegistry;
pub use render::DiscordRenderer;
pub use selector::TierSelector;
pub use store::{MemoryFeedStore, MemoryScheduleStore, Snapshot};
