//! Seams between the scheduling core and its external collaborators.

pub mod benefits;
pub mod broker;
pub mod render;
pub mod store;

pub use benefits::BenefitResolver;
pub use broker::EventPublisher;
pub use render::TemplateRenderer;
pub use store::{FeedCursor, FeedStore, FieldUpdate, RateMatch, ScheduleStore};
