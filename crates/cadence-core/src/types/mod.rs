//! Domain types shared by the scheduler, stores and gateway.

pub mod events;
pub mod feed;
pub mod schedule;

pub use events::{
    ConnectionRejected, DeliveryRequest, Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia,
    EntityRef, Envelope, FetchRequest, Medium, MediumFilters, RenderedMessage, RoutingKey,
    UrlFetchFailed,
};
pub use feed::{
    Connection, ConnectionKind, Destination, DisabledCode, EmbedFieldTemplate, EmbedTemplate,
    Feed, FeedConnections, HealthStatus, MessageTemplate,
};
pub use schedule::{Benefit, CustomSchedule};
