//! Broker routing keys and event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::feed::Destination;

/// Queues the scheduler publishes to or consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingKey {
    /// Published: one per distinct URL due this tick.
    #[serde(rename = "url.fetch")]
    FetchRequest,
    /// Published: one per selected feed.
    #[serde(rename = "feed.deliver-articles")]
    DeliveryRequest,
    /// Consumed: a URL failed to fetch repeatedly.
    #[serde(rename = "url.failed.disable-feeds")]
    UrlFetchFailed,
    /// Consumed: a destination rejected an article.
    #[serde(rename = "feed.rejected-article.disable-connection")]
    ConnectionRejected,
}

impl RoutingKey {
    pub const ALL: [RoutingKey; 4] = [
        RoutingKey::FetchRequest,
        RoutingKey::DeliveryRequest,
        RoutingKey::UrlFetchFailed,
        RoutingKey::ConnectionRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::FetchRequest => "url.fetch",
            RoutingKey::DeliveryRequest => "feed.deliver-articles",
            RoutingKey::UrlFetchFailed => "url.failed.disable-feeds",
            RoutingKey::ConnectionRejected => "feed.rejected-article.disable-connection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire wrapper for every broker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: uuid::Uuid,
    pub routing_key: RoutingKey,
    pub published_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new<T: Serialize>(routing_key: RoutingKey, data: &T) -> serde_json::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            routing_key,
            published_at: Utc::now(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    pub rate_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumFilters {
    pub expression: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedMedia {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Embed in the shape downstream delivery workers post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedMedia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedMedia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Output of the template renderer for one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

/// One delivery target inside a delivery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medium {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<MediumFilters>,
    pub destination: Destination,
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub feed_id: String,
    pub url: String,
    pub passing_comparisons: Vec<String>,
    pub blocking_comparisons: Vec<String>,
    pub article_day_limit: u32,
    pub mediums: Vec<Medium>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlFetchFailed {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRejected {
    pub feed: EntityRef,
    pub medium: EntityRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_names() {
        for key in RoutingKey::ALL {
            assert_eq!(RoutingKey::parse(key.as_str()), Some(key));
            let json = serde_json::to_string(&key).unwrap();
            assert_eq!(json, format!("\"{}\"", key.as_str()));
        }
        assert_eq!(RoutingKey::parse("url.unknown"), None);
    }

    #[test]
    fn test_fetch_request_wire_shape() {
        let envelope = Envelope::new(
            RoutingKey::FetchRequest,
            &FetchRequest { url: "https://a.com/feed".into(), rate_seconds: 60 },
        )
        .unwrap();
        assert_eq!(
            envelope.data,
            serde_json::json!({"url": "https://a.com/feed", "rateSeconds": 60})
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["routingKey"], "url.fetch");
    }

    #[test]
    fn test_connection_rejected_decodes() {
        let envelope = Envelope {
            id: uuid::Uuid::new_v4(),
            routing_key: RoutingKey::ConnectionRejected,
            published_at: Utc::now(),
            data: serde_json::json!({"feed": {"id": "f1"}, "medium": {"id": "m1"}}),
        };
        let event: ConnectionRejected = envelope.decode().unwrap();
        assert_eq!(event.feed.id, "f1");
        assert_eq!(event.medium.id, "m1");
    }

    #[test]
    fn test_medium_omits_missing_filters() {
        let medium = Medium {
            id: "c1".into(),
            kind: "discord".into(),
            filters: None,
            destination: Destination::Channel { guild_id: "g".into(), channel_id: "c".into() },
            content: Some("hi".into()),
            embeds: vec![],
        };
        let value = serde_json::to_value(&medium).unwrap();
        assert!(value.get("filters").is_none());
        assert_eq!(value["type"], "discord");
        assert_eq!(value["destination"]["channelId"], "c");
    }
}
