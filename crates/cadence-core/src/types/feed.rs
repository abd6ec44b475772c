//! Feed documents and their delivery connections.

use serde::{Deserialize, Serialize};

/// Why a feed or a connection stopped being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisabledCode {
    Manual,
    FailedRequests,
    BadFormat,
    MissingPermissions,
    ExceededFeedLimit,
}

impl DisabledCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisabledCode::Manual => "MANUAL",
            DisabledCode::FailedRequests => "FAILED_REQUESTS",
            DisabledCode::BadFormat => "BAD_FORMAT",
            DisabledCode::MissingPermissions => "MISSING_PERMISSIONS",
            DisabledCode::ExceededFeedLimit => "EXCEEDED_FEED_LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MANUAL" => Some(DisabledCode::Manual),
            "FAILED_REQUESTS" => Some(DisabledCode::FailedRequests),
            "BAD_FORMAT" => Some(DisabledCode::BadFormat),
            "MISSING_PERMISSIONS" => Some(DisabledCode::MissingPermissions),
            "EXCEEDED_FEED_LIMIT" => Some(DisabledCode::ExceededFeedLimit),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisabledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the feed's source has recently failed to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Ok,
    Failed,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(HealthStatus::Ok),
            "failed" => Some(HealthStatus::Failed),
            _ => None,
        }
    }
}

/// Connection groups, one per destination type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Channel,
    Webhook,
}

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 2] = [ConnectionKind::Channel, ConnectionKind::Webhook];

    /// Field name of the group inside the stored connections document.
    pub fn group_key(&self) -> &'static str {
        match self {
            ConnectionKind::Channel => "channels",
            ConnectionKind::Webhook => "webhooks",
        }
    }
}

/// Where a connection delivers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Destination {
    #[serde(rename_all = "camelCase")]
    Channel { guild_id: String, channel_id: String },
    #[serde(rename_all = "camelCase")]
    Webhook {
        guild_id: String,
        webhook_id: String,
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon_url: Option<String>,
    },
}

/// Raw embed as configured by the feed owner. Every field is free text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbedTemplate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    /// "#RRGGBB", "0xRRGGBB" or a decimal string.
    pub color: Option<String>,
    pub footer_text: Option<String>,
    pub footer_icon_url: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author_name: Option<String>,
    pub author_url: Option<String>,
    pub author_icon_url: Option<String>,
    pub fields: Vec<EmbedFieldTemplate>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedFieldTemplate {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Message format of a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplate {
    pub content: Option<String>,
    pub embeds: Vec<EmbedTemplate>,
}

/// One configured destination attached to a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub destination: Destination,
    #[serde(default)]
    pub template: MessageTemplate,
    /// Article filter expression, opaque to the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_code: Option<DisabledCode>,
}

impl Connection {
    pub fn is_active(&self) -> bool {
        self.disabled_code.is_none()
    }
}

/// Connections grouped by destination type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConnections {
    pub channels: Vec<Connection>,
    pub webhooks: Vec<Connection>,
}

impl FeedConnections {
    pub fn group(&self, kind: ConnectionKind) -> &[Connection] {
        match kind {
            ConnectionKind::Channel => &self.channels,
            ConnectionKind::Webhook => &self.webhooks,
        }
    }

    pub fn group_mut(&mut self, kind: ConnectionKind) -> &mut Vec<Connection> {
        match kind {
            ConnectionKind::Channel => &mut self.channels,
            ConnectionKind::Webhook => &mut self.webhooks,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len() + self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every connection with its group and position in that group.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionKind, usize, &Connection)> {
        ConnectionKind::ALL.into_iter().flat_map(move |kind| {
            self.group(kind)
                .iter()
                .enumerate()
                .map(move |(idx, con)| (kind, idx, con))
        })
    }

    /// Locate every connection with the given id across all groups.
    pub fn positions_of(&self, connection_id: &str) -> Vec<(ConnectionKind, usize)> {
        self.iter()
            .filter(|(_, _, con)| con.id == connection_id)
            .map(|(kind, idx, _)| (kind, idx))
            .collect()
    }
}

/// A feed subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: String,
    pub url: String,
    pub user_id: String,
    #[serde(default)]
    pub connections: FeedConnections,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_code: Option<DisabledCode>,
    #[serde(default)]
    pub health_status: HealthStatus,
    /// Article properties that let an article through despite filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passing_comparisons: Vec<String>,
    /// Article properties that block an article.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocking_comparisons: Vec<String>,
}

impl Feed {
    pub fn new(id: &str, url: &str, user_id: &str) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            user_id: user_id.to_string(),
            connections: FeedConnections::default(),
            disabled_code: None,
            health_status: HealthStatus::Ok,
            passing_comparisons: Vec::new(),
            blocking_comparisons: Vec::new(),
        }
    }

    /// Enabled, healthy and connected — the precondition for any tier.
    pub fn is_eligible(&self) -> bool {
        self.disabled_code.is_none()
            && self.health_status == HealthStatus::Ok
            && !self.connections.is_empty()
    }
}
