//! Administrator-defined custom schedules and per-user benefits.

use serde::{Deserialize, Serialize};

/// Assigns a refresh rate to feeds matching keywords or listed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSchedule {
    pub name: String,
    pub refresh_rate_seconds: u64,
    /// Case-insensitive regex patterns matched against the feed URL.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub feed_ids: Vec<String>,
}

impl CustomSchedule {
    pub fn new(name: &str, refresh_rate_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            refresh_rate_seconds,
            keywords: Vec::new(),
            feed_ids: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_feed_ids(mut self, ids: &[&str]) -> Self {
        self.feed_ids = ids.iter().map(|k| k.to_string()).collect();
        self
    }

    /// No keywords and no ids: claims nothing.
    pub fn is_noop(&self) -> bool {
        self.keywords.is_empty() && self.feed_ids.is_empty()
    }
}

/// Per-user entitlement produced by the billing service each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    #[serde(alias = "user_id")]
    pub user_id: String,
    #[serde(default, alias = "is_entitled")]
    pub is_entitled: bool,
    #[serde(default, alias = "refresh_rate_seconds", skip_serializing_if = "Option::is_none")]
    pub refresh_rate_seconds: Option<u64>,
    #[serde(default, alias = "max_daily_articles", skip_serializing_if = "Option::is_none")]
    pub max_daily_articles: Option<u32>,
}

impl Benefit {
    /// The tier this user is moved to, if entitled and overridden.
    pub fn effective_rate(&self) -> Option<u64> {
        if self.is_entitled {
            self.refresh_rate_seconds
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_schedule() {
        assert!(CustomSchedule::new("empty", 60).is_noop());
        assert!(!CustomSchedule::new("kw", 60).with_keywords(&["nyt"]).is_noop());
        assert!(!CustomSchedule::new("ids", 60).with_feed_ids(&["f1"]).is_noop());
    }

    #[test]
    fn test_effective_rate_requires_entitlement() {
        let mut benefit = Benefit {
            user_id: "u1".into(),
            is_entitled: false,
            refresh_rate_seconds: Some(120),
            max_daily_articles: None,
        };
        assert_eq!(benefit.effective_rate(), None);
        benefit.is_entitled = true;
        assert_eq!(benefit.effective_rate(), Some(120));
    }

    #[test]
    fn test_benefit_accepts_both_casings() {
        let camel: Benefit = serde_json::from_value(serde_json::json!({
            "userId": "u1", "isEntitled": true, "refreshRateSeconds": 60
        }))
        .unwrap();
        let snake: Benefit = serde_json::from_value(serde_json::json!({
            "user_id": "u1", "is_entitled": true, "refresh_rate_seconds": 60
        }))
        .unwrap();
        assert_eq!(camel, snake);
    }
}
