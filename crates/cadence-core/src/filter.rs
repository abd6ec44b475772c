//! Storage-agnostic feed selection predicate.
//!
//! The tier selector builds a [`FeedFilter`] tree out of a closed set of
//! clause kinds. Store adapters either evaluate it in-process
//! ([`FeedFilter::matches`]) or compile it to their native query form.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};

use crate::types::{Feed, HealthStatus};

/// A validated, case-insensitive URL pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    regex: Regex,
}

impl UrlPattern {
    /// Compile a keyword. Invalid patterns are rejected so the caller can
    /// report them and drop the clause.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source).case_insensitive(true).build()?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for UrlPattern {}

/// Selection predicate over feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    /// Every child matches. Empty matches everything.
    All(Vec<FeedFilter>),
    /// At least one child matches. Empty matches nothing.
    Any(Vec<FeedFilter>),
    Not(Box<FeedFilter>),
    UrlMatches(UrlPattern),
    /// Exact, case-sensitive URL equality.
    UrlEquals(String),
    IdIn(BTreeSet<String>),
    UserIn(BTreeSet<String>),
    /// No feed-level disabled code.
    Enabled,
    /// Health status is not `Failed`.
    HealthOk,
    /// At least one connection in any group.
    HasConnection,
}

impl FeedFilter {
    /// Enabled, healthy and connected.
    pub fn eligible() -> Vec<FeedFilter> {
        vec![FeedFilter::Enabled, FeedFilter::HealthOk, FeedFilter::HasConnection]
    }

    pub fn not(inner: FeedFilter) -> FeedFilter {
        FeedFilter::Not(Box::new(inner))
    }

    pub fn id_in<I, S>(ids: I) -> FeedFilter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeedFilter::IdIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn user_in<I, S>(ids: I) -> FeedFilter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeedFilter::UserIn(ids.into_iter().map(Into::into).collect())
    }

    /// Evaluate against a single feed.
    pub fn matches(&self, feed: &Feed) -> bool {
        match self {
            FeedFilter::All(children) => children.iter().all(|c| c.matches(feed)),
            FeedFilter::Any(children) => children.iter().any(|c| c.matches(feed)),
            FeedFilter::Not(inner) => !inner.matches(feed),
            FeedFilter::UrlMatches(pattern) => pattern.is_match(&feed.url),
            FeedFilter::UrlEquals(url) => feed.url == *url,
            FeedFilter::IdIn(ids) => ids.contains(&feed.id),
            FeedFilter::UserIn(users) => users.contains(&feed.user_id),
            FeedFilter::Enabled => feed.disabled_code.is_none(),
            FeedFilter::HealthOk => feed.health_status != HealthStatus::Failed,
            FeedFilter::HasConnection => !feed.connections.is_empty(),
        }
    }

    /// Number of leaf clauses, for logging.
    pub fn clause_count(&self) -> usize {
        match self {
            FeedFilter::All(children) | FeedFilter::Any(children) => {
                children.iter().map(FeedFilter::clause_count).sum()
            }
            FeedFilter::Not(inner) => inner.clause_count(),
            _ => 1,
        }
    }
}
