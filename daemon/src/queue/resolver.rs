//! Queue spec resolution.
//!
//! A spec is either a literal queue name, matched against the trailing path
//! segment of each queue URL, or a `/regex/flags` pattern matched against the
//! full URL. The account's queue listing is fetched once and cached.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::client::QueueClient;
use super::types::queue_name;
use crate::error::{ConfigError, QueueError};

/// A configured queue reference.
#[derive(Debug, Clone)]
pub enum QueueSpec {
    /// Exact queue name
    Literal(String),
    /// Compiled pattern, with the original spec text kept for logging
    Pattern { source: String, regex: Regex },
}

impl QueueSpec {
    /// Parse a configured queue reference.
    ///
    /// Strings starting with `/` are patterns; the supported modifiers are
    /// `i` (case-insensitive), `m` (dot matches newline) and `x` (extended).
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let Some(body) = spec.strip_prefix('/') else {
            return Ok(QueueSpec::Literal(spec.to_string()));
        };

        let (pattern, modifiers) = body
            .rsplit_once('/')
            .ok_or_else(|| ConfigError::MalformedPattern {
                spec: spec.to_string(),
            })?;

        let mut builder = RegexBuilder::new(pattern);
        for modifier in modifiers.chars() {
            match modifier {
                'i' => builder.case_insensitive(true),
                'm' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(ConfigError::UnsupportedModifier {
                        spec: spec.to_string(),
                        modifier: other,
                    })
                }
            };
        }

        let regex = builder.build().map_err(|source| ConfigError::InvalidPattern {
            spec: spec.to_string(),
            source,
        })?;

        debug!(spec = %spec, regex = %regex, "queue_pattern_compiled");
        Ok(QueueSpec::Pattern {
            source: spec.to_string(),
            regex,
        })
    }

    /// Select matching URLs from a listing.
    fn select(&self, urls: &[String]) -> Vec<String> {
        match self {
            QueueSpec::Literal(name) => urls
                .iter()
                .find(|url| queue_name(url) == name)
                .cloned()
                .into_iter()
                .collect(),
            QueueSpec::Pattern { regex, .. } => urls
                .iter()
                .filter(|url| regex.is_match(url))
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for QueueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueSpec::Literal(name) => f.write_str(name),
            QueueSpec::Pattern { source, .. } => f.write_str(source),
        }
    }
}

/// Resolves queue specs to URLs against one account's queue listing.
pub struct QueueResolver {
    client: Arc<dyn QueueClient>,
    listing: OnceCell<Vec<String>>,
}

impl QueueResolver {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Self {
            client,
            listing: OnceCell::new(),
        }
    }

    /// Resolve one spec. No match yields an empty list and a warning.
    pub async fn resolve(&self, spec: &QueueSpec) -> Result<Vec<String>, QueueError> {
        let listing = self
            .listing
            .get_or_try_init(|| self.client.list_queue_urls())
            .await?;

        let urls = spec.select(listing);
        if urls.is_empty() {
            warn!(spec = %spec, "queue_not_found");
        } else {
            debug!(spec = %spec, urls = ?urls, "queue_resolved");
        }
        Ok(urls)
    }

    /// Resolve every spec in order. Overlapping specs are not deduplicated.
    pub async fn resolve_all(&self, specs: &[QueueSpec]) -> Result<Vec<String>, QueueError> {
        let mut urls = Vec::new();
        for spec in specs {
            urls.extend(self.resolve(spec).await?);
        }
        Ok(urls)
    }
}
