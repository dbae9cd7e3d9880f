//! §4.9 Feed Identity Index: `topic_url ↔ feed_id` alias expansion, plus the
//! `RecordFeedHandler` mappings job that keeps the mapping current.

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::store::known_feed;
use crate::store::known_feed_identity;

/// Payload for the `mappings` queue's `RecordFeedHandler` job, enqueued once
/// per newly-verified subscribe (§4.9).
#[derive(Debug, Serialize, Deserialize)]
pub struct MappingsTaskPayload {
    pub topic: String,
}

/// The document format a feed was fetched as, biasing which identity
/// extraction strategy to try first (out of scope per spec.md §1 — only the
/// `(content, format) -> Option<feed_id>` contract is specified; this is the
/// hub's own minimal implementation of that contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityFormatGuess {
    Atom,
    Rss,
}

pub trait FeedIdentityExtractor: Send + Sync {
    fn identify(
        &self,
        content: &str,
        format: IdentityFormatGuess,
    ) -> Option<String>;
}

/// Atom `<id>…</id>` / RSS `<link>…</link>` substring extraction. Matches the
/// original's `feed_identifier.identify` contract closely enough for this
/// hub's own needs; a real deployment could swap in a proper XML parser.
pub struct SimpleFeedIdentityExtractor;

impl FeedIdentityExtractor for SimpleFeedIdentityExtractor {
    fn identify(
        &self,
        content: &str,
        format: IdentityFormatGuess,
    ) -> Option<String> {
        let tag = match format {
            IdentityFormatGuess::Atom => "id",
            IdentityFormatGuess::Rss => "link",
        };
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let start = content.find(&open)? + open.len();
        let end = content[start..].find(&close)? + start;
        let value = content[start..end].trim();
        if value.is_empty() { None } else { Some(value.to_string()) }
    }
}

/// §4.9 `update`: append `topic` to the feed identity's alias set.
pub async fn update(
    pool: &PgPool,
    feed_id: &str,
    topic: &str,
) -> Result<(), sqlx::Error> {
    known_feed_identity::add_topic(pool, feed_id, topic).await?;
    Ok(())
}

/// §4.9 `remove`: drop `topic` from the feed identity's alias set.
pub async fn remove(
    pool: &PgPool,
    feed_id: &str,
    topic: &str,
) -> Result<(), sqlx::Error> {
    known_feed_identity::remove_topic(pool, feed_id, topic).await?;
    Ok(())
}

/// §4.9 `derive_additional_topics`: expand each input topic to its full
/// alias set. A topic with no `KnownFeed` is omitted; one with a `KnownFeed`
/// but no `feed_id` maps only to itself.
pub async fn derive_additional_topics(
    pool: &PgPool,
    topics: &[String],
    max_aliases: usize,
) -> Result<HashMap<String, HashSet<String>>, sqlx::Error> {
    let mut output: HashMap<String, HashSet<String>> = HashMap::new();

    for topic in topics {
        let Some(feed) = known_feed::get(pool, topic).await? else {
            continue;
        };
        let feed_id = feed.feed_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let Some(feed_id) = feed_id else {
            output.insert(topic.clone(), HashSet::from([topic.clone()]));
            continue;
        };

        let identity = known_feed_identity::get(pool, feed_id).await?;
        let entry = output.entry(topic.clone()).or_insert_with(|| HashSet::from([topic.clone()]));
        if let Some(identity) = identity {
            let aliases = identity.topic_list();
            if aliases.len() > max_aliases {
                tracing::debug!(
                    topic = %topic,
                    feed_id = %feed_id,
                    alias_count = aliases.len(),
                    "too many expansion feeds for topic, skipping alias expansion"
                );
            } else {
                entry.extend(aliases);
            }
        }
    }

    Ok(output)
}

/// §4.9 `RecordFeedHandler`: keep `(topic -> feed_id)` current. No-ops when
/// the `KnownFeed` was refreshed within `known_feed_refresh_period_days`.
#[tracing::instrument(skip(pool, http_client, extractor))]
pub async fn record_feed(
    pool: &PgPool,
    http_client: &Client,
    extractor: &dyn FeedIdentityExtractor,
    topic: &str,
    refresh_period_days: i64,
) -> Result<(), anyhow::Error> {
    let existing = known_feed::get(pool, topic).await?;
    if let Some(existing) = &existing {
        let since_update = Utc::now() - existing.update_time;
        if existing.feed_id.is_some() && since_update < ChronoDuration::days(refresh_period_days) {
            tracing::debug!(topic = %topic, "feed identity already fresh, skipping");
            return Ok(());
        }
    }

    let response = match http_client.get(topic).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "could not fetch topic for feed identity");
            known_feed::upsert(pool, topic, existing.as_ref().and_then(|k| k.feed_id.as_deref())).await?;
            return Ok(());
        }
    };
    if !response.status().is_success() {
        tracing::warn!(topic = %topic, status = %response.status(), "fetching topic for feed identity returned non-2xx");
        known_feed::upsert(pool, topic, existing.as_ref().and_then(|k| k.feed_id.as_deref())).await?;
        return Ok(());
    }

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "could not read topic body for feed identity");
            known_feed::upsert(pool, topic, existing.as_ref().and_then(|k| k.feed_id.as_deref())).await?;
            return Ok(());
        }
    };

    let order = [IdentityFormatGuess::Atom, IdentityFormatGuess::Rss];
    let feed_id = order.iter().find_map(|format| extractor.identify(&body, *format));

    let Some(feed_id) = feed_id else {
        tracing::warn!(topic = %topic, "could not determine feed id for topic");
        known_feed::upsert(pool, topic, existing.as_ref().and_then(|k| k.feed_id.as_deref())).await?;
        return Ok(());
    };

    let old_feed_id = existing.as_ref().and_then(|k| k.feed_id.clone());
    if let Some(old_feed_id) = &old_feed_id {
        if old_feed_id != &feed_id {
            tracing::info!(topic = %topic, old_feed_id = %old_feed_id, "removing stale feed id mapping");
            remove(pool, old_feed_id, topic).await?;
        }
    }

    tracing::info!(topic = %topic, feed_id = %feed_id, old_feed_id = ?old_feed_id, "recorded feed identity");
    update(pool, &feed_id, topic).await?;
    known_feed::upsert(pool, topic, Some(&feed_id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_atom_id() {
        let extractor = SimpleFeedIdentityExtractor;
        let doc = "<feed><id>  tag:example.com,2024:foo  </id></feed>";
        assert_eq!(
            extractor.identify(doc, IdentityFormatGuess::Atom),
            Some("tag:example.com,2024:foo".to_string())
        );
    }

    #[test]
    fn extracts_rss_link() {
        let extractor = SimpleFeedIdentityExtractor;
        let doc = "<channel><link>http://example.com/</link></channel>";
        assert_eq!(
            extractor.identify(doc, IdentityFormatGuess::Rss),
            Some("http://example.com/".to_string())
        );
    }

    #[test]
    fn missing_tag_yields_none() {
        let extractor = SimpleFeedIdentityExtractor;
        assert_eq!(extractor.identify("<feed></feed>", IdentityFormatGuess::Atom), None);
    }
}
