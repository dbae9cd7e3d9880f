//! §4.7 Event Builder: diff a fetched feed against its stored state and
//! commit the result (new entry fingerprints + one `EventToDeliver`) in a
//! single transaction.

use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::feed_diff;
use crate::store::event;
use crate::store::feed_entry;
use crate::store::feed_record;
use crate::store::feed_record::FeedFormat;
use crate::store::feed_record::FeedRecordRow;
use crate::utils::entity_key;
use crate::utils::sha1_hex;

pub struct EventBuilderConfig {
    pub max_feed_entry_record_lookups: usize,
    pub max_new_feed_entry_records: usize,
    pub max_delivery_failures: i32,
}

#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub event_id: Option<Uuid>,
    /// `true` when more than `max_new_feed_entry_records` changed — this
    /// fetch only emitted a prefix and the feed should be re-fetched so the
    /// remainder becomes a second event (§4.7 step 3).
    pub partial: bool,
}

fn parse_order(existing: Option<&FeedRecordRow>) -> [FeedFormat; 3] {
    match existing.map(FeedRecordRow::format) {
        Some(FeedFormat::Rss) => [FeedFormat::Rss, FeedFormat::Atom, FeedFormat::Arbitrary],
        _ => [FeedFormat::Atom, FeedFormat::Rss, FeedFormat::Arbitrary],
    }
}

fn root_close_tag(format: FeedFormat) -> &'static str {
    match format {
        FeedFormat::Atom => "</feed>",
        FeedFormat::Rss => "</channel>",
        FeedFormat::Arbitrary => "",
    }
}

/// §4.7 Open Question: the original infers RSS vs RDF content-type by
/// substring search on the envelope; preserved here with a log line standing
/// in for the called-for observability counter.
fn derive_content_type(
    header_footer: &str,
    format: FeedFormat,
    fallback_content_type: &str,
) -> String {
    match format {
        FeedFormat::Atom => "application/atom+xml".to_string(),
        FeedFormat::Rss => {
            let lower = header_footer.to_lowercase();
            if lower.contains("rdf") {
                "application/rdf+xml".to_string()
            } else if lower.contains("rss") {
                "application/rss+xml".to_string()
            } else {
                tracing::warn!(
                    event = "rss_content_type_heuristic_miss",
                    "RSS/RDF content-type heuristic found neither substring in envelope"
                );
                "application/rss+xml".to_string()
            }
        }
        FeedFormat::Arbitrary => fallback_content_type.to_string(),
    }
}

fn strip_xml_decl(s: &str) -> &str {
    let trimmed = s.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some(end) = rest.find("?>") {
            return trimmed[5 + end + 2..].trim_start();
        }
    }
    trimmed
}

fn splice_payload(
    header_footer: &str,
    entries_xml: &[String],
    format: FeedFormat,
) -> String {
    let close_tag = root_close_tag(format);
    let without_decl = strip_xml_decl(header_footer);
    let insert_at = without_decl.rfind(close_tag).unwrap_or(without_decl.len());

    let mut out = String::with_capacity(without_decl.len() + entries_xml.iter().map(String::len).sum::<usize>() + 64);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&without_decl[..insert_at]);
    for entry in entries_xml {
        out.push_str(entry);
    }
    out.push_str(&without_decl[insert_at..]);
    out
}

/// Runs the diff and commits the result. `existing_record` is `None` on a
/// feed's first successful fetch (lazy FeedRecord creation per §3).
#[tracing::instrument(skip(pool, existing_record, body, config), fields(topic = %topic))]
pub async fn diff_and_commit(
    pool: &PgPool,
    topic: &str,
    existing_record: Option<&FeedRecordRow>,
    response_content_type: &str,
    last_modified: Option<&str>,
    etag: Option<&str>,
    body: &str,
    config: &EventBuilderConfig,
) -> Result<BuildOutcome, anyhow::Error> {
    let feed_key = entity_key(topic);
    let order = parse_order(existing_record);

    let mut resolved = None;
    for format in order {
        match feed_diff::filter(body, format) {
            Ok(result) => {
                resolved = Some((format, result));
                break;
            }
            Err(e) => {
                tracing::debug!(?format, error = %e, "diff parse attempt failed, trying next format");
            }
        }
    }
    let Some((format, (header_footer, entries_map))) = resolved else {
        tracing::info!("all formats failed to parse feed; treating as a silent no-op");
        return Ok(BuildOutcome::default());
    };

    if matches!(format, FeedFormat::Arbitrary) {
        let content_type = if response_content_type.is_empty() {
            "application/octet-stream".to_string()
        } else {
            response_content_type.to_string()
        };
        let mut tx = pool.begin().await?;
        feed_record::upsert_in_tx(&mut tx, topic, &header_footer, format, &content_type, last_modified, etag)
            .await?;
        let event_id = event::insert_in_tx(
            &mut tx,
            &feed_key,
            topic,
            &entity_key(topic),
            body.as_bytes(),
            &content_type,
            config.max_delivery_failures,
        )
        .await?;
        tx.commit().await?;
        return Ok(BuildOutcome { event_id: Some(event_id), partial: false });
    }

    let mut entry_ids: Vec<String> = entries_map.keys().cloned().collect();
    entry_ids.sort();
    let existing_hashes =
        feed_entry::get_hashes(pool, &feed_key, &entry_ids, config.max_feed_entry_record_lookups).await?;

    let mut changed: BTreeMap<String, (String, String)> = BTreeMap::new();
    for entry_id in &entry_ids {
        let xml = &entries_map[entry_id];
        let new_hash = sha1_hex(xml.as_bytes());
        if existing_hashes.get(entry_id).map(String::as_str) != Some(new_hash.as_str()) {
            changed.insert(entry_id.clone(), (xml.clone(), new_hash));
        }
    }

    if changed.is_empty() {
        let mut tx = pool.begin().await?;
        let content_type = derive_content_type(&header_footer, format, response_content_type);
        feed_record::upsert_in_tx(&mut tx, topic, &header_footer, format, &content_type, last_modified, etag)
            .await?;
        tx.commit().await?;
        return Ok(BuildOutcome::default());
    }

    let partial = changed.len() > config.max_new_feed_entry_records;
    let kept: Vec<(String, String, String)> = changed
        .into_iter()
        .take(config.max_new_feed_entry_records)
        .map(|(id, (xml, hash))| (id, xml, hash))
        .collect();

    let content_type = derive_content_type(&header_footer, format, response_content_type);

    let event_id =
        commit_with_retry(pool, topic, &feed_key, &header_footer, format, &content_type, last_modified, etag, &kept, config.max_delivery_failures, 10)
            .await?;

    Ok(BuildOutcome { event_id: Some(event_id), partial })
}

/// §4.7 step 5: "on request too large, halve the put group and retry (up to
/// 10 splits)". Postgres has no comparable per-statement size ceiling, so in
/// practice this recurses once; retained so a pathologically large single
/// commit degrades gracefully (emitting the first half as the event, leaving
/// the rest for the next fetch's diff) rather than failing outright.
#[allow(clippy::too_many_arguments)]
fn commit_with_retry<'a>(
    pool: &'a PgPool,
    topic: &'a str,
    feed_key: &'a str,
    header_footer: &'a str,
    format: FeedFormat,
    content_type: &'a str,
    last_modified: Option<&'a str>,
    etag: Option<&'a str>,
    entries: &'a [(String, String, String)],
    max_delivery_failures: i32,
    splits_remaining: u32,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Uuid, anyhow::Error>> + Send + 'a>> {
    Box::pin(async move {
        let entries_xml: Vec<String> = entries.iter().map(|(_, xml, _)| xml.clone()).collect();
        let payload = splice_payload(header_footer, &entries_xml, format);

        let mut tx = pool.begin().await?;
        let attempt: Result<Uuid, sqlx::Error> = async {
            feed_record::upsert_in_tx(&mut tx, topic, header_footer, format, content_type, last_modified, etag)
                .await?;
            for (entry_id, _, hash) in entries {
                feed_entry::upsert_in_tx(&mut tx, feed_key, entry_id, hash).await?;
            }
            let topic_hash = entity_key(topic);
            event::insert_in_tx(&mut tx, feed_key, topic, &topic_hash, payload.as_bytes(), content_type, max_delivery_failures).await
        }
        .await;

        match attempt {
            Ok(event_id) => {
                tx.commit().await?;
                Ok(event_id)
            }
            Err(e) if is_too_large(&e) && splits_remaining > 0 && entries.len() > 1 => {
                drop(tx);
                tracing::warn!(splits_remaining, entries = entries.len(), "commit rejected as too large, halving and retrying");
                let half = entries.len() / 2;
                commit_with_retry(
                    pool,
                    topic,
                    feed_key,
                    header_footer,
                    format,
                    content_type,
                    last_modified,
                    etag,
                    &entries[..half],
                    max_delivery_failures,
                    splits_remaining - 1,
                )
                .await
            }
            Err(e) => Err(e.into()),
        }
    })
}

fn is_too_large(error: &sqlx::Error) -> bool {
    error.to_string().to_lowercase().contains("too large") || error.to_string().to_lowercase().contains("message size")
}
