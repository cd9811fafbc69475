//! Best-effort entity extraction and the graph outbox.
//!
//! On insert, capitalized tokens and backticked identifiers become entity
//! rows; co-mentions become relations carrying the source fact id. A CDC
//! row lands in `graph_outbox`, idempotent per `(fact_id, action)`, for an
//! external graph consumer. Everything here is best-effort: failures are
//! logged and counted, never surfaced to the `store` call.

use cortex_storage::{sql_params, WriteWorker};
use cortex_types::time::now_iso;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

/// Maximum entities extracted from one fact.
const MAX_ENTITIES: usize = 8;

/// Rows are parked after this many delivery attempts.
pub const OUTBOX_MAX_ATTEMPTS: i64 = 5;

#[allow(clippy::expect_used)]
static CAPITALIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9_]{2,}\b").expect("static regex"));
#[allow(clippy::expect_used)]
static BACKTICKED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([A-Za-z0-9_.:-]{2,})`").expect("static regex"));

/// Pulls candidate entity names out of content. Deterministic order,
/// deduplicated, capped.
pub fn extract_entities(content: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for capture in BACKTICKED.captures_iter(content) {
        if let Some(m) = capture.get(1) {
            if seen.insert(m.as_str().to_string()) {
                out.push(m.as_str().to_string());
            }
        }
    }
    for m in CAPITALIZED.find_iter(content) {
        if seen.insert(m.as_str().to_string()) {
            out.push(m.as_str().to_string());
        }
        if out.len() >= MAX_ENTITIES {
            break;
        }
    }
    out.truncate(MAX_ENTITIES);
    out
}

/// Upserts entities and co-mention relations for a stored fact, then
/// writes the outbox row. Runs on the writer (inside the store's
/// transaction scope); the caller treats any error as non-fatal.
pub async fn process_fact_graph(
    writer: &WriteWorker,
    fact_id: i64,
    content: &str,
    project: &str,
) -> Result<(), cortex_types::error::StorageError> {
    let names = extract_entities(content);
    if names.is_empty() {
        return Ok(());
    }
    let now = now_iso();

    let mut entity_ids = Vec::with_capacity(names.len());
    for name in &names {
        let existing = writer
            .query_row(
                "SELECT id FROM entities WHERE name = ?1 AND project = ?2",
                sql_params![name.as_str(), project],
            )
            .await?;
        let entity_id = match existing.and_then(|row| row.into_iter().next()).and_then(|c| c.as_i64()) {
            Some(id) => {
                writer
                    .execute(
                        "UPDATE entities SET last_seen = ?1, mention_count = mention_count + 1
                         WHERE id = ?2",
                        sql_params![now.as_str(), id],
                    )
                    .await?;
                id
            }
            None => {
                writer
                    .execute(
                        "INSERT INTO entities (name, entity_type, project, first_seen, last_seen)
                         VALUES (?1, 'unknown', ?2, ?3, ?3)",
                        sql_params![name.as_str(), project, now.as_str()],
                    )
                    .await?
                    .last_insert_rowid
            }
        };
        entity_ids.push(entity_id);
    }

    // Co-mention edges between consecutive entities.
    for pair in entity_ids.windows(2) {
        writer
            .execute(
                "INSERT INTO entity_relations
                     (source_entity_id, target_entity_id, relation_type, first_seen, source_fact_id)
                 VALUES (?1, ?2, 'co_mentioned', ?3, ?4)",
                sql_params![pair[0], pair[1], now.as_str(), fact_id],
            )
            .await?;
    }

    let payload = json!({ "entities": names, "project": project }).to_string();
    writer
        .execute(
            "INSERT OR IGNORE INTO graph_outbox (fact_id, action, payload, created_at)
             VALUES (?1, 'fact_stored', ?2, ?3)",
            sql_params![fact_id, payload, now.as_str()],
        )
        .await?;
    Ok(())
}

/// One pending CDC row.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub fact_id: i64,
    pub action: String,
    pub payload: String,
    pub attempts: i64,
}

/// Drains pending outbox rows through `deliver`. A successful delivery
/// marks the row `sent`; a failed one bumps `attempts` and parks the row
/// once it exceeds [`OUTBOX_MAX_ATTEMPTS`]. Returns `(sent, parked)`.
pub async fn drain_outbox<F>(
    writer: &WriteWorker,
    pool: &cortex_storage::ReadPool,
    deliver: F,
) -> Result<(usize, usize), cortex_types::error::StorageError>
where
    F: Fn(&OutboxRow) -> bool,
{
    let pending: Vec<OutboxRow> = pool
        .run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, fact_id, action, payload, attempts FROM graph_outbox
                 WHERE status = 'pending' ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(OutboxRow {
                        id: r.get(0)?,
                        fact_id: r.get(1)?,
                        action: r.get(2)?,
                        payload: r.get(3)?,
                        attempts: r.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    let mut sent = 0;
    let mut parked = 0;
    for row in pending {
        if deliver(&row) {
            writer
                .execute(
                    "UPDATE graph_outbox SET status = 'sent', attempts = attempts + 1 WHERE id = ?1",
                    sql_params![row.id],
                )
                .await?;
            sent += 1;
        } else if row.attempts + 1 >= OUTBOX_MAX_ATTEMPTS {
            writer
                .execute(
                    "UPDATE graph_outbox SET status = 'parked', attempts = attempts + 1 WHERE id = ?1",
                    sql_params![row.id],
                )
                .await?;
            parked += 1;
        } else {
            writer
                .execute(
                    "UPDATE graph_outbox SET attempts = attempts + 1 WHERE id = ?1",
                    sql_params![row.id],
                )
                .await?;
        }
    }
    Ok((sent, parked))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_backticked_and_capitalized() {
        let names = extract_entities("Deploy `cortex-engine` behind Nginx on Hetzner.");
        assert!(names.contains(&"cortex-engine".to_string()));
        assert!(names.contains(&"Nginx".to_string()));
        assert!(names.contains(&"Hetzner".to_string()));
    }

    #[test]
    fn deduplicates_and_caps() {
        let text = "Alpha Alpha Beta Gamma Delta Epsilon Zeta Ethan Theta Iota Kappa";
        let names = extract_entities(text);
        assert_eq!(
            names.iter().filter(|n| n.as_str() == "Alpha").count(),
            1
        );
        assert!(names.len() <= 8);
    }

    #[test]
    fn plain_prose_extracts_nothing() {
        assert!(extract_entities("all lowercase words only here").is_empty());
    }
}
