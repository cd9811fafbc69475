//! Base schema DDL and bootstrap.
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so the bootstrap can be
//! re-applied safely. The FTS shadow index and its sync triggers live in the
//! migration list, mirroring how they were introduced historically.

use crate::substrate::map_sqlite_err;
use cortex_types::error::StorageError;
use cortex_types::time::now_iso;
use rusqlite::Connection;

/// The full base schema, applied when the database is fresh.
pub const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS facts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL DEFAULT 'default',
    project         TEXT NOT NULL,
    content         TEXT NOT NULL,
    fact_type       TEXT NOT NULL DEFAULT 'knowledge',
    tags            TEXT NOT NULL DEFAULT '[]',
    confidence      TEXT NOT NULL DEFAULT 'stated',
    valid_from      TEXT NOT NULL,
    valid_until     TEXT,
    source          TEXT,
    meta            TEXT NOT NULL DEFAULT '{}',
    consensus_score REAL NOT NULL DEFAULT 1.0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    tx_id           INTEGER REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    project   TEXT NOT NULL,
    action    TEXT NOT NULL,
    detail    TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    hash      TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS merkle_roots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    root_hash   TEXT NOT NULL,
    tx_start_id INTEGER NOT NULL,
    tx_end_id   INTEGER NOT NULL,
    tx_count    INTEGER NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS integrity_checks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    check_type   TEXT NOT NULL,
    status       TEXT NOT NULL,
    details      TEXT,
    started_at   TEXT NOT NULL,
    completed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fact_embeddings (
    fact_id   INTEGER PRIMARY KEY REFERENCES facts(id),
    embedding BLOB NOT NULL,
    dim       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT NOT NULL UNIQUE,
    agent_type       TEXT NOT NULL DEFAULT 'ai',
    reputation_score REAL NOT NULL DEFAULT 1.0,
    public_key       TEXT,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS consensus_votes (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    fact_id   INTEGER NOT NULL REFERENCES facts(id),
    agent     TEXT NOT NULL,
    vote      INTEGER NOT NULL,
    timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE(fact_id, agent)
);

CREATE TABLE IF NOT EXISTS consensus_votes_v2 (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    fact_id           INTEGER NOT NULL REFERENCES facts(id),
    agent_id          INTEGER NOT NULL REFERENCES agents(id),
    value             INTEGER NOT NULL,
    vote_weight       REAL NOT NULL,
    agent_rep_at_vote REAL NOT NULL,
    created_at        TEXT NOT NULL,
    UNIQUE(fact_id, agent_id)
);

CREATE TABLE IF NOT EXISTS outcomes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    fact_id     INTEGER NOT NULL REFERENCES facts(id),
    status      TEXT NOT NULL DEFAULT 'pending',
    detail      TEXT,
    created_at  TEXT NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS trust_edges (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    source_agent_id INTEGER NOT NULL REFERENCES agents(id),
    target_agent_id INTEGER NOT NULL REFERENCES agents(id),
    weight          REAL NOT NULL DEFAULT 1.0,
    created_at      TEXT NOT NULL,
    UNIQUE(source_agent_id, target_agent_id)
);

CREATE TABLE IF NOT EXISTS ghosts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    reference   TEXT NOT NULL,
    context     TEXT,
    project     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'open',
    target_id   INTEGER,
    confidence  REAL,
    created_at  TEXT NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS entities (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL,
    entity_type   TEXT NOT NULL DEFAULT 'unknown',
    project       TEXT NOT NULL,
    first_seen    TEXT NOT NULL,
    last_seen     TEXT NOT NULL,
    mention_count INTEGER NOT NULL DEFAULT 1,
    meta          TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS entity_relations (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    source_entity_id INTEGER NOT NULL REFERENCES entities(id),
    target_entity_id INTEGER NOT NULL REFERENCES entities(id),
    relation_type    TEXT NOT NULL DEFAULT 'related_to',
    weight           REAL NOT NULL DEFAULT 1.0,
    first_seen       TEXT NOT NULL,
    source_fact_id   INTEGER REFERENCES facts(id)
);

CREATE TABLE IF NOT EXISTS graph_outbox (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    fact_id    INTEGER NOT NULL REFERENCES facts(id),
    action     TEXT NOT NULL,
    payload    TEXT NOT NULL DEFAULT '{}',
    attempts   INTEGER NOT NULL DEFAULT 0,
    status     TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    UNIQUE(fact_id, action)
);

CREATE TABLE IF NOT EXISTS api_keys (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    key_hash    TEXT NOT NULL UNIQUE,
    key_prefix  TEXT NOT NULL,
    tenant_id   TEXT NOT NULL DEFAULT 'default',
    role        TEXT NOT NULL DEFAULT 'agent',
    permissions TEXT NOT NULL DEFAULT '["read:facts","write:facts"]',
    rate_limit  INTEGER NOT NULL DEFAULT 100,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    last_used   TEXT
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS compaction_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    project      TEXT NOT NULL,
    strategy     TEXT NOT NULL,
    original_ids TEXT NOT NULL DEFAULT '[]',
    new_fact_id  INTEGER,
    facts_before INTEGER NOT NULL,
    facts_after  INTEGER NOT NULL,
    timestamp    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS threat_intel (
    pattern_id TEXT PRIMARY KEY,
    pattern    TEXT NOT NULL,
    severity   REAL NOT NULL DEFAULT 0.7,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS cortex_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    payload    TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
"#;

/// Applies the base schema and seeds `cortex_meta`. Safe to call on an
/// already-initialized database.
pub fn apply_base_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(BASE_SCHEMA).map_err(map_sqlite_err)?;
    conn.execute(
        "INSERT OR IGNORE INTO cortex_meta (key, value) VALUES ('initialized_at', ?1)",
        [now_iso()],
    )
    .map_err(map_sqlite_err)?;
    conn.execute(
        "INSERT OR IGNORE INTO cortex_meta (key, value) VALUES ('schema_flavor', 'cortex-core')",
        [],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}
