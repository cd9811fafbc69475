//! Forward-only schema migrations.
//!
//! A `schema_version` table records every applied version. On open, a fresh
//! database (version 0) gets the full base schema as version 1; registered
//! migrations then run in ascending order, each inside its own transaction.
//! A failing migration rolls back and is retried on the next open; later
//! migrations still run, so each must be idempotent at its own layer.

use crate::schema;
use crate::substrate::map_sqlite_err;
use cortex_types::error::StorageError;
use rusqlite::Connection;
use tracing::{info, warn};

/// A registered migration step.
pub struct Migration {
    /// Target schema version.
    pub version: u32,
    /// What the step does.
    pub description: &'static str,
    /// The step itself. Must be idempotent.
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

/// The registered migration list, ascending by version. Version 1 is the
/// base schema bootstrap and is not listed here.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        description: "performance indexes on facts, transactions and votes",
        apply: migration_002_indexes,
    },
    Migration {
        version: 3,
        description: "FTS5 shadow index with sync triggers",
        apply: migration_003_fts,
    },
    Migration {
        version: 4,
        description: "graph outbox retry index",
        apply: migration_004_outbox_index,
    },
];

fn migration_002_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_facts_project_active
             ON facts(project, valid_until);
         CREATE INDEX IF NOT EXISTS idx_facts_tenant_project
             ON facts(tenant_id, project);
         CREATE INDEX IF NOT EXISTS idx_facts_type ON facts(fact_type);
         CREATE INDEX IF NOT EXISTS idx_facts_created ON facts(created_at DESC);
         CREATE INDEX IF NOT EXISTS idx_tx_hash ON transactions(hash);
         CREATE INDEX IF NOT EXISTS idx_votes_v2_fact ON consensus_votes_v2(fact_id);
         CREATE INDEX IF NOT EXISTS idx_votes_v2_agent ON consensus_votes_v2(agent_id);
         CREATE INDEX IF NOT EXISTS idx_entities_name_project ON entities(name, project);
         CREATE INDEX IF NOT EXISTS idx_relations_source ON entity_relations(source_entity_id);
         CREATE INDEX IF NOT EXISTS idx_relations_target ON entity_relations(target_entity_id);",
    )
}

fn migration_003_fts(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts USING fts5(
             content, project, tags, fact_type,
             content='facts', content_rowid='id'
         );",
    )?;
    // Rebuild from existing rows, then keep in sync via triggers.
    conn.execute("INSERT INTO facts_fts(facts_fts) VALUES('rebuild')", [])?;
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS facts_ai AFTER INSERT ON facts BEGIN
             INSERT INTO facts_fts(rowid, content, project, tags, fact_type)
             VALUES (new.id, new.content, new.project, new.tags, new.fact_type);
         END;

         CREATE TRIGGER IF NOT EXISTS facts_ad AFTER DELETE ON facts BEGIN
             INSERT INTO facts_fts(facts_fts, rowid, content, project, tags, fact_type)
             VALUES ('delete', old.id, old.content, old.project, old.tags, old.fact_type);
         END;

         CREATE TRIGGER IF NOT EXISTS facts_au AFTER UPDATE ON facts BEGIN
             INSERT INTO facts_fts(facts_fts, rowid, content, project, tags, fact_type)
             VALUES ('delete', old.id, old.content, old.project, old.tags, old.fact_type);
             INSERT INTO facts_fts(rowid, content, project, tags, fact_type)
             VALUES (new.id, new.content, new.project, new.tags, new.fact_type);
         END;",
    )
}

fn migration_004_outbox_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_outbox_status ON graph_outbox(status, attempts);",
    )
}

/// The current schema version (0 for a fresh database).
pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |r| r.get(0),
        )
        .map_err(map_sqlite_err)?;
    if exists == 0 {
        return Ok(0);
    }
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
        r.get::<_, i64>(0)
    })
    .map(|v| v as u32)
    .map_err(map_sqlite_err)
}

/// Bootstraps a fresh database and brings it to the latest version.
pub fn initialize(conn: &Connection) -> Result<u32, StorageError> {
    let mut version = current_version(conn)?;
    if version == 0 {
        schema::apply_base_schema(conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, description) VALUES (1, 'base schema')",
            [],
        )
        .map_err(map_sqlite_err)?;
        version = 1;
        info!("base schema applied (version 1)");
    }

    for migration in MIGRATIONS {
        if migration.version <= version {
            continue;
        }
        match run_one(conn, migration) {
            Ok(()) => {
                version = migration.version;
                info!(
                    version = migration.version,
                    "migration applied: {}", migration.description
                );
            }
            Err(e) => {
                // Rolled back; retried on next open. Later migrations still run.
                warn!(
                    version = migration.version,
                    "migration failed, continuing: {e}"
                );
            }
        }
    }
    Ok(version)
}

fn run_one(conn: &Connection, migration: &Migration) -> Result<(), StorageError> {
    conn.execute_batch("BEGIN").map_err(map_sqlite_err)?;
    let applied = (migration.apply)(conn).and_then(|()| {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map(|_| ())
    });
    match applied {
        Ok(()) => conn.execute_batch("COMMIT").map_err(map_sqlite_err),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(StorageError::MigrationFailed {
                version: migration.version,
                reason: e.to_string(),
            })
        }
    }
}
