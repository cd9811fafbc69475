//! Database snapshots.
//!
//! A snapshot is a `VACUUM INTO` copy of the live database, consistent
//! under WAL, plus a sibling JSON metadata file. Names are sanitized to
//! `[A-Za-z0-9_-]` before they touch the filesystem; the vacuum target path
//! is escaped, never interpolated from caller input directly.

use cortex_storage::WriteWorker;
use cortex_types::error::StorageError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Metadata for one snapshot, persisted as the sibling `.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Sanitized snapshot name.
    pub name: String,
    /// Ledger transaction the snapshot is current through.
    pub tx_id: i64,
    /// Latest Merkle root at snapshot time (empty when none yet).
    pub merkle_root: String,
    /// Creation timestamp (ISO-8601 UTC).
    pub created_at: String,
    /// Snapshot file size in MiB.
    pub size_mb: f64,
    /// Absolute path of the snapshot database file.
    pub path: PathBuf,
}

/// Manages physical snapshots of the database.
pub struct SnapshotManager {
    db_path: PathBuf,
    snapshot_dir: PathBuf,
}

impl SnapshotManager {
    /// A manager writing into `snapshots/` next to the database file.
    pub fn new(db_path: &Path) -> Result<Self, StorageError> {
        let snapshot_dir = db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("snapshots");
        std::fs::create_dir_all(&snapshot_dir)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(SnapshotManager {
            db_path: db_path.to_path_buf(),
            snapshot_dir,
        })
    }

    /// Creates a consistent snapshot through the writer (so it serializes
    /// with in-flight mutations) and writes the sibling metadata.
    pub async fn create(
        &self,
        writer: &Arc<WriteWorker>,
        name: &str,
        tx_id: i64,
        merkle_root: &str,
    ) -> Result<SnapshotRecord, StorageError> {
        let safe_name = sanitize_name(name);
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("cortex_snap_{stamp}_{safe_name}.db");
        let dest = self.snapshot_dir.join(filename);

        // VACUUM INTO takes no bound parameters; the path is ours (the
        // sanitized name cannot escape the snapshot directory), quotes
        // escaped regardless.
        let dest_sql = dest.to_string_lossy().replace('\'', "''");
        writer
            .execute(format!("VACUUM INTO '{dest_sql}'"), vec![])
            .await?;
        info!(path = %dest.display(), "snapshot created");

        let size_mb = std::fs::metadata(&dest)
            .map(|m| (m.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0)
            .unwrap_or(0.0);
        let record = SnapshotRecord {
            name: safe_name,
            tx_id,
            merkle_root: merkle_root.to_string(),
            created_at: cortex_types::time::now_iso(),
            size_mb,
            path: dest.clone(),
        };

        let meta_path = dest.with_extension("json");
        let payload = serde_json::to_vec_pretty(&record)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tokio::task::spawn_blocking(move || std::fs::write(meta_path, payload))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(record)
    }

    /// Lists snapshots from the sibling metadata files, newest first.
    /// Records whose database file has gone missing are skipped.
    pub async fn list(&self) -> Result<Vec<SnapshotRecord>, StorageError> {
        let dir = self.snapshot_dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            let entries = std::fs::read_dir(&dir).map_err(|e| StorageError::Backend(e.to_string()))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(bytes) = std::fs::read(&path) else {
                    continue;
                };
                let Ok(record) = serde_json::from_slice::<SnapshotRecord>(&bytes) else {
                    continue;
                };
                if record.path.exists() {
                    records.push(record);
                }
            }
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(records)
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
    }

    /// Restores the database from the snapshot current through `tx_id`.
    ///
    /// An explicit operator action: the engine must be stopped. The live
    /// database is backed up first and restored on failure; stale WAL/SHM
    /// companions are removed.
    pub async fn restore(&self, tx_id: i64) -> Result<bool, StorageError> {
        let Some(snapshot) = self
            .list()
            .await?
            .into_iter()
            .find(|s| s.tx_id == tx_id)
        else {
            error!(tx_id, "no snapshot found for transaction");
            return Ok(false);
        };
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let backup = db_path.with_extension("db.bak");
            std::fs::copy(&db_path, &backup).map_err(|e| StorageError::Backend(e.to_string()))?;
            match std::fs::copy(&snapshot.path, &db_path) {
                Ok(_) => {
                    for suffix in ["-wal", "-shm"] {
                        let companion =
                            PathBuf::from(format!("{}{suffix}", db_path.to_string_lossy()));
                        let _ = std::fs::remove_file(companion);
                    }
                    Ok(true)
                }
                Err(e) => {
                    let _ = std::fs::copy(&backup, &db_path);
                    Err(StorageError::Backend(e.to_string()))
                }
            }
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
    }
}

fn sanitize_name(name: &str) -> String {
    static SAFE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    #[allow(clippy::expect_used)]
    let re = SAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-]").expect("static regex"));
    re.replace_all(name, "_").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("before-launch v2"), "before-launch_v2");
        assert_eq!(sanitize_name("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_name("clean_Name-1"), "clean_Name-1");
    }
}
