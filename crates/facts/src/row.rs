//! Row decoding shared by the query paths.

use cortex_crypto::Encrypter;
use cortex_types::error::CoreError;
use cortex_types::fact::{Confidence, Fact, FactMeta, FactType};
use rusqlite::Row;
use std::str::FromStr;

/// Column list every fact query selects, joined with the originating
/// transaction's hash.
pub const FACT_COLUMNS: &str = "f.id, f.tenant_id, f.project, f.content, f.fact_type, f.tags, \
     f.confidence, f.valid_from, f.valid_until, f.source, f.meta, f.consensus_score, \
     f.created_at, f.updated_at, f.tx_id, t.hash";

/// The join matching [`FACT_COLUMNS`].
pub const FACT_JOIN: &str = "FROM facts f LEFT JOIN transactions t ON f.tx_id = t.id";

/// An undecoded fact row, extracted inside a pool closure. Fields follow
/// [`FACT_COLUMNS`] order.
#[derive(Debug, Clone)]
pub struct RawFactRow {
    pub id: i64,
    pub tenant_id: String,
    pub project: String,
    pub content: String,
    pub fact_type: String,
    pub tags: String,
    pub confidence: String,
    pub valid_from: String,
    pub valid_until: Option<String>,
    pub source: Option<String>,
    pub meta: String,
    pub consensus_score: f64,
    pub created_at: String,
    pub updated_at: String,
    pub tx_id: Option<i64>,
    pub hash: Option<String>,
}

impl RawFactRow {
    /// Extracts a raw row from a [`FACT_COLUMNS`] result.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawFactRow {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            project: row.get(2)?,
            content: row.get(3)?,
            fact_type: row.get(4)?,
            tags: row.get(5)?,
            confidence: row.get(6)?,
            valid_from: row.get(7)?,
            valid_until: row.get(8)?,
            source: row.get(9)?,
            meta: row.get(10)?,
            consensus_score: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            tx_id: row.get(14)?,
            hash: row.get(15)?,
        })
    }

    /// Decrypts and decodes into a [`Fact`]. Malformed tags or meta decode
    /// to empty values (legacy rows); an unopenable content envelope is
    /// fatal to the call.
    pub fn decode(self, encrypter: &Encrypter) -> Result<Fact, CoreError> {
        let content = encrypter.open(&self.content, &self.tenant_id)?;
        let meta: FactMeta = match encrypter.open(&self.meta, &self.tenant_id) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => FactMeta::default(),
        };
        let tags: Vec<String> = serde_json::from_str(&self.tags).unwrap_or_default();
        Ok(Fact {
            id: self.id,
            tenant_id: self.tenant_id,
            project: self.project,
            content,
            fact_type: FactType::from_str(&self.fact_type)?,
            tags,
            confidence: Confidence::from_str(&self.confidence)?,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            source: self.source,
            meta,
            consensus_score: self.consensus_score,
            created_at: self.created_at,
            updated_at: self.updated_at,
            tx_id: self.tx_id,
            hash: self.hash,
        })
    }
}
