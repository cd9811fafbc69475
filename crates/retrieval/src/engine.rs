//! The retrieval engine: arms, fusion, filters, graph expansion.
//!
//! Two independent arms, semantic (ANN over the vector index) and lexical
//! (FTS5 MATCH), fused by Reciprocal Rank Fusion. Every arm applies the
//! tenant filter as a required `WHERE f.tenant_id = ?` and the temporal
//! filter as bound parameters; caller strings never reach SQL as fragments.
//! A missing or failing semantic arm degrades a hybrid search to
//! lexical-only, it never errors.

use crate::fusion::{reciprocal_rank_fusion, RRF_K, W_LEXICAL, W_SEMANTIC};
use crate::graph;
use crate::index::VectorIndex;
use crate::Embedder;
use cortex_crypto::Encrypter;
use cortex_storage::ReadPool;
use cortex_telemetry::search_metrics;
use cortex_telemetry::time::SearchTimer;
use cortex_types::error::RetrievalError;
use cortex_types::search::{SearchMode, SearchRequest, SearchResult};
use cortex_types::time::normalize_iso;
use rusqlite::types::Value as SqlRowValue;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Over-fetch multiplier per arm before filtering and fusion (α ≥ 2).
const ARM_FANOUT: usize = 3;

/// The hybrid retrieval engine.
pub struct RetrievalEngine {
    pool: Arc<ReadPool>,
    index: Arc<RwLock<VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    encrypter: Arc<Encrypter>,
}

struct ArmFilters {
    tenant_id: String,
    project: Option<String>,
    as_of: Option<String>,
}

impl RetrievalEngine {
    /// An engine over the given pool, index and embedder. `embedder: None`
    /// models a deployment without the vector arm (text-only mode).
    pub fn new(
        pool: Arc<ReadPool>,
        index: Arc<RwLock<VectorIndex>>,
        embedder: Option<Arc<dyn Embedder>>,
        encrypter: Arc<Encrypter>,
    ) -> Self {
        RetrievalEngine {
            pool,
            index,
            embedder,
            encrypter,
        }
    }

    /// Shared handle to the vector index (the backfill worker feeds it).
    pub fn index(&self) -> Arc<RwLock<VectorIndex>> {
        Arc::clone(&self.index)
    }

    /// Executes a search request.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, RetrievalError> {
        let arm_label = match request.mode {
            SearchMode::Semantic => "semantic",
            SearchMode::Lexical => "lexical",
            SearchMode::Hybrid => "hybrid",
        };
        search_metrics().inc_searches(arm_label);
        let _timer = SearchTimer::new(search_metrics(), arm_label);

        let as_of = match &request.as_of {
            Some(raw) => Some(
                normalize_iso(raw)
                    .ok_or_else(|| RetrievalError::Search(format!("invalid as_of: {raw}")))?,
            ),
            None => None,
        };
        let filters = ArmFilters {
            tenant_id: request.tenant_id.clone(),
            project: request.project.clone(),
            as_of,
        };
        let fanout = request.top_k.saturating_mul(ARM_FANOUT).max(request.top_k);

        let semantic = match request.mode {
            SearchMode::Lexical => Vec::new(),
            _ => self.semantic_arm(&request.query, &filters, fanout).await,
        };
        let lexical = match request.mode {
            SearchMode::Semantic => Vec::new(),
            _ => self.lexical_arm(&request.query, &filters, fanout).await?,
        };

        if request.mode == SearchMode::Hybrid && semantic.is_empty() && !lexical.is_empty() {
            search_metrics().inc_lexical_fallbacks();
        }

        let fused = match request.mode {
            SearchMode::Semantic => {
                reciprocal_rank_fusion(&[(&semantic, 1.0)], RRF_K, request.top_k)
            }
            SearchMode::Lexical => {
                reciprocal_rank_fusion(&[(&lexical, 1.0)], RRF_K, request.top_k)
            }
            SearchMode::Hybrid => reciprocal_rank_fusion(
                &[(&semantic, W_SEMANTIC), (&lexical, W_LEXICAL)],
                RRF_K,
                request.top_k,
            ),
        };

        self.hydrate(fused, request).await
    }

    /// Dense arm: embed the query, over-fetch from the index, keep ids the
    /// filters admit. Any failure degrades to an empty arm.
    async fn semantic_arm(&self, query: &str, filters: &ArmFilters, fanout: usize) -> Vec<i64> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        let query_vector = match embedder.encode(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("query embedding failed, degrading to lexical: {e}");
                return Vec::new();
            }
        };
        let candidates: Vec<i64> = match self.index.read() {
            Ok(index) => index
                .search(&query_vector, fanout)
                .into_iter()
                .map(|(id, _)| id)
                .collect(),
            Err(_) => return Vec::new(),
        };
        if candidates.is_empty() {
            return Vec::new();
        }
        match self.filter_candidates(candidates, filters).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("semantic filter failed, degrading to lexical: {e}");
                Vec::new()
            }
        }
    }

    /// Applies tenant/project/temporal filters to ANN candidates,
    /// preserving ANN order.
    async fn filter_candidates(
        &self,
        candidates: Vec<i64>,
        filters: &ArmFilters,
    ) -> Result<Vec<i64>, RetrievalError> {
        let placeholders = vec!["?"; candidates.len()].join(",");
        let mut sql = format!(
            "SELECT f.id FROM facts f WHERE f.id IN ({placeholders}) AND f.tenant_id = ?"
        );
        let mut params: Vec<SqlRowValue> = candidates
            .iter()
            .map(|id| SqlRowValue::Integer(*id))
            .collect();
        params.push(SqlRowValue::Text(filters.tenant_id.clone()));
        append_filters(&mut sql, &mut params, filters);

        let allowed = self
            .pool
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let ids: Vec<i64> = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |r| r.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let allowed: std::collections::BTreeSet<i64> = allowed.into_iter().collect();
        Ok(candidates
            .into_iter()
            .filter(|id| allowed.contains(id))
            .collect())
    }

    /// Lexical arm: FTS5 MATCH over the shadow index, ranked by bm25.
    async fn lexical_arm(
        &self,
        query: &str,
        filters: &ArmFilters,
        fanout: usize,
    ) -> Result<Vec<i64>, RetrievalError> {
        let match_expr = fts_match_expression(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = "SELECT f.id FROM facts_fts
             JOIN facts f ON f.id = facts_fts.rowid
             WHERE facts_fts MATCH ? AND f.tenant_id = ?"
            .to_string();
        let mut params: Vec<SqlRowValue> = vec![
            SqlRowValue::Text(match_expr),
            SqlRowValue::Text(filters.tenant_id.clone()),
        ];
        append_filters(&mut sql, &mut params, filters);
        sql.push_str(" ORDER BY facts_fts.rank LIMIT ?");
        params.push(SqlRowValue::Integer(fanout as i64));

        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let ids: Vec<i64> = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |r| r.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))
    }

    /// Fetches full rows for the fused ids and decrypts them, preserving
    /// fused order. Optionally attaches graph context.
    async fn hydrate(
        &self,
        fused: Vec<(i64, f64)>,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if fused.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT f.id, f.tenant_id, f.project, f.content, f.fact_type, f.tags,
                    f.created_at, f.updated_at, f.tx_id, t.hash
             FROM facts f LEFT JOIN transactions t ON f.tx_id = t.id
             WHERE f.id IN ({placeholders})"
        );
        let params: Vec<SqlRowValue> = ids.iter().map(|id| SqlRowValue::Integer(*id)).collect();
        let graph_depth = request.graph_depth;
        let max_graph_nodes = request.max_graph_nodes;

        type RawRow = (
            i64,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            Option<i64>,
            Option<String>,
            Vec<cortex_types::search::GraphNeighbor>,
        );
        let rows: Vec<RawRow> = self
            .pool
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = Vec::new();
                let mapped = stmt.query_map(rusqlite::params_from_iter(params.iter()), |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                        r.get::<_, String>(7)?,
                        r.get::<_, Option<i64>>(8)?,
                        r.get::<_, Option<String>>(9)?,
                    ))
                })?;
                for row in mapped {
                    let row = row?;
                    let context = if graph_depth > 0 {
                        graph::expand(conn, row.0, graph_depth, max_graph_nodes)
                            .unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    rows.push((
                        row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9,
                        context,
                    ));
                }
                Ok(rows)
            })
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let mut by_id = std::collections::BTreeMap::new();
        for row in rows {
            by_id.insert(row.0, row);
        }

        let mut results = Vec::with_capacity(fused.len());
        for (fact_id, score) in fused {
            let Some((
                id,
                tenant_id,
                project,
                stored_content,
                fact_type,
                tags_json,
                created_at,
                updated_at,
                tx_id,
                hash,
                context,
            )) = by_id.remove(&fact_id)
            else {
                continue;
            };
            let content = match self.encrypter.open(&stored_content, &tenant_id) {
                Ok(c) => c,
                Err(e) => {
                    warn!(fact_id = id, "skipping undecryptable row in results: {e}");
                    continue;
                }
            };
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            results.push(SearchResult {
                fact_id: id,
                project,
                content,
                fact_type,
                score,
                tags,
                created_at,
                updated_at,
                tx_id,
                hash,
                context,
            });
        }
        Ok(results)
    }
}

/// Appends active/as-of and project predicates with bound parameters.
fn append_filters(sql: &mut String, params: &mut Vec<SqlRowValue>, filters: &ArmFilters) {
    if let Some(project) = &filters.project {
        sql.push_str(" AND f.project = ?");
        params.push(SqlRowValue::Text(project.clone()));
    }
    match &filters.as_of {
        Some(as_of) => {
            sql.push_str(" AND f.valid_from <= ? AND (f.valid_until IS NULL OR f.valid_until > ?)");
            params.push(SqlRowValue::Text(as_of.clone()));
            params.push(SqlRowValue::Text(as_of.clone()));
        }
        None => {
            sql.push_str(" AND f.valid_until IS NULL");
        }
    }
}

/// Reduces a caller query to a safe FTS5 match expression: bare tokens,
/// OR-joined, each quoted. Operators and punctuation in the input are
/// treated as token separators, never as FTS syntax.
fn fts_match_expression(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .take(16)
        .map(|t| format!("\"{t}\""))
        .collect();
    tokens.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expression_neutralizes_operators() {
        assert_eq!(fts_match_expression("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(fts_match_expression("a AND b)('"), "\"a\" OR \"AND\" OR \"b\"");
        assert_eq!(fts_match_expression("'); DROP TABLE facts; --"), "\"DROP\" OR \"TABLE\" OR \"facts\"");
        assert_eq!(fts_match_expression("!!!"), "");
    }
}
