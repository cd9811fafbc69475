//! Search requests, results and graph expansion context.

use serde::{Deserialize, Serialize};

/// Which retrieval arms a search exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Dense-vector ANN only.
    Semantic,
    /// Full-text lexical only.
    Lexical,
    /// Both arms fused by Reciprocal Rank Fusion. The default.
    Hybrid,
}

/// Parameters of a search call. `tenant_id` is mandatory on every path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The query text.
    pub query: String,
    /// The tenant scope. Never optional.
    pub tenant_id: String,
    /// Optional project filter within the tenant.
    pub project: Option<String>,
    /// Number of results to return.
    pub top_k: usize,
    /// Optional ISO-8601 instant: search the facts active at that time.
    pub as_of: Option<String>,
    /// Arms to exercise.
    pub mode: SearchMode,
    /// Graph expansion hops; 0 disables expansion.
    pub graph_depth: u32,
    /// Cap on nodes visited during graph expansion.
    pub max_graph_nodes: usize,
}

impl SearchRequest {
    /// A hybrid search with default fan-out over the given tenant.
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            tenant_id: tenant_id.into(),
            project: None,
            top_k: 5,
            as_of: None,
            mode: SearchMode::Hybrid,
            graph_depth: 0,
            max_graph_nodes: 50,
        }
    }
}

/// A neighbor attached by graph expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNeighbor {
    /// The related entity's name.
    pub entity: String,
    /// The relation type on the traversed edge.
    pub relation: String,
    /// Hop distance from the seed entity.
    pub depth: u32,
}

/// One fused search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching fact.
    pub fact_id: i64,
    /// Its project.
    pub project: String,
    /// Decrypted content.
    pub content: String,
    /// The fact's kind.
    pub fact_type: String,
    /// Fused relevance score (higher is better).
    pub score: f64,
    /// The fact's tags.
    pub tags: Vec<String>,
    /// Insertion timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
    /// Originating ledger transaction, when recorded.
    pub tx_id: Option<i64>,
    /// That transaction's hash, when recorded.
    pub hash: Option<String>,
    /// Graph neighbors, when expansion was requested.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub context: Vec<GraphNeighbor>,
}
