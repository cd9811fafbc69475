//! The in-process HNSW vector index.
//!
//! A hierarchical navigable small world graph over the fact embeddings:
//! greedy descent through the upper layers, best-first beam search at the
//! bottom. Cosine distance; payloads are fact ids. The index is rebuilt
//! from the `fact_embeddings` table at startup and maintained incrementally
//! by the embedding backfill worker.

use cortex_types::error::RetrievalError;
use rand::Rng;
use rusqlite::Connection;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

const DEFAULT_M: usize = 12;
const DEFAULT_EF_CONSTRUCTION: usize = 64;
const DEFAULT_EF_SEARCH: usize = 64;

#[derive(Debug, Clone)]
struct GraphNode {
    vector: Vec<f32>,
    /// Neighbor ids per layer; index 0 is the bottom layer.
    neighbors: Vec<Vec<i64>>,
}

#[derive(PartialEq)]
struct Candidate {
    id: i64,
    distance: f32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the closest candidate first.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

/// Serializes a vector as little-endian `f32` bytes for the
/// `fact_embeddings` blob column.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserializes a `fact_embeddings` blob.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A navigable small-world index over fact embeddings.
pub struct VectorIndex {
    dimension: usize,
    nodes: BTreeMap<i64, GraphNode>,
    entry_point: Option<i64>,
    max_layer: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    level_mult: f64,
}

impl VectorIndex {
    /// An empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        VectorIndex {
            dimension,
            nodes: BTreeMap::new(),
            entry_point: None,
            max_layer: 0,
            m: DEFAULT_M,
            m_max0: DEFAULT_M * 2,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            level_mult: 1.0 / (DEFAULT_M as f64).ln(),
        }
    }

    /// The dimension the index was built with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing is indexed yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rebuilds an index from the `fact_embeddings` table.
    pub fn load(conn: &Connection, dimension: usize) -> Result<Self, rusqlite::Error> {
        let mut index = VectorIndex::new(dimension);
        let mut stmt = conn.prepare("SELECT fact_id, embedding FROM fact_embeddings")?;
        let rows: Vec<(i64, Vec<u8>)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;
        for (fact_id, blob) in rows {
            let vector = blob_to_vector(&blob);
            if vector.len() == dimension {
                let _ = index.insert(fact_id, vector);
            }
        }
        Ok(index)
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-r.ln() * self.level_mult).floor() as usize
    }

    fn distance_to(&self, query: &[f32], id: i64) -> f32 {
        self.nodes
            .get(&id)
            .map(|n| cosine_distance(query, &n.vector))
            .unwrap_or(f32::MAX)
    }

    /// Best-first beam search within one layer.
    fn search_layer(&self, query: &[f32], entry: i64, ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: BTreeSet<i64> = BTreeSet::new();
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();

        let d = self.distance_to(query, entry);
        visited.insert(entry);
        candidates.push(Candidate { id: entry, distance: d });
        results.push(std::cmp::Reverse(Candidate { id: entry, distance: d }));

        while let Some(current) = candidates.pop() {
            let worst = results
                .peek()
                .map(|r| r.0.distance)
                .unwrap_or(f32::MAX);
            if current.distance > worst && results.len() >= ef {
                break;
            }
            let neighbor_ids: Vec<i64> = self
                .nodes
                .get(&current.id)
                .and_then(|n| n.neighbors.get(layer))
                .cloned()
                .unwrap_or_default();
            for neighbor in neighbor_ids {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.distance_to(query, neighbor);
                let worst = results
                    .peek()
                    .map(|r| r.0.distance)
                    .unwrap_or(f32::MAX);
                if results.len() < ef || d < worst {
                    candidates.push(Candidate { id: neighbor, distance: d });
                    results.push(std::cmp::Reverse(Candidate { id: neighbor, distance: d }));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        out
    }

    /// Greedy single-step descent used above the insertion/search level.
    fn descend(&self, query: &[f32], mut current: i64, from: usize, down_to: usize) -> i64 {
        let mut current_dist = self.distance_to(query, current);
        let mut layer = from;
        loop {
            let mut changed = true;
            while changed {
                changed = false;
                let neighbor_ids: Vec<i64> = self
                    .nodes
                    .get(&current)
                    .and_then(|n| n.neighbors.get(layer))
                    .cloned()
                    .unwrap_or_default();
                for neighbor in neighbor_ids {
                    let d = self.distance_to(query, neighbor);
                    if d < current_dist {
                        current_dist = d;
                        current = neighbor;
                        changed = true;
                    }
                }
            }
            if layer == down_to {
                break;
            }
            layer -= 1;
        }
        current
    }

    /// Inserts (or replaces) a vector under the given fact id.
    pub fn insert(&mut self, fact_id: i64, vector: Vec<f32>) -> Result<(), RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                got: vector.len(),
                expected: self.dimension,
            });
        }
        if self.nodes.contains_key(&fact_id) {
            self.remove(fact_id);
        }

        let level = self.random_level();
        let node = GraphNode {
            vector: vector.clone(),
            neighbors: vec![Vec::new(); level + 1],
        };

        let Some(entry) = self.entry_point else {
            self.nodes.insert(fact_id, node);
            self.entry_point = Some(fact_id);
            self.max_layer = level;
            return Ok(());
        };

        self.nodes.insert(fact_id, node);

        let mut current = entry;
        if self.max_layer > level {
            current = self.descend(&vector, current, self.max_layer, level + 1);
        }

        for layer in (0..=level.min(self.max_layer)).rev() {
            let found = self.search_layer(&vector, current, self.ef_construction, layer);
            let limit = if layer == 0 { self.m_max0 } else { self.m };
            let chosen: Vec<i64> = found.iter().take(self.m).map(|c| c.id).collect();

            if let Some(first) = found.first() {
                current = first.id;
            }

            for &neighbor in &chosen {
                if neighbor == fact_id {
                    continue;
                }
                self.link(fact_id, neighbor, layer, limit);
                self.link(neighbor, fact_id, layer, limit);
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(fact_id);
        }
        Ok(())
    }

    /// Adds `to` to `from`'s neighbor list at `layer`, pruning to the
    /// closest `limit` neighbors.
    fn link(&mut self, from: i64, to: i64, layer: usize, limit: usize) {
        let from_vector = match self.nodes.get(&from) {
            Some(n) => n.vector.clone(),
            None => return,
        };
        let mut list = match self
            .nodes
            .get(&from)
            .and_then(|n| n.neighbors.get(layer))
        {
            Some(l) => l.clone(),
            None => return,
        };
        if !list.contains(&to) {
            list.push(to);
        }
        if list.len() > limit {
            list.sort_by(|a, b| {
                let da = self.distance_to(&from_vector, *a);
                let db = self.distance_to(&from_vector, *b);
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            });
            list.truncate(limit);
        }
        if let Some(node) = self.nodes.get_mut(&from) {
            if let Some(slot) = node.neighbors.get_mut(layer) {
                *slot = list;
            }
        }
    }

    /// Removes a vector: the node goes away, incoming edges are stripped,
    /// and the entry point is re-elected when it was the victim.
    pub fn remove(&mut self, fact_id: i64) -> bool {
        if self.nodes.remove(&fact_id).is_none() {
            return false;
        }
        for node in self.nodes.values_mut() {
            for layer in &mut node.neighbors {
                layer.retain(|&id| id != fact_id);
            }
        }
        if self.entry_point == Some(fact_id) {
            if self.nodes.is_empty() {
                self.entry_point = None;
                self.max_layer = 0;
            } else {
                let mut best_layer = 0;
                let mut candidate = None;
                // BTreeMap iteration is deterministic.
                for (&id, node) in &self.nodes {
                    let l = node.neighbors.len().saturating_sub(1);
                    if l >= best_layer {
                        best_layer = l;
                        candidate = Some(id);
                    }
                }
                self.entry_point = candidate;
                self.max_layer = best_layer;
            }
        }
        true
    }

    /// Nearest neighbors of `query`: `(fact_id, similarity)` pairs, best
    /// first, where similarity is `1 - cosine_distance`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        let mut current = entry;
        if self.max_layer > 0 {
            current = self.descend(query, current, self.max_layer, 1);
        }
        let ef = self.ef_search.max(k);
        self.search_layer(query, current, ef, 0)
            .into_iter()
            .take(k)
            .map(|c| (c.id, 1.0 - c.distance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vector(dim: usize, seed: u64) -> Vec<f32> {
        // Cheap deterministic pseudo-vectors.
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let mut v: Vec<f32> = (0..dim)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0
            })
            .collect();
        crate::embedder::l2_normalize(&mut v);
        v
    }

    fn brute_force_top1(vectors: &[(i64, Vec<f32>)], query: &[f32]) -> i64 {
        vectors
            .iter()
            .min_by(|a, b| {
                cosine_distance(query, &a.1)
                    .partial_cmp(&cosine_distance(query, &b.1))
                    .unwrap()
            })
            .unwrap()
            .0
    }

    #[test]
    fn finds_the_true_nearest_neighbor() {
        let dim = 16;
        let vectors: Vec<(i64, Vec<f32>)> =
            (1..=60).map(|i| (i, test_vector(dim, i as u64))).collect();
        let mut index = VectorIndex::new(dim);
        for (id, v) in &vectors {
            index.insert(*id, v.clone()).unwrap();
        }
        for probe in [3u64, 17, 42] {
            let query = test_vector(dim, probe * 1000 + 7);
            let expected = brute_force_top1(&vectors, &query);
            let got = index.search(&query, 5);
            assert_eq!(got[0].0, expected, "probe {probe}");
        }
    }

    #[test]
    fn exact_match_scores_near_one() {
        let dim = 8;
        let mut index = VectorIndex::new(dim);
        for i in 1..=20 {
            index.insert(i, test_vector(dim, i as u64)).unwrap();
        }
        let query = test_vector(dim, 9);
        let results = index.search(&query, 3);
        assert_eq!(results[0].0, 9);
        assert!(results[0].1 > 0.999);
    }

    #[test]
    fn removal_forgets_the_vector() {
        let dim = 8;
        let mut index = VectorIndex::new(dim);
        for i in 1..=10 {
            index.insert(i, test_vector(dim, i as u64)).unwrap();
        }
        assert!(index.remove(4));
        assert!(!index.remove(4));
        let query = test_vector(dim, 4);
        let results = index.search(&query, 10);
        assert!(results.iter().all(|(id, _)| *id != 4));
        assert_eq!(index.len(), 9);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = VectorIndex::new(8);
        let err = index.insert(1, vec![0.5; 4]);
        assert!(matches!(
            err,
            Err(RetrievalError::DimensionMismatch { got: 4, expected: 8 })
        ));
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = VectorIndex::new(8);
        assert!(index.search(&[0.0; 8], 5).is_empty());
    }

    #[test]
    fn blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }
}
