//! Graph expansion over the entity overlay.
//!
//! From the entities a fact mentions, walk `entity_relations` breadth-first
//! up to the requested depth, capped at `max_nodes` visited entities. The
//! overlay is best-effort data produced at insert time; expansion failures
//! degrade to an empty context, never an error.

use cortex_types::search::GraphNeighbor;
use rusqlite::Connection;
use std::collections::{BTreeSet, VecDeque};

/// Expands the context around one fact.
pub fn expand(
    conn: &Connection,
    fact_id: i64,
    depth: u32,
    max_nodes: usize,
) -> rusqlite::Result<Vec<GraphNeighbor>> {
    if depth == 0 || max_nodes == 0 {
        return Ok(Vec::new());
    }

    // Seed entities: endpoints of relations extracted from this fact.
    let mut stmt = conn.prepare(
        "SELECT source_entity_id, target_entity_id FROM entity_relations
         WHERE source_fact_id = ?1",
    )?;
    let mut seeds: BTreeSet<i64> = BTreeSet::new();
    for row in stmt.query_map([fact_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))? {
        let (a, b) = row?;
        seeds.insert(a);
        seeds.insert(b);
    }
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let mut visited = seeds.clone();
    let mut queue: VecDeque<(i64, u32)> = seeds.iter().map(|&id| (id, 0)).collect();
    let mut neighbors = Vec::new();

    let mut edges = conn.prepare(
        "SELECT source_entity_id, target_entity_id, relation_type
         FROM entity_relations
         WHERE source_entity_id = ?1 OR target_entity_id = ?1",
    )?;
    let mut names = conn.prepare("SELECT name FROM entities WHERE id = ?1")?;

    while let Some((entity_id, at_depth)) = queue.pop_front() {
        if at_depth >= depth || visited.len() >= max_nodes {
            continue;
        }
        let hops: Vec<(i64, i64, String)> = edges
            .query_map([entity_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<_, _>>()?;
        for (source, target, relation) in hops {
            let other = if source == entity_id { target } else { source };
            if !visited.insert(other) {
                continue;
            }
            if visited.len() > max_nodes {
                break;
            }
            let name: Option<String> = names
                .query_map([other], |r| r.get(0))?
                .next()
                .transpose()?;
            if let Some(name) = name {
                neighbors.push(GraphNeighbor {
                    entity: name,
                    relation,
                    depth: at_depth + 1,
                });
            }
            queue.push_back((other, at_depth + 1));
        }
    }

    Ok(neighbors)
}
