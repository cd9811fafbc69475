//! The individual compaction strategies.
//!
//! Each strategy works through the fact store's public API so deprecation
//! reasons, ledger entries and tenant scoping behave exactly as a manual
//! deprecation would.

use cortex_crypto::hash::content_hash;
use cortex_facts::{FactStore, StoreFact};
use cortex_types::compaction::CompactionResult;
use cortex_types::error::CoreError;
use cortex_types::fact::{Fact, FactType};
use std::collections::BTreeMap;
use strsim::normalized_levenshtein;
use tracing::info;

/// Normalizes content for duplicate grouping: lowercase, punctuation to
/// spaces, whitespace collapsed. Storage-time dedup compares exact bytes;
/// this catches the cosmetic variants it cannot.
pub fn normalize(content: &str) -> String {
    content
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// DEDUP: group active facts by normalized content hash; within each
/// group the oldest row survives. A second pass folds near-duplicates
/// (normalized edit similarity at or above the threshold) into the
/// surviving canonicals.
pub async fn execute_dedup(
    store: &FactStore,
    project: &str,
    tenant_id: &str,
    result: &mut CompactionResult,
    dry_run: bool,
    similarity_threshold: f64,
) -> Result<(), CoreError> {
    let facts = store.recall(project, tenant_id, None, 0).await?;
    if facts.len() <= 1 {
        return Ok(());
    }

    let mut groups: BTreeMap<String, Vec<&Fact>> = BTreeMap::new();
    for fact in &facts {
        groups
            .entry(content_hash(&normalize(&fact.content)))
            .or_default()
            .push(fact);
    }

    let mut deprecated: Vec<i64> = Vec::new();
    let mut canonicals: Vec<&Fact> = Vec::new();
    for group in groups.values_mut() {
        group.sort_by_key(|f| f.id);
        let Some((keep, rest)) = group.split_first() else {
            continue;
        };
        canonicals.push(keep);
        for fact in rest {
            if !dry_run {
                store
                    .deprecate(
                        fact.id,
                        tenant_id,
                        Some(format!("compacted:dedup→#{}", keep.id)),
                    )
                    .await?;
            }
            deprecated.push(fact.id);
        }
    }

    // Near-duplicate pass over the surviving canonicals (text metric only).
    let mut folded: Vec<i64> = Vec::new();
    for (i, keep) in canonicals.iter().enumerate() {
        for other in canonicals.iter().skip(i + 1) {
            if folded.contains(&other.id) {
                continue;
            }
            let similarity =
                normalized_levenshtein(&normalize(&keep.content), &normalize(&other.content));
            if similarity >= similarity_threshold {
                if !dry_run {
                    store
                        .deprecate(
                            other.id,
                            tenant_id,
                            Some(format!(
                                "compacted:dedup→#{} (sim={similarity:.3})",
                                keep.id
                            )),
                        )
                        .await?;
                }
                folded.push(other.id);
            }
        }
    }
    deprecated.extend(folded);

    if !deprecated.is_empty() {
        deprecated.sort_unstable();
        let detail = format!("dedup: deprecated {} duplicate facts", deprecated.len());
        info!(project, "{detail}");
        result.details.push(detail);
        result.strategies_applied.push("dedup".to_string());
        result.deprecated_ids.extend(deprecated);
    }
    Ok(())
}

/// MERGE_ERRORS: group active error facts by normalized content hash and
/// consolidate each repeated group into one canonical fact recording the
/// occurrence count.
pub async fn execute_merge_errors(
    store: &FactStore,
    project: &str,
    tenant_id: &str,
    result: &mut CompactionResult,
    dry_run: bool,
) -> Result<(), CoreError> {
    let facts = store.recall(project, tenant_id, None, 0).await?;
    let errors: Vec<&Fact> = facts
        .iter()
        .filter(|f| f.fact_type == FactType::Error)
        .collect();
    if errors.len() <= 1 {
        return Ok(());
    }

    let mut groups: BTreeMap<String, Vec<&Fact>> = BTreeMap::new();
    for fact in errors {
        groups
            .entry(content_hash(&normalize(&fact.content)))
            .or_default()
            .push(fact);
    }

    let mut merged = 0usize;
    for group in groups.values_mut() {
        if group.len() <= 1 {
            continue;
        }
        group.sort_by_key(|f| f.id);
        let Some(canonical) = group.first() else {
            continue;
        };
        merged += group.len();

        if dry_run {
            result.deprecated_ids.extend(group.iter().map(|f| f.id));
            continue;
        }

        let mut distinct: Vec<&str> = group.iter().map(|f| f.content.as_str()).collect();
        distinct.dedup();
        let merged_content = format!(
            "Recurring error ({} occurrences): {}",
            group.len(),
            distinct.join(" | ")
        );
        let mut req = StoreFact::new(project, merged_content, tenant_id);
        req.fact_type = FactType::Error;
        req.tags = canonical.tags.clone();
        req.confidence = canonical.confidence;
        req.source = Some("compactor:merge_errors".to_string());
        let new_id = store.store(req).await?;
        result.new_fact_ids.push(new_id);

        for fact in group.iter() {
            store
                .deprecate(
                    fact.id,
                    tenant_id,
                    Some(format!("compacted:merge_errors→#{new_id}")),
                )
                .await?;
            result.deprecated_ids.push(fact.id);
        }
    }

    if merged > 0 {
        let detail = format!("merge_errors: consolidated {merged} error facts");
        info!(project, "{detail}");
        result.details.push(detail);
        result.strategies_applied.push("merge_errors".to_string());
    }
    Ok(())
}

/// STALENESS_PRUNE: deprecate active facts older than the age bound whose
/// consensus never rose above the floor.
pub async fn execute_staleness_prune(
    store: &FactStore,
    project: &str,
    tenant_id: &str,
    result: &mut CompactionResult,
    dry_run: bool,
    max_age_days: u32,
    min_consensus: f64,
) -> Result<(), CoreError> {
    let facts = store.recall(project, tenant_id, None, 0).await?;
    let now = chrono::Utc::now();
    let mut pruned: Vec<i64> = Vec::new();

    for fact in &facts {
        let Some(created) = cortex_types::time::parse_iso(&fact.created_at) else {
            continue;
        };
        let age_days = (now - created).num_days();
        if age_days > i64::from(max_age_days) && fact.consensus_score < min_consensus {
            if !dry_run {
                store
                    .deprecate(fact.id, tenant_id, Some("stale".to_string()))
                    .await?;
            }
            pruned.push(fact.id);
        }
    }

    if !pruned.is_empty() {
        let detail = format!("staleness_prune: deprecated {} stale facts", pruned.len());
        info!(project, "{detail}");
        result.details.push(detail);
        result.strategies_applied.push("staleness_prune".to_string());
        result.deprecated_ids.extend(pruned);
    }
    Ok(())
}
