//! Transaction hash derivation.
//!
//! The emitted formula (v2) is the lowercase hex SHA-256 of the
//! `':'`-joined fields `prev_hash : project : action : detail : timestamp`,
//! where `detail` is canonical JSON. An older deployment joined the same
//! fields with `'|'` over the detail text as stored; verification accepts a
//! match against either formula so historic chains stay valid. Nothing ever
//! emits v1.

use sha2::{Digest, Sha256};

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Current transaction hash: `sha256(prev:project:action:detail:timestamp)`.
///
/// `detail` must already be canonical JSON (see
/// [`canonical_json`](crate::canonical::canonical_json)).
pub fn tx_hash_v2(
    prev_hash: &str,
    project: &str,
    action: &str,
    detail: &str,
    timestamp: &str,
) -> String {
    let preimage = format!("{prev_hash}:{project}:{action}:{detail}:{timestamp}");
    sha256_hex(preimage.as_bytes())
}

/// Legacy transaction hash: the same five fields joined with `'|'`, detail
/// taken verbatim as stored. Accepted during verification only.
pub fn tx_hash_v1(
    prev_hash: &str,
    project: &str,
    action: &str,
    detail: &str,
    timestamp: &str,
) -> String {
    let preimage = format!("{prev_hash}|{project}|{action}|{detail}|{timestamp}");
    sha256_hex(preimage.as_bytes())
}

/// SHA-256 of arbitrary content, lowercase hex. Used for dedup grouping and
/// API-key storage.
pub fn content_hash(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_is_deterministic_and_hex() {
        let h = tx_hash_v2("GENESIS", "sim", "store", r#"{"fact_id":1}"#, "2026-01-01T00:00:00Z");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        let again =
            tx_hash_v2("GENESIS", "sim", "store", r#"{"fact_id":1}"#, "2026-01-01T00:00:00Z");
        assert_eq!(h, again);
    }

    #[test]
    fn v1_and_v2_differ() {
        let args = ("GENESIS", "p", "store", "{}", "2026-01-01T00:00:00Z");
        assert_ne!(
            tx_hash_v2(args.0, args.1, args.2, args.3, args.4),
            tx_hash_v1(args.0, args.1, args.2, args.3, args.4)
        );
    }

    #[test]
    fn every_field_is_load_bearing() {
        let base = tx_hash_v2("GENESIS", "p", "store", "{}", "t0");
        assert_ne!(base, tx_hash_v2("X", "p", "store", "{}", "t0"));
        assert_ne!(base, tx_hash_v2("GENESIS", "q", "store", "{}", "t0"));
        assert_ne!(base, tx_hash_v2("GENESIS", "p", "deprecate", "{}", "t0"));
        assert_ne!(base, tx_hash_v2("GENESIS", "p", "store", "{\"a\":1}", "t0"));
        assert_ne!(base, tx_hash_v2("GENESIS", "p", "store", "{}", "t1"));
    }
}
