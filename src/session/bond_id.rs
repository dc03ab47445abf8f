//! Bond ID derivation.
//!
//! The ID mixes the wall-clock time of computation into the digest, so the
//! same UID set validated twice yields two different IDs.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Length of the externally visible bond ID (hex characters).
pub const BOND_ID_LEN: usize = 16;

/// SHA-256 over `"<rfc3339 timestamp>-[uid1 uid2 uid3]"`, truncated to
/// the first 16 hex characters.
pub fn generate_bond_id(uids: &[String], at: DateTime<Utc>) -> String {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    let combined = format!("{}-[{}]", timestamp, uids.join(" "));
    let digest = Sha256::digest(combined.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(BOND_ID_LEN);
    id
}

pub fn is_valid_bond_id(id: &str) -> bool {
    id.len() == BOND_ID_LEN && id.chars().all(|c| c.is_ascii_hexdigit())
}
