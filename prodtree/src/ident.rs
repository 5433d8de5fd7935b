//! Sortable 64-bit node identifiers.
//!
//! Layout (high to low): 41 bits of milliseconds since the 2010-01-01 UTC
//! epoch, 4 bits of machine, 4 bits of process and 14 bits of randomness.
//! Ids generated on the same host within the same millisecond still differ
//! in the random tail, and ids sort by creation time.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds between the Unix epoch and 2010-01-01T00:00:00Z.
const ID_EPOCH_MS: i64 = 1_262_304_000_000;

const MACHINE_SHIFT: u32 = 18;
const PROCESS_SHIFT: u32 = 14;
const TIMESTAMP_SHIFT: u32 = 22;
const RANDOM_MASK: i64 = (1 << PROCESS_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl NodeId {
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Creation time encoded in the id, as milliseconds since the Unix epoch.
    pub fn timestamp_ms(self) -> i64 {
        (self.0 >> TIMESTAMP_SHIFT) + ID_EPOCH_MS
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(raw: i64) -> Self {
        NodeId(raw)
    }
}

fn machine_nibble() -> i64 {
    static NIBBLE: OnceLock<i64> = OnceLock::new();
    *NIBBLE.get_or_init(|| {
        let seed = std::fs::read_to_string("/etc/machine-id")
            .ok()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        seed.trim().hash(&mut hasher);
        (hasher.finish() & 0xF) as i64
    })
}

fn process_nibble() -> i64 {
    (std::process::id() as i64) & 0xF
}

fn random_tail() -> i64 {
    let bytes = Uuid::new_v4().into_bytes();
    let raw = ((bytes[0] as i64) << 8) | bytes[1] as i64;
    raw & RANDOM_MASK
}

/// Generates a fresh id for a node created right now.
pub fn generate() -> NodeId {
    let elapsed = Utc::now().timestamp_millis() - ID_EPOCH_MS;
    let raw = (elapsed << TIMESTAMP_SHIFT)
        | (machine_nibble() << MACHINE_SHIFT)
        | (process_nibble() << PROCESS_SHIFT)
        | random_tail();
    NodeId(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_sort_by_creation_time() {
        let first = generate();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = generate();
        assert!(first < second);
    }

    #[test]
    fn id_embeds_a_recent_timestamp() {
        let id = generate();
        let now = Utc::now().timestamp_millis();
        let delta = now - id.timestamp_ms();
        assert!(delta >= 0 && delta < 2_000, "delta was {delta}ms");
    }

    #[test]
    fn ids_are_distinct_within_a_burst() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(generate()));
        }
    }

    #[test]
    fn display_matches_raw_value() {
        let id = NodeId(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(NodeId::from(42).as_i64(), 42);
    }
}
