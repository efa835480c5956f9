// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types shared across the engine.
//!
//! Processes, shards and the defragger all refer to each other by id rather
//! than by direct reference (see DESIGN.md, "cyclic graph" note) — the tick
//! pipeline is the sole authority that resolves an id to live state.

use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Ephemeral identifier for a process, unique within its owning shard.
///
/// Not stable across a ghost-gate transfer: crossing shards destroys the
/// process in shard A and spawns a new one, with a new id, in shard B.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identifier for a shard, stable for the shard's entire lifetime.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ShardId(pub u64);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Persistent identity key assigned by the external identity store.
///
/// Opaque to the engine: we never parse it, only carry it across spawns,
/// kills, and ghost transfers so the outside world can recognize "the same
/// human or agent" across processes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct CallSign(pub String);

impl fmt::Display for CallSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque capability token handed back to a caller on `join`, required on
/// every subsequent `submit`/`perceive` call.
///
/// Derived as `blake3("session:" || shard_id || process_id || nonce)` so it
/// carries no information recoverable without the nonce, and two sessions
/// never collide as long as the nonce source doesn't repeat.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct SessionToken(pub [u8; 32]);

impl SessionToken {
    /// Mints a token for `(shard, process)`, salted with `nonce` (a
    /// supervisor-local monotonic counter; not a source of randomness).
    #[must_use]
    pub fn mint(shard: ShardId, process: ProcessId, nonce: u64) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"session:");
        hasher.update(&shard.0.to_le_bytes());
        hasher.update(&process.0.to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_short(&self.0))
    }
}

fn hex_short(bytes: &[u8; 32]) -> String {
    bytes[0..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_token_is_deterministic_in_its_inputs() {
        let a = SessionToken::mint(ShardId(1), ProcessId(2), 3);
        let b = SessionToken::mint(ShardId(1), ProcessId(2), 3);
        assert_eq!(a, b);
    }

    #[test]
    fn session_token_changes_with_nonce() {
        let a = SessionToken::mint(ShardId(1), ProcessId(2), 3);
        let b = SessionToken::mint(ShardId(1), ProcessId(2), 4);
        assert_ne!(a, b);
    }
}
