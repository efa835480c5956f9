// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Configuration keys the core consumes (spec.md §6).
//!
//! This is the *shape* only. Loading it from a file, environment, or admin
//! API is "configuration/env plumbing", which spec.md §1 keeps outside the
//! core — mirrors echo-app-core's `ConfigService<S: ConfigStore>` split
//! minus the `ConfigStore`/filesystem backend, which belongs to that
//! external plumbing layer, not here.

use serde::{Deserialize, Serialize};

/// Core-consumed configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoreConfig {
    /// Grid side length `G`.
    pub grid_size: i32,
    /// Total wall-edge count `W`.
    pub wall_count: usize,
    /// Inclusive seconds range the external scheduler should pick a tick
    /// cadence from. The core itself never sleeps; this is carried only so
    /// the core's config shape matches what the scheduler reads.
    pub tick_cadence_range_secs: (u32, u32),
    /// Minimum active process count before a shard starts counting toward
    /// termination.
    pub min_active_processes_per_shard: usize,
    /// Consecutive under-minimum ticks before a shard terminates.
    pub shard_termination_quiet_threshold: u32,
    /// Whether replay snapshots are emitted at all (fire-and-forget either
    /// way; this just gates whether the recorder is wired up).
    pub replay_logging_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            grid_size: 20,
            wall_count: 80,
            tick_cadence_range_secs: (30, 60),
            min_active_processes_per_shard: 1,
            shard_termination_quiet_threshold: 20,
            replay_logging_enabled: true,
        }
    }
}

impl CoreConfig {
    /// Validates internal consistency; returns a human-readable reason on
    /// failure. Called once at shard creation, not on every tick.
    pub fn validate(&self) -> Result<(), String> {
        if self.grid_size <= 0 {
            return Err("grid_size must be positive".to_owned());
        }
        let max_edges = 2 * (self.grid_size as usize) * (self.grid_size as usize + 1);
        if self.wall_count > max_edges {
            return Err(format!(
                "wall_count {} exceeds maximum possible edges {max_edges} for grid_size {}",
                self.wall_count, self.grid_size
            ));
        }
        if self.tick_cadence_range_secs.0 > self.tick_cadence_range_secs.1 {
            return Err("tick_cadence_range_secs must be non-decreasing".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_grid() {
        let cfg = CoreConfig {
            grid_size: 0,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_excessive_wall_count() {
        let cfg = CoreConfig {
            wall_count: 100_000,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
