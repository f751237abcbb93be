//! State snapshot persistence: §4.7.
//!
//! Write path: serialize to JSON, write to a sibling `.tmp` path, then
//! rename over the configured path so a reader never observes a
//! partially written file. Read path: reject unknown schema versions
//! and snapshots older than the configured max age outright rather
//! than attempting a partial restore.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use pacer_common::ProviderKey;

use crate::error::SnapshotError;
use crate::state::{ProviderState, ProviderStateStore};

const SCHEMA_VERSION: u32 = 1;

/// The subset of [`ProviderState`] worth persisting across restarts.
/// `next_send_time` and `pace_delay` describe the in-memory slot queue
/// and are meaningless once the process that owned them has exited.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistedProviderState {
    pub delay_ms: i64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub consecutive_rate_limit_failures: u32,
    pub total_delivered: u64,
    pub total_deferred: u64,
    pub total_bounced: u64,
    pub total_rate_limited: u64,
    pub total_circuit_trips: u64,
    pub circuit_open_until: i64,
    pub no_send_until: i64,
    pub last_update: i64,
    pub last_error: String,
}

impl From<&ProviderState> for PersistedProviderState {
    fn from(state: &ProviderState) -> Self {
        Self {
            delay_ms: state.delay_ms,
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
            consecutive_rate_limit_failures: state.consecutive_rate_limit_failures,
            total_delivered: state.total_delivered,
            total_deferred: state.total_deferred,
            total_bounced: state.total_bounced,
            total_rate_limited: state.total_rate_limited,
            total_circuit_trips: state.total_circuit_trips,
            circuit_open_until: state.circuit_open_until,
            no_send_until: state.no_send_until,
            last_update: state.last_update,
            last_error: state.last_error.clone(),
        }
    }
}

impl PersistedProviderState {
    /// Restore to a live [`ProviderState`], clearing `circuit_open_until`
    /// and `no_send_until` if they had already expired by `now_ms` —
    /// a restart should never resurrect a circuit or pause that lapsed
    /// while the process was down.
    fn into_provider_state(self, now_ms: i64) -> ProviderState {
        ProviderState {
            delay_ms: self.delay_ms,
            consecutive_successes: self.consecutive_successes,
            consecutive_failures: self.consecutive_failures,
            consecutive_rate_limit_failures: self.consecutive_rate_limit_failures,
            total_delivered: self.total_delivered,
            total_deferred: self.total_deferred,
            total_bounced: self.total_bounced,
            total_rate_limited: self.total_rate_limited,
            total_circuit_trips: self.total_circuit_trips,
            next_send_time: 0,
            pace_delay: 0,
            circuit_open_until: if self.circuit_open_until > now_ms {
                self.circuit_open_until
            } else {
                0
            },
            no_send_until: if self.no_send_until > now_ms {
                self.no_send_until
            } else {
                0
            },
            last_update: self.last_update,
            last_error: self.last_error,
        }
    }

    /// Whether this provider's state is interesting enough to persist —
    /// a provider sitting at its defaults adds nothing to a snapshot.
    fn is_worth_persisting(&self, initial_delay_ms: i64, now_ms: i64) -> bool {
        self.delay_ms > initial_delay_ms
            || self.consecutive_rate_limit_failures > 0
            || self.circuit_open_until > now_ms
            || self.no_send_until > now_ms
    }
}

/// On-disk snapshot format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: i64,
    pub domains: HashMap<ProviderKey, PersistedProviderState>,
}

impl Snapshot {
    /// Build a snapshot from the current state store, keeping only
    /// providers whose state differs meaningfully from a fresh default.
    #[must_use]
    pub fn build(store: &ProviderStateStore, initial_delay_ms: i64, now_ms: i64) -> Self {
        let mut domains = HashMap::new();
        for key in store.keys() {
            let state = store.get_or_create(&key, initial_delay_ms);
            let persisted = PersistedProviderState::from(&*state.lock());
            if persisted.is_worth_persisting(initial_delay_ms, now_ms) {
                domains.insert(key, persisted);
            }
        }
        Self {
            version: SCHEMA_VERSION,
            saved_at: now_ms,
            domains,
        }
    }

    /// Write this snapshot to `path` atomically: serialize, write to a
    /// sibling `.tmp` file, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load a snapshot from `path`, rejecting a schema mismatch or a
    /// snapshot older than `max_age_ms` outright.
    pub fn load(path: &Path, max_age_ms: i64, now_ms: i64) -> Result<Self, SnapshotError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound)
            }
            Err(err) => return Err(SnapshotError::Io(err)),
        };

        let snapshot: Self = serde_json::from_str(&contents)?;

        if snapshot.version != SCHEMA_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: snapshot.version,
                expected: SCHEMA_VERSION,
            });
        }

        let age_ms = now_ms - snapshot.saved_at;
        if age_ms > max_age_ms {
            return Err(SnapshotError::Stale { age_ms, max_age_ms });
        }

        Ok(snapshot)
    }

    /// Restore every entry in this snapshot into `store`, clearing any
    /// circuit or soft pause that already expired by `now_ms`.
    pub fn restore_into(self, store: &ProviderStateStore, now_ms: i64) {
        for (key, persisted) in self.domains {
            store.restore(key, persisted.into_provider_state(now_ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips_interesting_providers() {
        let store = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        store.get_or_create(&pk, 5_000).lock().delay_ms = 40_000;

        let snapshot = Snapshot::build(&store, 5_000, 1_000);
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        snapshot.save(&path).unwrap();

        let loaded = Snapshot::load(&path, 3_600_000, 2_000).unwrap();
        assert_eq!(loaded.domains[&pk].delay_ms, 40_000);
    }

    #[test]
    fn build_excludes_providers_at_defaults() {
        let store = ProviderStateStore::new();
        let pk = ProviderKey::new("fresh.com");
        store.get_or_create(&pk, 5_000);

        let snapshot = Snapshot::build(&store, 5_000, 1_000);

        assert!(snapshot.domains.is_empty());
    }

    #[test]
    fn load_missing_file_returns_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let err = Snapshot::load(&path, 3_600_000, 0).unwrap_err();
        assert!(matches!(err, SnapshotError::NotFound));
    }

    #[test]
    fn load_rejects_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let bad = serde_json::json!({ "version": 99, "saved_at": 0, "domains": {} });
        std::fs::write(&path, bad.to_string()).unwrap();

        let err = Snapshot::load(&path, 3_600_000, 0).unwrap_err();
        assert!(matches!(err, SnapshotError::VersionMismatch { found: 99, expected: 1 }));
    }

    #[test]
    fn load_rejects_stale_snapshot() {
        let store = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        store.get_or_create(&pk, 5_000).lock().delay_ms = 40_000;
        let snapshot = Snapshot::build(&store, 5_000, 0);

        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        snapshot.save(&path).unwrap();

        let err = Snapshot::load(&path, 1_000, 10_000_000).unwrap_err();
        assert!(matches!(err, SnapshotError::Stale { .. }));
    }

    #[test]
    fn restore_into_seeds_provider_state_store() {
        let source = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        source.get_or_create(&pk, 5_000).lock().delay_ms = 40_000;
        let snapshot = Snapshot::build(&source, 5_000, 0);

        let target = ProviderStateStore::new();
        snapshot.restore_into(&target, 0);

        assert_eq!(target.get_or_create(&pk, 5_000).lock().delay_ms, 40_000);
    }

    #[test]
    fn restore_into_clears_expired_circuit_and_pause() {
        let source = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        {
            let handle = source.get_or_create(&pk, 5_000);
            let mut state = handle.lock();
            state.delay_ms = 40_000;
            state.circuit_open_until = 1_000;
            state.no_send_until = 1_000;
        }
        let snapshot = Snapshot::build(&source, 5_000, 0);

        let target = ProviderStateStore::new();
        snapshot.restore_into(&target, 5_000);

        let restored = target.get_or_create(&pk, 5_000);
        let restored = restored.lock();
        assert_eq!(restored.circuit_open_until, 0);
        assert_eq!(restored.no_send_until, 0);
    }
}
