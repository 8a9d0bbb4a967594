//! Device registry
//!
//! The engine's view of attached devices, keyed by id. One mutex guards the
//! map so every reader sees a consistent snapshot, and entries are always
//! replaced whole.
//!
//! Each entry remembers the logical time at which its OS state was last
//! confirmed. Enumerations and mount operations finish in arbitrary order, so
//! writes carry the stamp of the OS observation they are based on and the
//! newest confirmation wins.

use records::{DeviceEvent, DeviceId, DeviceRecord};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Entry {
    record: DeviceRecord,
    confirmed_at: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: BTreeMap<DeviceId, Entry>,
    /// Stamp of the newest enumeration applied
    last_poll: u64,
}

/// Result of applying one enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Registry contents after the update, sorted by id
    pub snapshot: Vec<DeviceRecord>,
    /// Changes to publish
    pub events: Vec<DeviceEvent>,
    /// True if the enumeration was older than one already applied
    pub stale: bool,
}

/// Thread-safe device registry
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    clock: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next logical timestamp
    ///
    /// Stamps are strictly increasing across all callers.
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Insert or replace a record, confirmed now
    pub fn upsert(&self, record: DeviceRecord) {
        let confirmed_at = self.tick();
        self.state().entries.insert(
            record.id.clone(),
            Entry {
                record,
                confirmed_at,
            },
        );
    }

    pub fn remove(&self, id: &str) -> Option<DeviceRecord> {
        self.state().entries.remove(id).map(|e| e.record)
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.state().entries.get(id).map(|e| e.record.clone())
    }

    /// All records, sorted by id
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        snapshot_of(&self.state())
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Apply an enumeration taken at `observed_at`
    ///
    /// Entries not observed are removed and observed records are upserted,
    /// except for entries confirmed after the enumeration started: those keep
    /// their state and are never removed by it.
    pub fn reconcile(&self, observed: Vec<DeviceRecord>, observed_at: u64) -> Reconciliation {
        let mut guard = self.state();
        let state = &mut *guard;

        if observed_at < state.last_poll {
            debug!(
                "Discarding enumeration stamped {} (last applied {})",
                observed_at, state.last_poll
            );
            return Reconciliation {
                snapshot: snapshot_of(state),
                events: Vec::new(),
                stale: true,
            };
        }
        state.last_poll = observed_at;

        let mut events = Vec::new();
        let seen: HashSet<DeviceId> = observed.iter().map(|r| r.id.clone()).collect();

        let detached: Vec<DeviceId> = state
            .entries
            .iter()
            .filter(|(id, entry)| !seen.contains(*id) && entry.confirmed_at <= observed_at)
            .map(|(id, _)| id.clone())
            .collect();
        for id in detached {
            state.entries.remove(&id);
            info!("Device detached: {}", id);
            events.push(DeviceEvent::Detached { id });
        }

        for mut record in observed {
            match state.entries.get_mut(&record.id) {
                None => {
                    info!("Device attached: {}", record.id);
                    events.push(DeviceEvent::Attached {
                        device: record.clone(),
                    });
                    state.entries.insert(
                        record.id.clone(),
                        Entry {
                            record,
                            confirmed_at: observed_at,
                        },
                    );
                }
                Some(entry) => {
                    if entry.confirmed_at > observed_at {
                        // A mount operation finished after this enumeration
                        // read the OS, its mount state is newer
                        record.mount = entry.record.mount.clone();
                        record.other_mounts = entry.record.other_mounts.clone();
                        entry.record = record;
                        continue;
                    }

                    if let Some(event) = mount_change(&entry.record, &record) {
                        events.push(event);
                    }
                    entry.record = record;
                    entry.confirmed_at = observed_at;
                }
            }
        }

        Reconciliation {
            snapshot: snapshot_of(state),
            events,
            stale: false,
        }
    }

    /// Record the outcome of a mount operation confirmed at `confirmed_at`
    ///
    /// Returns the updated record and the change event, or `None` if the
    /// device is gone or a newer confirmation already exists.
    pub fn apply_mount_state(
        &self,
        id: &str,
        mount: Option<String>,
        confirmed_at: u64,
    ) -> Option<(DeviceRecord, Option<DeviceEvent>)> {
        let mut state = self.state();
        let entry = state.entries.get_mut(id)?;

        if entry.confirmed_at > confirmed_at {
            debug!(
                "Skipping mount update for {} stamped {} (entry confirmed at {})",
                id, confirmed_at, entry.confirmed_at
            );
            return None;
        }

        let updated = entry.record.with_mount(mount);
        let event = mount_change(&entry.record, &updated);
        entry.record = updated.clone();
        entry.confirmed_at = confirmed_at;
        Some((updated, event))
    }
}

fn snapshot_of(state: &RegistryState) -> Vec<DeviceRecord> {
    state.entries.values().map(|e| e.record.clone()).collect()
}

/// Event describing a mount point change between two versions of a record
fn mount_change(old: &DeviceRecord, new: &DeviceRecord) -> Option<DeviceEvent> {
    match (&old.mount, &new.mount) {
        (before, Some(after)) if before.as_ref() != Some(after) => {
            info!("Device {} mounted at {}", new.id, after);
            Some(DeviceEvent::Mounted {
                id: new.id.clone(),
                mount: after.clone(),
            })
        }
        (Some(before), None) => {
            info!("Device {} unmounted from {}", new.id, before);
            Some(DeviceEvent::Unmounted {
                id: new.id.clone(),
                previous: before.clone(),
            })
        }
        _ => None,
    }
}
