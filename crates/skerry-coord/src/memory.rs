//! Single-process implementation of the coordination backend.
//!
//! Faithful to the semantics a quorum KV service provides — global
//! revision counter, CAS preconditions, lease-scoped keys, prefix
//! watches — without the replication. Tests and single-node deployments
//! use it directly; production points the same trait at an external
//! service.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{CoordBackend, KvRecord, LeaseId, WatchEvent};
use crate::error::CoordError;

/// How often the sweeper checks for expired leases.
const SWEEP_INTERVAL: Duration = Duration::from_millis(25);

/// Watch channel capacity; a watcher that lags this far is dropped.
const WATCH_CAPACITY: usize = 256;

struct LeaseState {
    expires_at: Instant,
    ttl: Duration,
    keys: HashSet<String>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

struct State {
    map: BTreeMap<String, KvRecord>,
    rev: u64,
    leases: HashMap<LeaseId, LeaseState>,
    next_lease: LeaseId,
    watchers: Vec<Watcher>,
}

/// In-memory [`CoordBackend`].
///
/// A background sweeper expires leases and deletes their keys, emitting
/// `Deleted` watch events, so lease loss is observable without traffic.
pub struct MemoryCoord {
    state: Mutex<State>,
}

impl MemoryCoord {
    /// Create a backend and start its lease sweeper.
    pub fn new() -> Arc<Self> {
        let coord = Arc::new(Self {
            state: Mutex::new(State {
                map: BTreeMap::new(),
                rev: 0,
                leases: HashMap::new(),
                next_lease: 1,
                watchers: Vec::new(),
            }),
        });

        let weak: Weak<Self> = Arc::downgrade(&coord);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(coord) => coord.sweep(),
                    None => break,
                }
            }
        });

        coord
    }

    /// Expire due leases and delete their keys.
    fn sweep(&self) {
        let mut state = self.state.lock().expect("coord state poisoned");
        let now = Instant::now();
        let due: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for lease in due {
            debug!(lease, "lease expired");
            expire_lease(&mut state, lease);
        }
    }

    fn notify(state: &mut State, event: WatchEvent) {
        let key = match &event {
            WatchEvent::Created { key, .. }
            | WatchEvent::Modified { key, .. }
            | WatchEvent::Deleted { key } => key.clone(),
        };
        state.watchers.retain(|w| {
            if !key.starts_with(&w.prefix) {
                return true;
            }
            // A full or closed channel means the watcher is gone or
            // hopelessly behind; drop it so it re-lists on reconnect.
            w.tx.try_send(event.clone()).is_ok()
        });
    }
}

fn expire_lease(state: &mut State, lease: LeaseId) {
    let Some(lease_state) = state.leases.remove(&lease) else {
        return;
    };
    for key in lease_state.keys {
        if state.map.remove(&key).is_some() {
            MemoryCoord::notify(state, WatchEvent::Deleted { key });
        }
    }
}

#[async_trait::async_trait]
impl CoordBackend for MemoryCoord {
    async fn get(&self, key: &str) -> Result<Option<KvRecord>, CoordError> {
        let state = self.state.lock().expect("coord state poisoned");
        Ok(state.map.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, KvRecord)>, CoordError> {
        let state = self.state.lock().expect("coord state poisoned");
        Ok(state
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn insert(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<u64, CoordError> {
        let mut state = self.state.lock().expect("coord state poisoned");
        if state.map.contains_key(key) {
            return Err(CoordError::AlreadyExists);
        }
        if let Some(lease_id) = lease {
            let lease_state = state
                .leases
                .get_mut(&lease_id)
                .ok_or(CoordError::LeaseExpired)?;
            lease_state.keys.insert(key.to_string());
        }

        state.rev += 1;
        let rev = state.rev;
        let record = KvRecord {
            value,
            create_rev: rev,
            mod_rev: rev,
            lease,
        };
        state.map.insert(key.to_string(), record.clone());
        Self::notify(
            &mut state,
            WatchEvent::Created {
                key: key.to_string(),
                record,
            },
        );
        Ok(rev)
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_mod_rev: u64,
    ) -> Result<u64, CoordError> {
        let mut state = self.state.lock().expect("coord state poisoned");
        let current = state.map.get(key).ok_or(CoordError::NotFound)?;
        if current.mod_rev != expected_mod_rev {
            return Err(CoordError::CasFailed {
                expected: expected_mod_rev,
                actual: current.mod_rev,
            });
        }

        let create_rev = current.create_rev;
        let lease = current.lease;
        state.rev += 1;
        let rev = state.rev;
        let record = KvRecord {
            value,
            create_rev,
            mod_rev: rev,
            lease,
        };
        state.map.insert(key.to_string(), record.clone());
        Self::notify(
            &mut state,
            WatchEvent::Modified {
                key: key.to_string(),
                record,
            },
        );
        Ok(rev)
    }

    async fn remove(&self, key: &str, expected_mod_rev: u64) -> Result<(), CoordError> {
        let mut state = self.state.lock().expect("coord state poisoned");
        let current = state.map.get(key).ok_or(CoordError::NotFound)?;
        if current.mod_rev != expected_mod_rev {
            return Err(CoordError::CasFailed {
                expected: expected_mod_rev,
                actual: current.mod_rev,
            });
        }

        let lease = current.lease;
        state.map.remove(key);
        if let Some(lease_id) = lease {
            if let Some(lease_state) = state.leases.get_mut(&lease_id) {
                lease_state.keys.remove(key);
            }
        }
        state.rev += 1;
        Self::notify(
            &mut state,
            WatchEvent::Deleted {
                key: key.to_string(),
            },
        );
        Ok(())
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, CoordError> {
        let mut state = self.state.lock().expect("coord state poisoned");
        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(
            id,
            LeaseState {
                expires_at: Instant::now() + ttl,
                ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), CoordError> {
        let mut state = self.state.lock().expect("coord state poisoned");
        // A lease past its TTL is gone even if the sweeper hasn't run yet.
        if let Some(l) = state.leases.get(&lease) {
            if l.expires_at <= Instant::now() {
                expire_lease(&mut state, lease);
                return Err(CoordError::LeaseExpired);
            }
        }
        let lease_state = state.leases.get_mut(&lease).ok_or(CoordError::LeaseExpired)?;
        lease_state.expires_at = Instant::now() + lease_state.ttl;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), CoordError> {
        let mut state = self.state.lock().expect("coord state poisoned");
        expire_lease(&mut state, lease);
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, CoordError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut state = self.state.lock().expect("coord state poisoned");
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
