//! Live online-set per workspace.
//!
//! A user is online while at least one of their connections is live. Each
//! connection is tracked separately with its last heartbeat; the sweeper drops
//! connections whose heartbeat is older than the timeout, so a client that
//! vanishes without closing its socket still goes offline.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use collab_shared::{PresenceEvent, PresenceState};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;

struct Room {
    /// user -> connection -> last heartbeat
    users: HashMap<Uuid, HashMap<Uuid, DateTime<Utc>>>,
    events: broadcast::Sender<PresenceEvent>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        Self {
            users: HashMap::new(),
            events: broadcast::channel(capacity).0,
        }
    }

    fn online(&self) -> Vec<Uuid> {
        let sorted: BTreeSet<Uuid> = self.users.keys().copied().collect();
        sorted.into_iter().collect()
    }

    fn is_idle(&self) -> bool {
        self.users.is_empty() && self.events.receiver_count() == 0
    }
}

pub struct PresenceSubscription {
    workspace_id: Uuid,
    pending: Option<PresenceEvent>,
    rx: broadcast::Receiver<PresenceEvent>,
    tracker: Arc<PresenceTracker>,
}

impl PresenceSubscription {
    /// The `Sync` snapshot first, then incremental `Join`/`Leave` events.
    ///
    /// If the subscriber falls behind it is handed a fresh `Sync` instead of
    /// the events it missed.
    pub async fn next(&mut self) -> Option<PresenceEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }

        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!(workspace_id = %self.workspace_id, missed, "presence resync");
                Some(PresenceEvent::Sync {
                    workspace_id: self.workspace_id,
                    online: self.tracker.online_users(self.workspace_id),
                })
            }
            Err(RecvError::Closed) => None,
        }
    }
}

pub struct PresenceTracker {
    clock: Arc<dyn Clock>,
    timeout: Duration,
    capacity: usize,
    rooms: Mutex<HashMap<Uuid, Room>>,
}

impl PresenceTracker {
    pub fn new(clock: Arc<dyn Clock>, timeout: StdDuration, capacity: usize) -> Self {
        Self {
            clock,
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(30)),
            capacity: capacity.max(1),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Room>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a live connection. Emits `Join` when the user was offline.
    pub fn track(&self, workspace_id: Uuid, user_id: Uuid, connection_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut rooms = self.rooms();
        let room = rooms
            .entry(workspace_id)
            .or_insert_with(|| Room::new(self.capacity));

        let connections = room.users.entry(user_id).or_default();
        let joined = connections.is_empty();
        connections.insert(connection_id, now);

        if joined {
            let _ = room.events.send(PresenceEvent::Join {
                workspace_id,
                user_id,
            });
            tracing::debug!(%workspace_id, %user_id, %connection_id, "user online");
        }
        joined
    }

    /// Refresh a connection. Returns false for connections the tracker does not
    /// know (never tracked, or already expired); the client should `track` again.
    pub fn heartbeat(&self, workspace_id: Uuid, user_id: Uuid, connection_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut rooms = self.rooms();

        match rooms
            .get_mut(&workspace_id)
            .and_then(|room| room.users.get_mut(&user_id))
            .and_then(|connections| connections.get_mut(&connection_id))
        {
            Some(last_seen) => {
                *last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Drop one connection. Emits `Leave` when it was the user's last.
    pub fn disconnect(&self, workspace_id: Uuid, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get_mut(&workspace_id) else {
            return false;
        };

        let went_offline = match room.users.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                connections.is_empty()
            }
            None => false,
        };

        if went_offline {
            room.users.remove(&user_id);
            let _ = room.events.send(PresenceEvent::Leave {
                workspace_id,
                user_id,
            });
            tracing::debug!(%workspace_id, %user_id, "user offline");
        }

        if room.is_idle() {
            rooms.remove(&workspace_id);
        }
        went_offline
    }

    /// Drop every connection of the user in this workspace.
    pub fn leave(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get_mut(&workspace_id) else {
            return false;
        };

        let was_online = room.users.remove(&user_id).is_some();
        if was_online {
            let _ = room.events.send(PresenceEvent::Leave {
                workspace_id,
                user_id,
            });
            tracing::debug!(%workspace_id, %user_id, "user left");
        }

        if room.is_idle() {
            rooms.remove(&workspace_id);
        }
        was_online
    }

    pub fn subscribe(self: &Arc<Self>, workspace_id: Uuid) -> PresenceSubscription {
        let mut rooms = self.rooms();
        let room = rooms
            .entry(workspace_id)
            .or_insert_with(|| Room::new(self.capacity));

        // Snapshot and receiver are taken under the same lock so no event
        // falls between them.
        PresenceSubscription {
            workspace_id,
            pending: Some(PresenceEvent::Sync {
                workspace_id,
                online: room.online(),
            }),
            rx: room.events.subscribe(),
            tracker: Arc::clone(self),
        }
    }

    pub fn online_users(&self, workspace_id: Uuid) -> Vec<Uuid> {
        self.rooms()
            .get(&workspace_id)
            .map(Room::online)
            .unwrap_or_default()
    }

    pub fn is_online(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        self.state(workspace_id, user_id) == PresenceState::Online
    }

    pub fn state(&self, workspace_id: Uuid, user_id: Uuid) -> PresenceState {
        let online = self
            .rooms()
            .get(&workspace_id)
            .is_some_and(|room| room.users.contains_key(&user_id));

        if online {
            PresenceState::Online
        } else {
            PresenceState::Offline
        }
    }

    /// Expire connections whose last heartbeat is older than the timeout.
    /// Returns the number of connections removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.timeout;
        let mut expired = 0;
        let mut rooms = self.rooms();

        for (workspace_id, room) in rooms.iter_mut() {
            let mut gone = Vec::new();
            for (user_id, connections) in room.users.iter_mut() {
                let before = connections.len();
                connections.retain(|_, last_seen| *last_seen > cutoff);
                expired += before - connections.len();
                if connections.is_empty() {
                    gone.push(*user_id);
                }
            }

            for user_id in gone {
                room.users.remove(&user_id);
                let _ = room.events.send(PresenceEvent::Leave {
                    workspace_id: *workspace_id,
                    user_id,
                });
                tracing::debug!(%workspace_id, %user_id, "presence timed out");
            }
        }

        rooms.retain(|_, room| !room.is_idle());
        expired
    }

    /// Run `sweep` on a fixed interval until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = self.sweep(self.clock.now());
                if expired > 0 {
                    tracing::info!(expired, "stale presence connections swept");
                }
            }
        })
    }
}
