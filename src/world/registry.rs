//! The world registry: room indices, the live-session index and the
//! structural lock.
//!
//! Each index has its own `RwLock`, so coordinate lookups never queue
//! behind session churn. Registration is last-write-wins: adding a room at an
//! occupied coordinate or id silently replaces the previous entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{RwLock as AsyncRwLock, RwLockReadGuard as AsyncReadGuard, RwLockWriteGuard as AsyncWriteGuard};

use super::errors::WorldError;
use super::room::Room;
use super::storage::WorldStore;
use super::types::RoomData;
use crate::mud::session::Session;

pub const BOOTSTRAP_ROOM_NAME: &str = "The Alpha";
pub const BOOTSTRAP_ROOM_DESCRIPTION: &str = "It all starts here.";

/// Tunables the world hands to sessions.
#[derive(Debug, Clone)]
pub struct WorldSettings {
    pub automap_radius: usize,
    pub max_map_radius: usize,
    /// Bounded wait for a session's own lock; `None` waits forever.
    pub lock_wait: Option<Duration>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            automap_radius: 5,
            max_map_radius: 100,
            lock_wait: None,
        }
    }
}

type Coordinates = (i64, i64, i64);

pub struct World {
    store: WorldStore,
    settings: WorldSettings,
    rooms_by_coords: RwLock<HashMap<Coordinates, Arc<Room>>>,
    rooms_by_id: RwLock<HashMap<String, Arc<Room>>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    room_counter: AtomicU64,
    structure: AsyncRwLock<()>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("store", &self.store)
            .field("room_counter", &self.room_count())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

impl World {
    pub fn new(store: WorldStore, settings: WorldSettings) -> Self {
        Self {
            store,
            settings,
            rooms_by_coords: RwLock::new(HashMap::new()),
            rooms_by_id: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            room_counter: AtomicU64::new(0),
            structure: AsyncRwLock::new(()),
        }
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Load every stored room, re-save it to apply migrations, and register it.
    /// An empty store is seeded with the bootstrap room at the origin.
    pub fn load(&self) -> Result<usize, WorldError> {
        let rooms = self.store.load_rooms()?;
        if rooms.is_empty() {
            let alpha = RoomData::new(BOOTSTRAP_ROOM_NAME, BOOTSTRAP_ROOM_DESCRIPTION).with_walls();
            self.store.save_room(&alpha)?;
            self.add_room(Room::new(alpha));
            info!("seeded empty world with {}", BOOTSTRAP_ROOM_NAME);
            return Ok(1);
        }
        let count = rooms.len();
        for data in rooms {
            self.store.save_room(&data)?;
            debug!("loaded room {} ({})", data.id, data.name);
            self.add_room(Room::new(data));
        }
        info!("loaded {} rooms", count);
        Ok(count)
    }

    pub fn add_room(&self, room: Arc<Room>) {
        let coords = room.coordinates();
        if let Some(prev) = write(&self.rooms_by_coords).insert(coords, room.clone()) {
            if !Arc::ptr_eq(&prev, &room) {
                warn!("room {} replaced {} at {:?}", room.id(), prev.id(), coords);
            }
        }
        write(&self.rooms_by_id).insert(room.id().to_string(), room);
        self.room_counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop index entries that still point at `room`.
    pub fn remove_room(&self, room: &Arc<Room>) {
        {
            let mut by_coords = write(&self.rooms_by_coords);
            let coords = room.coordinates();
            if by_coords.get(&coords).is_some_and(|r| Arc::ptr_eq(r, room)) {
                by_coords.remove(&coords);
            }
        }
        let mut by_id = write(&self.rooms_by_id);
        if by_id.get(room.id()).is_some_and(|r| Arc::ptr_eq(r, room)) {
            by_id.remove(room.id());
        }
    }

    pub fn room_at(&self, x: i64, y: i64, z: i64) -> Option<Arc<Room>> {
        read(&self.rooms_by_coords).get(&(x, y, z)).cloned()
    }

    pub fn room_by_id(&self, id: &str) -> Option<Arc<Room>> {
        read(&self.rooms_by_id).get(id).cloned()
    }

    /// True if the id index still maps to this exact room.
    pub fn is_registered(&self, room: &Arc<Room>) -> bool {
        read(&self.rooms_by_id)
            .get(room.id())
            .is_some_and(|r| Arc::ptr_eq(r, room))
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        read(&self.rooms_by_id).values().cloned().collect()
    }

    /// Number of insertions so far. Never decremented.
    pub fn room_count(&self) -> u64 {
        self.room_counter.load(Ordering::SeqCst)
    }

    /// Register a live session by case-insensitive name.
    ///
    /// If the name is already live the existing session is returned and
    /// nothing is registered.
    pub fn add_session(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let key = session.name().to_lowercase();
        let mut sessions = write(&self.sessions);
        if let Some(existing) = sessions.get(&key) {
            return Some(existing.clone());
        }
        sessions.insert(key, session);
        None
    }

    /// Remove `session` if it is the one registered under its name.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        let key = session.name().to_lowercase();
        let mut sessions = write(&self.sessions);
        if sessions.get(&key).is_some_and(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(&key);
            return true;
        }
        false
    }

    pub fn session(&self, name: &str) -> Option<Arc<Session>> {
        read(&self.sessions).get(&name.to_lowercase()).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        read(&self.sessions).values().cloned().collect()
    }

    /// Shared side of the structural lock, for membership moves.
    pub async fn structure_read(&self) -> AsyncReadGuard<'_, ()> {
        self.structure.read().await
    }

    /// Exclusive side of the structural lock, for dig and delete.
    pub async fn structure_write(&self) -> AsyncWriteGuard<'_, ()> {
        self.structure.write().await
    }
}
