//! Live room entities and the structural operations on the exit graph.
//!
//! A [`Room`] pairs its persisted [`RoomData`] with an [`IdentityLock`] and the
//! set of sessions currently standing in it. The data itself sits behind a
//! short std mutex for memory safety; the identity lock is what linearizes
//! logical operations on the room.
//!
//! Structural changes ([`Room::dig`], [`Room::delete`]) additionally take the
//! world's structural lock exclusively; text and exit writes take it shared
//! so they never land on a deleted room. Lock order is always
//! structural -> session location -> room.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use super::errors::WorldError;
use super::registry::World;
use super::types::{Direction, Exit, RoomData};
use crate::lock::{IdentityLock, LockToken};
use crate::mud::session::Session;

pub const NEW_ROOM_NAME: &str = "New Room";
pub const NEW_ROOM_DESCRIPTION: &str = "This is a new room, with a new description.";

/// Which text field of a room an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomField {
    Name,
    Description,
}

impl RoomField {
    pub fn parse(word: &str) -> Option<RoomField> {
        match word {
            "name" => Some(RoomField::Name),
            "description" | "desc" => Some(RoomField::Description),
            _ => None,
        }
    }
}

pub struct Room {
    id: String,
    lock: IdentityLock,
    data: Mutex<RoomData>,
    players: Mutex<BTreeMap<String, Arc<Session>>>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("index", &self.index())
            .finish()
    }
}

impl Room {
    pub fn new(data: RoomData) -> Arc<Room> {
        Arc::new(Room {
            id: data.id.clone(),
            lock: IdentityLock::new(),
            data: Mutex::new(data),
            players: Mutex::new(BTreeMap::new()),
        })
    }

    fn data_guard(&self) -> MutexGuard<'_, RoomData> {
        self.data.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn players_guard(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Session>>> {
        self.players.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lock(&self) -> &IdentityLock {
        &self.lock
    }

    /// Snapshot of the persisted record.
    pub fn data(&self) -> RoomData {
        self.data_guard().clone()
    }

    pub fn name(&self) -> String {
        self.data_guard().name.clone()
    }

    pub fn description(&self) -> String {
        self.data_guard().description.clone()
    }

    pub fn coordinates(&self) -> (i64, i64, i64) {
        self.data_guard().coordinates()
    }

    /// Coordinate key, `"x,y,z"`.
    pub fn index(&self) -> String {
        let (x, y, z) = self.coordinates();
        format!("{},{},{}", x, y, z)
    }

    pub fn exit(&self, dir: Direction) -> Exit {
        self.data_guard().exit(dir).clone()
    }

    pub fn named_exit(&self, name: &str) -> Option<Exit> {
        self.data_guard().other_exits.get(name).cloned()
    }

    /// Target of the exit in `dir` if it resolves in the registry, regardless of walls or doors.
    pub fn linked_room(&self, world: &World, dir: Direction) -> Option<Arc<Room>> {
        let target = self.exit(dir).target?;
        world.room_by_id(&target)
    }

    /// Room at the adjacent coordinate, whether or not an exit connects to it.
    pub fn physical_room(&self, world: &World, dir: Direction) -> Option<Arc<Room>> {
        let (x, y, z) = self.coordinates();
        let (dx, dy, dz) = dir.offset();
        world.room_at(x + dx, y + dy, z + dz)
    }

    /// Traversable iff not walled, not closed, and the target is registered.
    pub fn can_traverse(&self, world: &World, dir: Direction) -> bool {
        let exit = self.exit(dir);
        exit.is_open()
            && exit
                .target
                .as_deref()
                .is_some_and(|id| world.room_by_id(id).is_some())
    }

    pub fn set_coordinates(&self, x: i64, y: i64, z: i64) {
        let mut data = self.data_guard();
        data.x = x;
        data.y = y;
        data.z = z;
    }

    /// Apply `edit` to a staged copy of the record and persist it.
    ///
    /// Holds the structural lock shared, so a concurrent `delete` either runs
    /// first (and this returns `RoomGone`) or waits until the write is done.
    /// Memory only changes once the save succeeds.
    async fn update<F>(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
        edit: F,
    ) -> Result<(), WorldError>
    where
        F: FnOnce(&mut RoomData),
    {
        let _structure = world.structure_read().await;
        let _guard = self.lock.acquire(token).await;
        if !world.is_registered(self) {
            return Err(WorldError::RoomGone(self.id.clone()));
        }
        let mut staged = self.data();
        edit(&mut staged);
        world.store().save_room(&staged)?;
        *self.data_guard() = staged;
        Ok(())
    }

    pub async fn set_text(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
        field: RoomField,
        text: &str,
    ) -> Result<(), WorldError> {
        self.update(world, token, |data| match field {
            RoomField::Name => data.name = text.to_string(),
            RoomField::Description => data.description = text.to_string(),
        })
        .await
    }

    /// Rewrite the exit in `dir` in place, e.g. to open or close a door.
    pub async fn update_exit<F>(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
        dir: Direction,
        edit: F,
    ) -> Result<(), WorldError>
    where
        F: FnOnce(&mut Exit),
    {
        self.update(world, token, |data| edit(data.exit_mut(dir))).await
    }

    pub async fn set_name(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
        name: &str,
    ) -> Result<(), WorldError> {
        self.set_text(world, token, RoomField::Name, name).await
    }

    pub async fn set_description(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
        description: &str,
    ) -> Result<(), WorldError> {
        self.set_text(world, token, RoomField::Description, description)
            .await
    }

    /// Persist the current record. Refused once the room has been deleted.
    pub async fn save(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
    ) -> Result<(), WorldError> {
        self.update(world, token, |_| {}).await
    }

    pub async fn add_player(&self, token: &LockToken, session: Arc<Session>) {
        let _guard = self.lock.acquire(token).await;
        self.players_guard().insert(session.id().to_string(), session);
    }

    pub async fn remove_player(&self, token: &LockToken, session_id: &str) -> bool {
        let _guard = self.lock.acquire(token).await;
        self.players_guard().remove(session_id).is_some()
    }

    pub async fn has_player(&self, token: &LockToken, session_id: &str) -> bool {
        let _guard = self.lock.acquire(token).await;
        self.players_guard().contains_key(session_id)
    }

    /// Copy of the current occupants, taken under the room lock.
    pub async fn occupants(&self, token: &LockToken) -> Vec<Arc<Session>> {
        let _guard = self.lock.acquire(token).await;
        self.players_guard().values().cloned().collect()
    }

    /// Visit every occupant. Works on a copy taken under the room lock, which
    /// is released before the first callback runs, so callbacks may enter or
    /// leave this room themselves.
    pub async fn for_each_player<F, Fut>(&self, token: &LockToken, mut f: F)
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = ()>,
    {
        for session in self.occupants(token).await {
            f(session).await;
        }
    }

    /// Create a room in `dir` and link the pair both ways.
    ///
    /// Nothing becomes visible until both room files are written: on a storage
    /// failure the current room is unchanged and the new room is never registered.
    pub async fn dig(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
        dir: Direction,
    ) -> Result<Arc<Room>, WorldError> {
        let _structure = world.structure_write().await;
        let _guard = self.lock.acquire(token).await;

        if !world.is_registered(self) {
            return Err(WorldError::RoomGone(self.id.clone()));
        }
        if self.physical_room(world, dir).is_some() {
            return Err(WorldError::RoomExists(dir));
        }

        let (x, y, z) = self.coordinates();
        let (dx, dy, dz) = dir.offset();
        let new_data = RoomData::new(NEW_ROOM_NAME, NEW_ROOM_DESCRIPTION)
            .with_coordinates(x + dx, y + dy, z + dz)
            .with_walls()
            .with_exit(dir.inverse(), Exit::to(&self.id));

        let mut staged = self.data();
        let exit = staged.exit_mut(dir);
        exit.wall = false;
        exit.target = Some(new_data.id.clone());

        world.store().save_room(&new_data)?;
        if let Err(e) = world.store().save_room(&staged) {
            if let Err(cleanup) = world.store().remove_room(&new_data.id) {
                warn!("could not remove half-dug room {}: {}", new_data.id, cleanup);
            }
            return Err(e.into());
        }

        *self.data_guard() = staged;
        let room = Room::new(new_data);
        world.add_room(room.clone());
        info!(
            "dug room {} at {} {} of {}",
            room.id,
            room.index(),
            dir,
            self.id
        );
        Ok(room)
    }

    /// Reset every exit of this room that points at `id`. Returns true if anything changed.
    async fn unlink_exits_to(&self, world: &World, token: &LockToken, id: &str) -> bool {
        let _guard = self.lock.acquire(token).await;
        let snapshot = {
            let mut guard = self.data_guard();
            let data = &mut *guard;
            let mut changed = false;
            for exit in data
                .direction_exits
                .iter_mut()
                .chain(data.other_exits.values_mut())
            {
                if exit.targets(id) {
                    exit.unlink();
                    changed = true;
                }
            }
            if !changed {
                return false;
            }
            data.clone()
        };
        if let Err(e) = world.store().save_room(&snapshot) {
            warn!("failed to persist unlinked neighbour {}: {}", self.id, e);
        }
        true
    }

    /// Remove this room from the world.
    ///
    /// Every linked or physically adjacent neighbour loses its exits into this
    /// room, occupants move to the linked neighbour with the lowest direction
    /// index (or stay put if there is none), and the room leaves both registry
    /// indices and the store. Returns the room occupants were moved to.
    pub async fn delete(
        self: &Arc<Self>,
        world: &World,
        token: &LockToken,
    ) -> Result<Option<Arc<Room>>, WorldError> {
        let _structure = world.structure_write().await;
        if !world.is_registered(self) {
            return Err(WorldError::RoomGone(self.id.clone()));
        }

        let (evacuate_to, occupants) = {
            let _guard = self.lock.acquire(token).await;
            let data = self.data();

            let mut evacuate_to: Option<Arc<Room>> = None;
            let mut neighbours: Vec<Arc<Room>> = Vec::new();
            for dir in Direction::ALL {
                let linked = data
                    .exit(dir)
                    .target
                    .as_deref()
                    .and_then(|id| world.room_by_id(id))
                    .filter(|r| !Arc::ptr_eq(r, self));
                if evacuate_to.is_none() {
                    evacuate_to = linked.clone();
                }
                for candidate in [linked, self.physical_room(world, dir)].into_iter().flatten() {
                    if !Arc::ptr_eq(&candidate, self)
                        && !neighbours.iter().any(|n| Arc::ptr_eq(n, &candidate))
                    {
                        neighbours.push(candidate);
                    }
                }
            }

            for neighbour in &neighbours {
                if neighbour.unlink_exits_to(world, token, &self.id).await {
                    debug!("unlinked {} from deleted room {}", neighbour.id, self.id);
                }
            }

            {
                let mut data = self.data_guard();
                for exit in data.direction_exits.iter_mut() {
                    exit.unlink();
                }
                data.other_exits.clear();
            }
            let occupants: Vec<Arc<Session>> = self.players_guard().values().cloned().collect();

            world.remove_room(self);
            if let Err(e) = world.store().remove_room(&self.id) {
                warn!("failed to remove room file {}: {}", self.id, e);
            }
            (evacuate_to, occupants)
        };

        if let Some(target) = &evacuate_to {
            for session in occupants {
                session.relocate_from(self, target.clone()).await;
            }
        }
        info!("deleted room {}", self.id);
        Ok(evacuate_to)
    }
}
