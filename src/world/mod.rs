//! The shared world: rooms, their exit graph, the registry that indexes
//! them, the map projection and the JSON store behind it all.

pub mod errors;
pub mod map;
pub mod registry;
pub mod room;
pub mod storage;
pub mod types;

pub use errors::{StoreError, WorldError};
pub use map::render_map;
pub use registry::{World, WorldSettings};
pub use room::{Room, RoomField};
pub use storage::{WorldStore, WorldStoreBuilder};
pub use types::{Direction, Exit, PlayerFlag, PlayerRecord, PlayerStats, RoomData};
