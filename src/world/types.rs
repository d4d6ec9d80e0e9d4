use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const PLAYER_SCHEMA_VERSION: u8 = 1;
pub const ROOM_SCHEMA_VERSION: u8 = 1;

pub const DEFAULT_PROMPT: &str = "<%h{gh{x %m{bm{x %v{yv{x>";

/// The six directional exits, in index order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// Directions projected onto the 2-D map.
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn inverse(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Unit vector (dx, dy, dz). North is +y, up is +z.
    pub fn offset(self) -> (i64, i64, i64) {
        match self {
            Direction::North => (0, 1, 0),
            Direction::South => (0, -1, 0),
            Direction::East => (1, 0, 0),
            Direction::West => (-1, 0, 0),
            Direction::Up => (0, 0, 1),
            Direction::Down => (0, 0, -1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Accepts the full name or its single-letter alias.
    pub fn parse(word: &str) -> Option<Direction> {
        match word.to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "south" | "s" => Some(Direction::South),
            "east" | "e" => Some(Direction::East),
            "west" | "w" => Some(Direction::West),
            "up" | "u" => Some(Direction::Up),
            "down" | "d" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A directional or named link out of a room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub door: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub wall: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Exit {
    pub fn walled() -> Self {
        Self {
            wall: true,
            ..Self::default()
        }
    }

    pub fn to(target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            ..Self::default()
        }
    }

    /// Reset to the unlinked wall state.
    pub fn unlink(&mut self) {
        *self = Self::walled();
    }

    pub fn targets(&self, id: &str) -> bool {
        self.target.as_deref() == Some(id)
    }

    /// Passable ignoring whether the target still exists.
    pub fn is_open(&self) -> bool {
        !self.wall && !self.closed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomData {
    pub id: String,
    pub name: String,
    pub description: String,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    #[serde(default)]
    pub direction_exits: [Exit; 6],
    #[serde(default)]
    pub other_exits: BTreeMap<String, Exit>,
    pub schema_version: u8,
}

impl RoomData {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            x: 0,
            y: 0,
            z: 0,
            direction_exits: Default::default(),
            other_exits: BTreeMap::new(),
            schema_version: ROOM_SCHEMA_VERSION,
        }
    }

    pub fn with_coordinates(mut self, x: i64, y: i64, z: i64) -> Self {
        self.x = x;
        self.y = y;
        self.z = z;
        self
    }

    pub fn with_exit(mut self, direction: Direction, exit: Exit) -> Self {
        self.direction_exits[direction.index()] = exit;
        self
    }

    pub fn with_walls(mut self) -> Self {
        for exit in self.direction_exits.iter_mut() {
            *exit = Exit::walled();
        }
        self
    }

    pub fn exit(&self, direction: Direction) -> &Exit {
        &self.direction_exits[direction.index()]
    }

    pub fn exit_mut(&mut self, direction: Direction) -> &mut Exit {
        &mut self.direction_exits[direction.index()]
    }

    pub fn coordinates(&self) -> (i64, i64, i64) {
        (self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PlayerFlag {
    Color,
    Prompt,
    Automap,
    Autobuild,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStats {
    pub health: i64,
    pub mana: i64,
    pub movement: i64,
    pub max_health: i64,
    pub max_mana: i64,
    pub max_movement: i64,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            health: 100,
            mana: 100,
            movement: 100,
            max_health: 100,
            max_mana: 100,
            max_movement: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default)]
    pub flags: BTreeSet<PlayerFlag>,
    pub prompt: String,
    #[serde(default)]
    pub stats: PlayerStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PlayerRecord {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        let mut flags = BTreeSet::new();
        flags.insert(PlayerFlag::Color);
        flags.insert(PlayerFlag::Prompt);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            password_hash: String::new(),
            room: None,
            flags,
            prompt: DEFAULT_PROMPT.to_string(),
            stats: PlayerStats::default(),
            created_at: now,
            updated_at: now,
            schema_version: PLAYER_SCHEMA_VERSION,
        }
    }

    pub fn with_flag(mut self, flag: PlayerFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn flag(&self, flag: PlayerFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn set_flag(&mut self, flag: PlayerFlag, on: bool) {
        if on {
            self.flags.insert(flag);
        } else {
            self.flags.remove(&flag);
        }
    }

    /// Flip `flag` and return its new value.
    pub fn toggle_flag(&mut self, flag: PlayerFlag) -> bool {
        let on = !self.flag(flag);
        self.set_flag(flag, on);
        on
    }

    /// The prompt template with stat escapes substituted.
    pub fn render_prompt(&self) -> String {
        let s = &self.stats;
        self.prompt
            .replace("%h", &s.health.to_string())
            .replace("%m", &s.mana.to_string())
            .replace("%v", &s.movement.to_string())
            .replace("%H", &s.max_health.to_string())
            .replace("%M", &s.max_mana.to_string())
            .replace("%V", &s.max_movement.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_and_offset_cancel() {
        for dir in Direction::ALL {
            assert_eq!(dir.inverse().inverse(), dir);
            let (x, y, z) = dir.offset();
            let (ix, iy, iz) = dir.inverse().offset();
            assert_eq!((x + ix, y + iy, z + iz), (0, 0, 0));
            assert_eq!(Direction::ALL[dir.index()], dir);
        }
    }

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(Direction::parse("n"), Some(Direction::North));
        assert_eq!(Direction::parse("Down"), Some(Direction::Down));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn new_player_defaults() {
        let p = PlayerRecord::new("Alice");
        assert!(p.flag(PlayerFlag::Color));
        assert!(p.flag(PlayerFlag::Prompt));
        assert!(!p.flag(PlayerFlag::Automap));
        assert_eq!(p.render_prompt(), "<100{gh{x 100{bm{x 100{yv{x>");
    }

    #[test]
    fn prompt_escapes_cover_maxima() {
        let mut p = PlayerRecord::new("Bob");
        p.stats.health = 42;
        p.stats.max_movement = 7;
        p.prompt = "%h/%H %V".into();
        assert_eq!(p.render_prompt(), "42/100 7");
    }

    #[test]
    fn toggle_flag_reports_new_state() {
        let mut p = PlayerRecord::new("Carol");
        assert!(p.toggle_flag(PlayerFlag::Automap));
        assert!(!p.toggle_flag(PlayerFlag::Automap));
    }

    #[test]
    fn room_json_omits_unlinked_targets() {
        let data = RoomData::new("Hall", "A hall.").with_walls();
        let json = serde_json::to_string(&data).unwrap();
        assert!(!json.contains("target"));
        let back: RoomData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
