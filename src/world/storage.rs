//! JSON-file persistence for rooms and players.
//!
//! Layout under the data directory:
//!
//! ```text
//! rooms/<room id>.json
//! players/<uuid-v5 of the lowercased name>.json
//! ```
//!
//! Every write goes through [`write_file_locked`]: exclusive `fs2` lock on the
//! destination, temp file in the same directory, then an atomic rename.
//! Loads distinguish "not found" (`Ok(None)`) from real failures (`Err`).

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Utc;
use fs2::FileExt;
use log::{debug, warn};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use uuid::Uuid;

use super::errors::StoreError;
use super::types::{PlayerRecord, RoomData, PLAYER_SCHEMA_VERSION, ROOM_SCHEMA_VERSION};

const ROOMS_DIR: &str = "rooms";
const PLAYERS_DIR: &str = "players";

/// Helper builder so tests can create throwaway stores with cheap hashing.
pub struct WorldStoreBuilder {
    root: PathBuf,
    argon2_params: Option<Params>,
}

impl WorldStoreBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            argon2_params: None,
        }
    }

    pub fn with_argon2_params(mut self, params: Params) -> Self {
        self.argon2_params = Some(params);
        self
    }

    pub fn open(self) -> Result<WorldStore, StoreError> {
        let rooms_dir = self.root.join(ROOMS_DIR);
        let players_dir = self.root.join(PLAYERS_DIR);
        fs::create_dir_all(&rooms_dir)?;
        fs::create_dir_all(&players_dir)?;
        let argon2 = match self.argon2_params {
            Some(p) => Argon2::new(Algorithm::Argon2id, Version::V0x13, p),
            None => Argon2::default(),
        };
        debug!("opened world store at {}", self.root.display());
        Ok(WorldStore {
            root: self.root,
            rooms_dir,
            players_dir,
            argon2,
        })
    }
}

pub struct WorldStore {
    root: PathBuf,
    rooms_dir: PathBuf,
    players_dir: PathBuf,
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStore").field("root", &self.root).finish()
    }
}

impl WorldStore {
    /// Open (or create) a store rooted at `root` with default Argon2 parameters.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        WorldStoreBuilder::new(root.as_ref()).open()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic player key: UUID v5 over the lowercased name.
    pub fn player_key(name: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.to_lowercase().as_bytes()).to_string()
    }

    fn room_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid room id {:?}", id),
            )));
        }
        Ok(self.rooms_dir.join(format!("{}.json", id)))
    }

    fn player_path(&self, name: &str) -> PathBuf {
        self.players_dir
            .join(format!("{}.json", Self::player_key(name)))
    }

    pub fn save_room(&self, room: &RoomData) -> Result<(), StoreError> {
        let path = self.room_path(&room.id)?;
        let mut record = room.clone();
        record.schema_version = ROOM_SCHEMA_VERSION;
        let json = serde_json::to_string_pretty(&record)?;
        write_file_locked(&path, &json)?;
        debug!("saved room {} ({})", room.id, room.name);
        Ok(())
    }

    pub fn load_room(&self, id: &str) -> Result<Option<RoomData>, StoreError> {
        let path = self.room_path(id)?;
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };
        let room: RoomData = serde_json::from_str(&content)?;
        check_schema("room", ROOM_SCHEMA_VERSION, room.schema_version)?;
        Ok(Some(room))
    }

    /// Load every room file. Unparseable files fail the whole load.
    pub fn load_rooms(&self) -> Result<Vec<RoomData>, StoreError> {
        let mut rooms = Vec::new();
        for entry in fs::read_dir(&self.rooms_dir)? {
            let path = entry?.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if !is_json || hidden {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let room: RoomData = serde_json::from_str(&content)?;
            check_schema("room", ROOM_SCHEMA_VERSION, room.schema_version)?;
            rooms.push(room);
        }
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rooms)
    }

    /// Remove a room file. Missing files are not an error.
    pub fn remove_room(&self, id: &str) -> Result<(), StoreError> {
        let path = self.room_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_player(&self, player: &PlayerRecord) -> Result<(), StoreError> {
        let mut record = player.clone();
        record.schema_version = PLAYER_SCHEMA_VERSION;
        record.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(&record)?;
        write_file_locked(&self.player_path(&player.name), &json)?;
        debug!("saved player {}", player.name);
        Ok(())
    }

    pub fn load_player(&self, name: &str) -> Result<Option<PlayerRecord>, StoreError> {
        let Some(content) = read_optional(&self.player_path(name))? else {
            return Ok(None);
        };
        let player: PlayerRecord = serde_json::from_str(&content)?;
        check_schema("player", PLAYER_SCHEMA_VERSION, player.schema_version)?;
        Ok(Some(player))
    }

    pub fn player_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for entry in fs::read_dir(&self.players_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn hash_password(&self, password: &str) -> Result<String, StoreError> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// A corrupt or empty stored hash never verifies.
    pub fn verify_password(&self, stored: &str, password: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!(target: "security", "unreadable password hash: {}", e);
                false
            }
        }
    }
}

fn check_schema(entity: &'static str, expected: u8, found: u8) -> Result<(), StoreError> {
    if found > expected {
        return Err(StoreError::SchemaMismatch {
            entity,
            expected,
            found,
        });
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically replace `path` with `content` while holding an exclusive lock on it.
fn write_file_locked(path: &Path, content: &str) -> Result<(), StoreError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    lock_file.lock_exclusive()?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e.into()),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}
