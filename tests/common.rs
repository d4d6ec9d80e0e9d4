//! Test utilities & fixtures.
//! Builds isolated worlds in temp dirs and drives sessions over in-memory duplex pipes.

use std::sync::Arc;
use std::time::Duration;

use argon2::Params;
use gridmud::mud::{spawn_session, Session};
use gridmud::world::{PlayerRecord, World, WorldSettings, WorldStoreBuilder};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A loaded world (bootstrap room only) backed by a fresh temp dir.
/// Argon2 costs are cut to the minimum so logins stay fast.
#[allow(dead_code)]
pub fn test_world() -> (Arc<World>, TempDir) {
    test_world_with(WorldSettings::default())
}

#[allow(dead_code)]
pub fn test_world_with(settings: WorldSettings) -> (Arc<World>, TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = WorldStoreBuilder::new(tmp.path())
        .with_argon2_params(Params::new(8, 1, 1, None).unwrap())
        .open()
        .unwrap();
    let world = Arc::new(World::new(store, settings));
    world.load().unwrap();
    (world, tmp)
}

/// Store a player with `password` so the next login takes the returning path.
#[allow(dead_code)]
pub fn seed_player(world: &World, name: &str, password: &str) -> PlayerRecord {
    let mut record = PlayerRecord::new(name);
    record.password_hash = world.store().hash_password(password).unwrap();
    world.store().save_player(&record).unwrap();
    record
}

/// The far end of a session's transport.
pub struct Client {
    pub session: Arc<Session>,
    pub handle: JoinHandle<()>,
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    pending: String,
}

#[allow(dead_code)]
impl Client {
    pub async fn connect(world: &Arc<World>, peer: &str) -> Client {
        let (ours, theirs) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(theirs);
        let (session, handle) = spawn_session(world.clone(), server_read, server_write, peer).await;
        let (reader, writer) = tokio::io::split(ours);
        Client {
            session,
            handle,
            reader,
            writer,
            pending: String::new(),
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read until `needle` shows up. Returns everything up to and including
    /// it; anything after stays buffered for the next call.
    pub async fn read_until(&mut self, needle: &str) -> String {
        let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
        loop {
            if let Some(pos) = self.pending.find(needle) {
                let end = pos + needle.len();
                let rest = self.pending.split_off(end);
                return std::mem::replace(&mut self.pending, rest);
            }
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout_at(deadline, self.reader.read(&mut buf))
                .await
                .unwrap_or_else(|_| {
                    panic!("timed out waiting for {:?}; got {:?}", needle, self.pending)
                })
                .unwrap();
            if n == 0 {
                panic!("connection closed waiting for {:?}; got {:?}", needle, self.pending);
            }
            self.pending.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    /// Send a line and read through the reply ending in `needle`.
    pub async fn ask(&mut self, line: &str, needle: &str) -> String {
        self.send(line).await;
        self.read_until(needle).await
    }

    /// Drain until the server closes the connection; returns what was left.
    pub async fn read_to_close(&mut self) -> String {
        let mut rest = Vec::new();
        tokio::time::timeout(READ_TIMEOUT, self.reader.read_to_end(&mut rest))
            .await
            .expect("connection did not close")
            .unwrap();
        let mut out = std::mem::take(&mut self.pending);
        out.push_str(&String::from_utf8_lossy(&rest));
        out
    }

    /// Drop our end of the pipe, as a client closing its socket would.
    pub fn hang_up(self) -> (Arc<Session>, JoinHandle<()>) {
        (self.session, self.handle)
    }

    /// Create a new character and wait until the first look has been drawn.
    pub async fn create_player(world: &Arc<World>, name: &str, password: &str) -> Client {
        let mut client = Client::connect(world, name).await;
        client.read_until("by what name are you known?").await;
        client
            .ask(name, &format!("known as {}?", name))
            .await;
        client.ask("yes", "please give me a password: ").await;
        client.ask(password, "type it again: ").await;
        client.ask(password, "Entering the world!").await;
        // The injected look ends with the room description.
        client.read_until("[Exits:").await;
        client.read_until("\r\n\r\n").await;
        client
    }

    /// Log in as a stored character and wait for the first look.
    pub async fn login(world: &Arc<World>, name: &str, password: &str) -> Client {
        let mut client = Client::connect(world, name).await;
        client.read_until("by what name are you known?").await;
        client.ask(name, "Password: ").await;
        client.ask(password, "Entering the world!").await;
        client.read_until("[Exits:").await;
        client.read_until("\r\n\r\n").await;
        client
    }
}

/// Strip ANSI escapes so assertions can look at plain text.
#[allow(dead_code)]
pub fn plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
