//! Per-connection session state and its driver.
//!
//! Every session runs two tasks:
//!
//! - a **reader** that turns the transport into [`Inbound`] items on the
//!   session's inbox and can be stopped on demand, handing the still-open
//!   line reader back;
//! - the **turn loop** ([`Session::run`]) that takes one item at a time,
//!   acquires the session's identity lock with the session's own token,
//!   dispatches to the current mode, releases, and only then writes the reply.
//!
//! Self-injected commands (the `look` after a move) go through the same
//! inbox so they are ordered with typed input.
//!
//! Reconnection seizure swaps a live session's transport for a new
//! connection's: the old reader is stopped through its stop channel, which is
//! a plain cancellable read, and a fresh reader is spawned on the new lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::errors::MudError;
use super::mode::{dispatch, Directive, Mode, Outcome, Turn};
use crate::color;
use crate::lock::{IdentityLock, LockToken};
use crate::logutil::escape_log;
use crate::world::{PlayerFlag, PlayerRecord, Room, World, WorldError};

pub type LineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub const GREETING: &str = "Welcome, by what name are you known?";
pub const BUSY: &str = "The world is busy, try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Line(String),
    /// The reader of the given transport generation hit EOF or an error.
    Closed { generation: u64 },
}

struct ReaderHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Option<LineReader>>,
}

impl ReaderHandle {
    /// Stop the reader; returns the line reader unless it had already finished.
    async fn stop(self) -> Option<LineReader> {
        let _ = self.stop.send(());
        self.task.await.ok().flatten()
    }
}

#[derive(Default)]
struct Transport {
    writer: Option<Writer>,
    reader: Option<ReaderHandle>,
    generation: u64,
}

pub struct Session {
    id: String,
    token: LockToken,
    lock: IdentityLock,
    peer: String,
    player: StdMutex<PlayerRecord>,
    location: Mutex<Option<Arc<Room>>>,
    mode: Mutex<Mode>,
    inbox: mpsc::UnboundedSender<Inbound>,
    transport: Mutex<Transport>,
    logged_in: AtomicBool,
    in_game: AtomicBool,
    closed: AtomicBool,
    cancel: watch::Sender<bool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("name", &self.name())
            .finish()
    }
}

impl Session {
    /// A fresh session in login mode, with no transport attached yet.
    pub fn new(peer: impl Into<String>) -> (Arc<Session>, mpsc::UnboundedReceiver<Inbound>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (inbox, rx) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(false);
        let session = Arc::new(Session {
            token: LockToken::new(id.clone()),
            id,
            lock: IdentityLock::new(),
            peer: peer.into(),
            player: StdMutex::new(PlayerRecord::new("")),
            location: Mutex::new(None),
            mode: Mutex::new(Mode::login()),
            inbox,
            transport: Mutex::new(Transport::default()),
            logged_in: AtomicBool::new(false),
            in_game: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel,
        });
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub fn lock(&self) -> &IdentityLock {
        &self.lock
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn player_guard(&self) -> MutexGuard<'_, PlayerRecord> {
        self.player.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn name(&self) -> String {
        self.player_guard().name.clone()
    }

    /// Snapshot of the player record.
    pub fn player(&self) -> PlayerRecord {
        self.player_guard().clone()
    }

    pub fn set_player(&self, record: PlayerRecord) {
        *self.player_guard() = record;
    }

    pub fn with_player<R>(&self, f: impl FnOnce(&mut PlayerRecord) -> R) -> R {
        f(&mut self.player_guard())
    }

    pub fn flag(&self, flag: PlayerFlag) -> bool {
        self.player_guard().flag(flag)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_logged_in(&self) {
        self.logged_in.store(true, Ordering::SeqCst);
    }

    pub fn is_in_game(&self) -> bool {
        self.in_game.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Name of the current mode. Waits if a turn is in progress.
    pub async fn mode_name(&self) -> &'static str {
        self.mode.lock().await.name()
    }

    /// Replace the mode outside the turn loop. Tests and bootstrap only.
    pub async fn set_mode(&self, mode: Mode) {
        let _guard = self.lock.acquire(&self.token).await;
        let mut current = self.mode.lock().await;
        self.in_game.store(mode.in_game(), Ordering::SeqCst);
        *current = mode;
    }

    /// Queue a command as if the player had typed it.
    pub fn inject(&self, line: &str) {
        if self.inbox.send(Inbound::Line(line.to_string())).is_err() {
            debug!("session {} inbox closed, dropped injected {:?}", self.id, line);
        }
    }

    /// Ask the turn loop to tear the session down.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    // ---- location ----------------------------------------------------------

    pub async fn room(&self) -> Option<Arc<Room>> {
        self.location.lock().await.clone()
    }

    /// Move into `target` under the shared structural lock.
    pub async fn move_to(self: &Arc<Self>, world: &World, target: Arc<Room>) -> Result<(), WorldError> {
        let _structure = world.structure_read().await;
        if !world.is_registered(&target) {
            return Err(WorldError::RoomGone(target.id().to_string()));
        }
        self.place(Some(target)).await;
        Ok(())
    }

    /// Swap rooms. Caller holds the structural lock in some mode.
    async fn place(self: &Arc<Self>, target: Option<Arc<Room>>) {
        let mut location = self.location.lock().await;
        if let Some(old) = location.take() {
            old.remove_player(&self.token, &self.id).await;
        }
        if let Some(room) = &target {
            room.add_player(&self.token, self.clone()).await;
            self.with_player(|p| p.room = Some(room.id().to_string()));
        }
        *location = target;
    }

    /// Move out of `from` into `to` if still standing in `from`. Used when
    /// a room is deleted; the caller already holds the structural lock.
    pub(crate) async fn relocate_from(self: &Arc<Self>, from: &Arc<Room>, to: Arc<Room>) {
        let mut location = self.location.lock().await;
        if !location.as_ref().is_some_and(|r| Arc::ptr_eq(r, from)) {
            return;
        }
        from.remove_player(&self.token, &self.id).await;
        to.add_player(&self.token, self.clone()).await;
        self.with_player(|p| p.room = Some(to.id().to_string()));
        debug!("relocated {} from {} to {}", self.name(), from.id(), to.id());
        *location = Some(to);
    }

    /// Persist (optionally), leave the room and the registry. Caller holds the session lock.
    pub(crate) async fn teardown(self: &Arc<Self>, world: &World, persist: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if persist && self.is_logged_in() {
            if let Err(e) = world.store().save_player(&self.player()) {
                error!("failed to save {} on exit: {}", self.name(), e);
            }
        }
        {
            let _structure = world.structure_read().await;
            self.place(None).await;
        }
        if self.is_logged_in() {
            world.remove_session(self);
            info!("{} left the world", self.name());
        }
        self.in_game.store(false, Ordering::SeqCst);
    }

    // ---- transport ---------------------------------------------------------

    /// Attach a byte stream and start reading lines from it.
    pub async fn attach<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let lines = BufReader::new(boxed).lines();
        let mut transport = self.transport.lock().await;
        self.install(&mut transport, lines, Box::new(writer));
    }

    fn install(&self, transport: &mut Transport, lines: LineReader, writer: Writer) {
        transport.generation += 1;
        transport.reader = Some(self.spawn_reader(lines, transport.generation));
        transport.writer = Some(writer);
    }

    fn spawn_reader(&self, mut lines: LineReader, generation: u64) -> ReaderHandle {
        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let inbox = self.inbox.clone();
        let id = self.id.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => return Some(lines),
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            let line = line.trim_end().to_string();
                            if inbox.send(Inbound::Line(line)).is_err() {
                                return None;
                            }
                        }
                        Ok(None) => {
                            debug!("session {} transport closed", id);
                            let _ = inbox.send(Inbound::Closed { generation });
                            return None;
                        }
                        Err(e) => {
                            warn!("session {} read error: {}", id, e);
                            let _ = inbox.send(Inbound::Closed { generation });
                            return None;
                        }
                    },
                }
            }
        });
        ReaderHandle { stop, task }
    }

    /// Stop reading and hand back the connection. `None` if the reader had
    /// already ended, in which case the writer is left in place.
    pub(crate) async fn take_transport(&self) -> Option<(LineReader, Writer)> {
        let mut transport = self.transport.lock().await;
        let lines = transport.reader.take()?.stop().await?;
        let writer = transport.writer.take()?;
        Some((lines, writer))
    }

    /// Put back a connection taken with [`Session::take_transport`].
    pub(crate) async fn restore_transport(&self, lines: LineReader, writer: Writer) {
        let mut transport = self.transport.lock().await;
        self.install(&mut transport, lines, writer);
    }

    /// Install a seized connection in place of this session's own.
    ///
    /// Runs under this session's lock, acquired with the seizing session's
    /// token. Fails, handing the connection back, if this session has
    /// already been torn down.
    pub(crate) async fn adopt_transport(
        self: &Arc<Self>,
        token: &LockToken,
        lines: LineReader,
        writer: Writer,
    ) -> Result<(), (LineReader, Writer)> {
        let _guard = self.lock.acquire(token).await;
        if self.is_closed() {
            return Err((lines, writer));
        }
        let mut transport = self.transport.lock().await;
        if let Some(old) = transport.reader.take() {
            drop(old.stop().await);
        }
        if let Some(mut old) = transport.writer.take() {
            let _ = old.shutdown().await;
        }
        self.install(&mut transport, lines, writer);
        drop(transport);
        info!("{} reattached from a new connection", self.name());
        self.inject("look");
        Ok(())
    }

    async fn close_transport(&self) {
        let mut transport = self.transport.lock().await;
        if let Some(reader) = transport.reader.take() {
            drop(reader.stop().await);
        }
        if let Some(mut writer) = transport.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    // ---- output ------------------------------------------------------------

    /// Prompt to print after output, if any.
    pub fn prompt_text(&self) -> Option<String> {
        let player = self.player_guard();
        (self.is_in_game() && player.flag(PlayerFlag::Prompt)).then(|| player.render_prompt())
    }

    /// Write `lines` (each terminated by CRLF) and an optional prompt in one go.
    pub async fn write_reply(&self, lines: &[String], prompt: Option<String>) {
        let color_on = self.flag(PlayerFlag::Color);
        let mut out = String::new();
        for line in lines {
            out.push_str(&color::render(line, color_on));
            out.push_str("\r\n");
        }
        if let Some(prompt) = prompt {
            out.push_str("\r\n");
            out.push_str(&color::render(&prompt, color_on));
            out.push_str("\r\n");
        }
        if out.is_empty() {
            return;
        }
        let mut transport = self.transport.lock().await;
        let Some(writer) = transport.writer.as_mut() else {
            return;
        };
        let res = async {
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = res {
            debug!("session {} write failed: {}", self.id, e);
        }
    }

    /// Message from outside this session's own turn, followed by its prompt.
    pub async fn send(&self, text: impl Into<String>) {
        self.write_reply(&[text.into()], self.prompt_text()).await;
    }

    /// Message without a prompt.
    pub async fn send_line(&self, text: impl Into<String>) {
        self.write_reply(&[text.into()], None).await;
    }

    // ---- driver ------------------------------------------------------------

    /// The turn loop. Returns once the session is closed or detached.
    pub async fn run(self: Arc<Self>, world: Arc<World>, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        let mut cancel = self.cancel.subscribe();
        loop {
            let cancelled = *cancel.borrow_and_update();
            if cancelled {
                self.shutdown(&world).await;
                break;
            }
            let item = tokio::select! {
                biased;
                _ = cancel.changed() => continue,
                item = inbox.recv() => item,
            };
            let Some(item) = item else {
                break;
            };
            let directive = match item {
                Inbound::Line(line) => self.turn(&world, &line).await,
                Inbound::Closed { generation } => self.disconnected(&world, generation).await,
            };
            match directive {
                Directive::Continue => {}
                Directive::Close => {
                    self.close_transport().await;
                    break;
                }
                Directive::Detach => {
                    debug!("session {} detached", self.id);
                    break;
                }
            }
        }
        debug!("session {} ({}) finished", self.id, self.peer);
    }

    async fn turn(self: &Arc<Self>, world: &World, line: &str) -> Directive {
        let guard = match world.settings().lock_wait {
            Some(wait) => match self.lock.acquire_timeout(&self.token, wait).await {
                Ok(guard) => guard,
                Err(e) => {
                    let outcome = self.outcome_for_error(e.into(), line);
                    self.write_reply(&outcome.lines, self.prompt_text()).await;
                    return outcome.directive;
                }
            },
            None => self.lock.acquire(&self.token).await,
        };
        if self.is_closed() {
            return Directive::Close;
        }

        let (outcome, prompt) = {
            let mut mode = self.mode.lock().await;
            let turn = Turn {
                world,
                session: self,
            };
            let mut outcome = match dispatch(turn, &mut *mode, line).await {
                Ok(outcome) => outcome,
                Err(e) => self.outcome_for_error(e, line),
            };
            if let Some(next) = outcome.next.take() {
                debug!("session {} mode {} -> {}", self.id, mode.name(), next.name());
                self.in_game.store(next.in_game(), Ordering::SeqCst);
                *mode = next;
            }
            (outcome, self.prompt_text())
        };
        drop(guard);

        if !outcome.lines.is_empty() {
            self.write_reply(&outcome.lines, prompt).await;
        }
        outcome.directive
    }

    fn outcome_for_error(&self, e: MudError, line: &str) -> Outcome {
        match e {
            MudError::CommandNotFound(_) => Outcome::reply("Huh?"),
            MudError::Validation(msg) => Outcome::reply(msg),
            MudError::Lock(e) => {
                warn!("session {} lock failure: {}", self.id, e);
                Outcome::reply(BUSY)
            }
            MudError::World(WorldError::RoomGone(id)) => {
                debug!("session {} acted on vanished room {}", self.id, id);
                Outcome::reply("That room no longer exists.")
            }
            e if e.is_storage() => {
                error!(
                    "storage failure for {} (session {}) on '{}': {}",
                    self.name(),
                    self.id,
                    escape_log(line),
                    e
                );
                Outcome::reply("{rSomething went wrong saving that. Nothing was changed.{x")
            }
            e => {
                warn!("session {} error on '{}': {}", self.id, escape_log(line), e);
                Outcome::reply(e.to_string())
            }
        }
    }

    async fn disconnected(self: &Arc<Self>, world: &World, generation: u64) -> Directive {
        let _guard = self.lock.acquire(&self.token).await;
        if self.transport.lock().await.generation != generation {
            // A reader that was replaced during seizure.
            return Directive::Continue;
        }
        info!("{} ({}) disconnected", self.name(), self.peer);
        self.teardown(world, true).await;
        Directive::Close
    }

    async fn shutdown(self: &Arc<Self>, world: &World) {
        {
            let _guard = self.lock.acquire(&self.token).await;
            self.teardown(world, true).await;
        }
        self.close_transport().await;
    }
}

/// Create a session on a transport, greet it, and spawn its turn loop.
pub async fn spawn_session<R, W>(
    world: Arc<World>,
    reader: R,
    writer: W,
    peer: impl Into<String>,
) -> (Arc<Session>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    spawn_session_with_greeting(world, reader, writer, peer, GREETING).await
}

pub async fn spawn_session_with_greeting<R, W>(
    world: Arc<World>,
    reader: R,
    writer: W,
    peer: impl Into<String>,
    greeting: &str,
) -> (Arc<Session>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (session, inbox) = Session::new(peer);
    session.attach(reader, writer).await;
    session.send_line(greeting).await;
    let handle = tokio::spawn(session.clone().run(world, inbox));
    (session, handle)
}
