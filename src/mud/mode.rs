//! Session modes and per-line dispatch.
//!
//! A session is always in exactly one [`Mode`]. The driver holds the
//! session's identity lock and its mode mutex for the whole of
//! [`dispatch`] and applies any [`Outcome::next`] switch before releasing
//! either, so no line is ever interpreted against a half-replaced mode.

use std::fmt;
use std::sync::Arc;

use super::builder_commands::handle_build_line;
use super::commands::handle_play_line;
use super::editor::{handle_edit_line, TextEditor};
use super::errors::MudError;
use super::login::{handle_login, LoginFlow};
use super::session::Session;
use crate::world::World;

pub enum Mode {
    Login(LoginFlow),
    Play,
    Build,
    TextEdit(TextEditor),
}

impl Mode {
    pub fn login() -> Self {
        Mode::Login(LoginFlow::new())
    }

    /// Play and Build count as in game; they get a prompt.
    pub fn in_game(&self) -> bool {
        matches!(self, Mode::Play | Mode::Build)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Login(_) => "login",
            Mode::Play => "play",
            Mode::Build => "build",
            Mode::TextEdit(_) => "text_edit",
        }
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the driver does with the session after a turn.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    #[default]
    Continue,
    /// Shut the transport and end the session.
    Close,
    /// End this driver without touching persistence or the registry.
    /// Used when the connection has been handed to another session.
    Detach,
}

/// Result of one handled line.
#[derive(Debug, Default)]
pub struct Outcome {
    pub lines: Vec<String>,
    pub next: Option<Mode>,
    pub directive: Directive,
}

impl Outcome {
    /// No reply; nothing is written, not even a prompt.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self::silent().line(text)
    }

    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    pub fn switch(mut self, mode: Mode) -> Self {
        self.next = Some(mode);
        self
    }

    pub fn close(mut self) -> Self {
        self.directive = Directive::Close;
        self
    }

    pub fn detach(mut self) -> Self {
        self.directive = Directive::Detach;
        self
    }
}

/// Everything a handler can reach during one turn.
#[derive(Clone, Copy)]
pub struct Turn<'a> {
    pub world: &'a World,
    pub session: &'a Arc<Session>,
}

pub async fn dispatch(turn: Turn<'_>, mode: &mut Mode, line: &str) -> Result<Outcome, MudError> {
    match mode {
        Mode::Login(flow) => handle_login(turn, flow, line).await,
        Mode::Play => handle_play_line(turn, line).await,
        Mode::Build => handle_build_line(turn, line).await,
        Mode::TextEdit(editor) => handle_edit_line(turn, editor, line).await,
    }
}
