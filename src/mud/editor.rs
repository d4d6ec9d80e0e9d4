//! Line-buffer text editor for room names and descriptions.

use std::fmt;
use std::sync::{Arc, OnceLock};

use log::info;

use super::commands::CommandTable;
use super::errors::MudError;
use super::mode::{Mode, Outcome, Turn};
use crate::world::{Room, RoomField, WorldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditorCommand {
    Write,
    Quit,
}

fn editor_commands() -> &'static CommandTable<EditorCommand> {
    static TABLE: OnceLock<CommandTable<EditorCommand>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = CommandTable::new();
        table
            .add(":w", &[], EditorCommand::Write)
            .add(":q", &[], EditorCommand::Quit);
        table
    })
}

pub struct TextEditor {
    room: Arc<Room>,
    field: RoomField,
    lines: Vec<String>,
    quit_armed: bool,
}

impl fmt::Debug for TextEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextEditor")
            .field("room", &self.room.id())
            .field("field", &self.field)
            .field("lines", &self.lines.len())
            .field("quit_armed", &self.quit_armed)
            .finish()
    }
}

impl TextEditor {
    /// Start with an empty buffer targeting `field` of `room`.
    pub fn new(room: Arc<Room>, field: RoomField) -> Self {
        Self {
            room,
            field,
            lines: Vec::new(),
            quit_armed: false,
        }
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn field(&self) -> RoomField {
        self.field
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn text(&self) -> String {
        self.lines.join("\n").trim_end().to_string()
    }
}

pub async fn handle_edit_line(
    turn: Turn<'_>,
    editor: &mut TextEditor,
    line: &str,
) -> Result<Outcome, MudError> {
    match editor_commands().lookup(line.trim()) {
        Ok(EditorCommand::Write) => {
            editor.quit_armed = false;
            match editor
                .room
                .set_text(turn.world, turn.session.token(), editor.field, &editor.text())
                .await
            {
                Ok(()) => {}
                Err(WorldError::RoomGone(_)) => {
                    return Ok(Outcome::reply("The room you were editing no longer exists.")
                        .switch(Mode::Build));
                }
                Err(e) => return Err(e.into()),
            }
            info!(
                "{} saved {:?} of room {}",
                turn.session.name(),
                editor.field,
                editor.room.id()
            );
            Ok(Outcome::reply("{gText saved.{x").switch(Mode::Build))
        }
        Ok(EditorCommand::Quit) if editor.quit_armed => {
            Ok(Outcome::reply("{rCancelling editing, text not saved.{x").switch(Mode::Build))
        }
        Ok(EditorCommand::Quit) => {
            editor.quit_armed = true;
            Ok(Outcome::reply(
                "Type :q to quit again. Any other command will back out.",
            ))
        }
        Err(_) => {
            editor.quit_armed = false;
            editor.lines.push(line.to_string());
            Ok(Outcome {
                lines: editor.lines.clone(),
                ..Outcome::default()
            })
        }
    }
}
