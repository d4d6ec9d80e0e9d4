//! Build-mode commands. Anything not listed here falls through to play mode.

use std::sync::OnceLock;

use log::info;

use super::commands::{add_directions, handle_play_line, move_player, split_command, CommandTable};
use super::editor::TextEditor;
use super::errors::MudError;
use super::mode::{Mode, Outcome, Turn};
use crate::world::{Direction, PlayerFlag, RoomField, WorldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildCommand {
    Dig,
    Build,
    Autobuild,
    Set,
    Edit,
    Move(Direction),
}

pub fn build_commands() -> &'static CommandTable<BuildCommand> {
    static TABLE: OnceLock<CommandTable<BuildCommand>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = CommandTable::new();
        table
            .add("dig", &[], BuildCommand::Dig)
            .add("build", &[], BuildCommand::Build)
            .add("autobuild", &[], BuildCommand::Autobuild)
            .add("set", &[], BuildCommand::Set)
            .add("edit", &[], BuildCommand::Edit);
        add_directions(&mut table, BuildCommand::Move);
        table
    })
}

pub async fn handle_build_line(turn: Turn<'_>, line: &str) -> Result<Outcome, MudError> {
    let (word, args) = split_command(line);
    let Ok(cmd) = build_commands().lookup(word) else {
        return handle_play_line(turn, line).await;
    };
    match cmd {
        BuildCommand::Dig => dig(turn, args).await,
        BuildCommand::Build => Ok(Outcome::reply("Build mode deactivated.").switch(Mode::Play)),
        BuildCommand::Autobuild => {
            let on = turn
                .session
                .with_player(|p| p.toggle_flag(PlayerFlag::Autobuild));
            Ok(Outcome::reply(if on {
                "Autobuild has been enabled."
            } else {
                "Autobuild has been disabled."
            }))
        }
        BuildCommand::Set => set(turn, args).await,
        BuildCommand::Edit => edit(turn, args).await,
        BuildCommand::Move(dir) => {
            if turn.session.flag(PlayerFlag::Autobuild) {
                let room = turn
                    .session
                    .room()
                    .await
                    .ok_or_else(|| MudError::validation("You are nowhere."))?;
                if room.physical_room(turn.world, dir).is_none() {
                    return dig_toward(turn, dir).await;
                }
            }
            move_player(turn, dir).await
        }
    }
}

async fn dig(turn: Turn<'_>, args: &str) -> Result<Outcome, MudError> {
    let (word, _) = split_command(args);
    if word.is_empty() {
        return Ok(Outcome::reply("Which direction do you want to dig?"));
    }
    let Some(dir) = Direction::parse(word) else {
        return Ok(Outcome::reply("That's not a valid direction to dig in."));
    };
    dig_toward(turn, dir).await
}

/// Dig a room in `dir` and walk into it.
async fn dig_toward(turn: Turn<'_>, dir: Direction) -> Result<Outcome, MudError> {
    let Some(room) = turn.session.room().await else {
        return Err(MudError::validation("You are nowhere."));
    };
    match room.dig(turn.world, turn.session.token(), dir).await {
        Ok(created) => {
            info!("{} dug {} to {}", turn.session.name(), dir, created.id());
            move_player(turn, dir).await
        }
        Err(WorldError::RoomExists(d)) => Ok(Outcome::reply(format!("There's already a room '{}'.", d))),
        Err(e) => Err(e.into()),
    }
}

async fn set(turn: Turn<'_>, args: &str) -> Result<Outcome, MudError> {
    let (target, rest) = split_command(args);
    if target.is_empty() {
        return Ok(Outcome::reply("Set what?"));
    }
    if !target.eq_ignore_ascii_case("room") {
        return Ok(Outcome::reply("No such thing to set."));
    }
    let (property, value) = split_command(rest);
    if property.is_empty() {
        return Ok(Outcome::reply("What do you want to set on the room?"));
    }
    let Some(field) = RoomField::parse(property) else {
        return Ok(Outcome::reply("There's no such room property to set."));
    };
    if value.is_empty() {
        return Ok(Outcome::reply(match field {
            RoomField::Name => "What do you want to set the name to?",
            RoomField::Description => "What do you want to set the description to?",
        }));
    }

    let room = turn
        .session
        .room()
        .await
        .ok_or_else(|| MudError::validation("You are nowhere."))?;
    let token = turn.session.token();
    match field {
        RoomField::Name => {
            room.set_name(turn.world, token, value).await?;
            Ok(Outcome::reply("Name set."))
        }
        RoomField::Description => {
            room.set_description(turn.world, token, value).await?;
            Ok(Outcome::reply("Description set."))
        }
    }
}

async fn edit(turn: Turn<'_>, args: &str) -> Result<Outcome, MudError> {
    let (target, rest) = split_command(args);
    if target.is_empty() {
        return Ok(Outcome::reply("What would you like to edit?"));
    }
    let (property, _) = split_command(rest);
    let field = if target.eq_ignore_ascii_case("room") {
        RoomField::parse(property)
    } else {
        None
    };
    let Some(field) = field else {
        return Ok(Outcome::reply("There's no such room property to edit."));
    };
    let room = turn
        .session
        .room()
        .await
        .ok_or_else(|| MudError::validation("You are nowhere."))?;
    Ok(
        Outcome::reply("You are now editing text. Type :q to quit, :w to save.")
            .switch(Mode::TextEdit(TextEditor::new(room, field))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_table_shadows_play_moves() {
        let table = build_commands();
        assert_eq!(
            table.lookup("e").unwrap(),
            BuildCommand::Move(Direction::East)
        );
        assert_eq!(table.lookup("DIG").unwrap(), BuildCommand::Dig);
        // Play commands are not in the build table; they fall through.
        assert!(!table.has("look"));
        assert!(!table.has("say"));
    }
}
