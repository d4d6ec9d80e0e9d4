//! Play-mode command table and handlers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::{debug, error};

use super::errors::MudError;
use super::mode::{Mode, Outcome, Turn};
use crate::world::{render_map, Direction, PlayerFlag, Room, WorldError};

/// Case-insensitive lookup from command words (names and aliases) to a command.
#[derive(Debug, Clone)]
pub struct CommandTable<C: Copy> {
    entries: HashMap<String, C>,
    names: Vec<String>,
}

impl<C: Copy> Default for CommandTable<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            names: Vec::new(),
        }
    }
}

impl<C: Copy> CommandTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cmd` under `name` and every alias. Later registrations win.
    pub fn add(&mut self, name: &str, aliases: &[&str], cmd: C) -> &mut Self {
        assert!(!name.trim().is_empty(), "command name must not be blank");
        self.names.push(name.to_lowercase());
        for word in std::iter::once(name).chain(aliases.iter().copied()) {
            self.entries.insert(word.to_lowercase(), cmd);
        }
        self
    }

    pub fn lookup(&self, word: &str) -> Result<C, MudError> {
        self.entries
            .get(&word.to_lowercase())
            .copied()
            .ok_or_else(|| MudError::CommandNotFound(word.to_string()))
    }

    pub fn has(&self, word: &str) -> bool {
        self.entries.contains_key(&word.to_lowercase())
    }

    /// Primary names in registration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Split a line into its first word and the trimmed remainder.
pub fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayCommand {
    Look,
    Save,
    Quit,
    Build,
    Move(Direction),
    Prompt,
    Color,
    Say,
    Map,
}

pub fn play_commands() -> &'static CommandTable<PlayCommand> {
    static TABLE: OnceLock<CommandTable<PlayCommand>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = CommandTable::new();
        table
            .add("look", &["l"], PlayCommand::Look)
            .add("save", &[], PlayCommand::Save)
            .add("quit", &[], PlayCommand::Quit)
            .add("build", &[], PlayCommand::Build)
            .add("prompt", &[], PlayCommand::Prompt)
            .add("color", &["colour"], PlayCommand::Color)
            .add("say", &["'"], PlayCommand::Say)
            .add("map", &[], PlayCommand::Map);
        add_directions(&mut table, PlayCommand::Move);
        table
    })
}

/// Register every direction under its name and one-letter alias.
pub(crate) fn add_directions<C: Copy>(table: &mut CommandTable<C>, cmd: fn(Direction) -> C) {
    for dir in Direction::ALL {
        let name = dir.name();
        table.add(name, &[&name[..1]], cmd(dir));
    }
}

pub async fn handle_play_line(turn: Turn<'_>, line: &str) -> Result<Outcome, MudError> {
    let (word, args) = split_command(line);
    if word.is_empty() {
        // Just redraw the prompt.
        return Ok(Outcome::reply(""));
    }
    let cmd = play_commands().lookup(word)?;
    run_play_command(turn, cmd, args).await
}

pub(crate) async fn run_play_command(
    turn: Turn<'_>,
    cmd: PlayCommand,
    args: &str,
) -> Result<Outcome, MudError> {
    match cmd {
        PlayCommand::Look => look(turn).await,
        PlayCommand::Save => Ok(save(turn)),
        PlayCommand::Quit => {
            turn.session.teardown(turn.world, true).await;
            Ok(Outcome::reply("See ya!").close())
        }
        PlayCommand::Build => Ok(Outcome::reply("Entering build mode.").switch(Mode::Build)),
        PlayCommand::Move(dir) => move_player(turn, dir).await,
        PlayCommand::Prompt => Ok(prompt(turn, args)),
        PlayCommand::Color => {
            let on = turn
                .session
                .with_player(|p| p.toggle_flag(PlayerFlag::Color));
            Ok(Outcome::reply(if on {
                "{gColor enabled!{x"
            } else {
                "Color disabled :("
            }))
        }
        PlayCommand::Say => say(turn, args).await,
        PlayCommand::Map => map(turn, args).await,
    }
}

async fn current_room(turn: Turn<'_>) -> Result<Arc<Room>, MudError> {
    turn.session
        .room()
        .await
        .ok_or_else(|| MudError::validation("You are nowhere."))
}

async fn look(turn: Turn<'_>) -> Result<Outcome, MudError> {
    let room = current_room(turn).await?;
    Ok(Outcome::reply(render_look(turn, &room).await))
}

/// Room description as shown by `look`.
pub async fn render_look(turn: Turn<'_>, room: &Arc<Room>) -> String {
    let Turn { world, session } = turn;
    let data = room.data();

    let mut out = format!("\n\n{}\n", data.name);
    out.push_str("{c[Exits:");
    let mut any = false;
    for dir in Direction::ALL {
        if room.can_traverse(world, dir) {
            out.push(' ');
            out.push_str(dir.name());
            any = true;
        }
    }
    if !any {
        out.push_str(" none");
    }
    out.push_str("]{x\n");

    if session.flag(PlayerFlag::Automap) {
        out.push('\n');
        out.push_str(&render_map(world, room, world.settings().automap_radius));
        out.push_str("\n\n");
    } else {
        out.push('\n');
    }
    out.push_str("  ");
    out.push_str(&data.description);
    out.push('\n');

    for other in room.occupants(session.token()).await {
        if !Arc::ptr_eq(&other, session) {
            out.push_str(&format!("\n{} is here.\n", other.name()));
        }
    }
    out
}

fn save(turn: Turn<'_>) -> Outcome {
    let record = turn.session.player();
    match turn.world.store().save_player(&record) {
        Ok(()) => Outcome::reply("Your player has been saved."),
        Err(e) => {
            error!("failed to save player {}: {}", record.name, e);
            Outcome::reply("Your player could not be saved.")
        }
    }
}

/// Walk through the exit in `dir`. Arrival triggers a `look` on the next turn.
pub(crate) async fn move_player(turn: Turn<'_>, dir: Direction) -> Result<Outcome, MudError> {
    let room = current_room(turn).await?;
    if room.can_traverse(turn.world, dir) {
        if let Some(target) = room.linked_room(turn.world, dir) {
            match turn.session.move_to(turn.world, target).await {
                Ok(()) => {
                    turn.session.inject("look");
                    return Ok(Outcome::silent());
                }
                Err(WorldError::RoomGone(id)) => {
                    debug!("{} raced a delete of {}", turn.session.name(), id);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    let exit = room.exit(dir);
    if exit.closed && !exit.wall {
        Ok(Outcome::reply(format!("The exit {} is closed!", dir)))
    } else {
        Ok(Outcome::reply("You can't go that way!"))
    }
}

fn prompt(turn: Turn<'_>, args: &str) -> Outcome {
    if args.is_empty() {
        let on = turn
            .session
            .with_player(|p| p.toggle_flag(PlayerFlag::Prompt));
        return Outcome::reply(if on { "Prompt enabled." } else { "Prompt disabled." });
    }
    turn.session.with_player(|p| p.prompt = args.to_string());
    Outcome::reply("Prompt set.")
}

async fn say(turn: Turn<'_>, args: &str) -> Result<Outcome, MudError> {
    if args.is_empty() {
        return Ok(Outcome::reply("Say what?"));
    }
    let room = current_room(turn).await?;
    let heard = format!("{{y{} says, {{x'{}{{x'", turn.session.name(), args);
    let (me, heard) = (turn.session, heard.as_str());
    room.for_each_player(me.token(), move |other| async move {
        if !Arc::ptr_eq(&other, me) {
            other.send(heard).await;
        }
    })
    .await;
    Ok(Outcome::reply(format!("{{yYou say, {{x'{}{{x'", args)))
}

async fn map(turn: Turn<'_>, args: &str) -> Result<Outcome, MudError> {
    let (word, _) = split_command(args);
    match word.to_lowercase().as_str() {
        "on" => {
            turn.session
                .with_player(|p| p.set_flag(PlayerFlag::Automap, true));
            return Ok(Outcome::reply("Automap turned on."));
        }
        "off" => {
            turn.session
                .with_player(|p| p.set_flag(PlayerFlag::Automap, false));
            return Ok(Outcome::reply("Automap turned off."));
        }
        _ => {}
    }

    // No size, or size 0, means the largest map allowed.
    let max = turn.world.settings().max_map_radius;
    let radius = if word.is_empty() {
        max
    } else {
        match word.parse::<usize>() {
            Ok(0) => max,
            Ok(n) => n.min(max),
            Err(_) => {
                return Ok(Outcome::reply(
                    "You must specify a number for your map size, i.e. 'map 5'",
                ))
            }
        }
    };
    let room = current_room(turn).await?;
    Ok(Outcome::reply(render_map(turn.world, &room, radius)))
}
