//! Login state machine.
//!
//! ```text
//! AskName -> ConfirmName -> NewPassword -> ConfirmPassword -> Play   (new)
//! AskName -> AskPassword -> Play                                      (returning)
//! ```
//!
//! A name that is already live in the world is not rejected: the new
//! connection is handed to the existing session instead.

use std::sync::Arc;

use log::{error, info, warn};

use super::errors::MudError;
use super::mode::{Mode, Outcome, Turn};
use super::session::Session;
use crate::logutil::escape_log;
use crate::validation::{validate_name, validate_password};
use crate::world::PlayerRecord;

const INVALID_NAME: &str = "That is an invalid name. Your name may contain only a-zA-Z and a single apostrophe, and must be no more than 16 letters long.";
const ASK_NAME_AGAIN: &str = "So then, what's your name?";
const LOAD_FAILED: &str = "Something went wrong trying to load your pfile, contact an admin.";
const SEIZED: &str =
    "An existing player was found, disconnecting that player and attaching you to that session.";

/// Attempts at registering before giving up on a name that keeps closing underneath us.
const SEIZE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    AskName,
    ConfirmName,
    NewPassword,
    ConfirmPassword { first: String },
    AskPassword,
}

#[derive(Debug)]
pub struct LoginFlow {
    state: LoginState,
    pending: Option<PlayerRecord>,
}

impl Default for LoginFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginFlow {
    pub fn new() -> Self {
        Self {
            state: LoginState::AskName,
            pending: None,
        }
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    fn restart(&mut self) {
        self.state = LoginState::AskName;
        self.pending = None;
    }

    fn pending_name(&self) -> String {
        self.pending
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }
}

pub async fn handle_login(
    turn: Turn<'_>,
    flow: &mut LoginFlow,
    line: &str,
) -> Result<Outcome, MudError> {
    let input = line.trim();
    match flow.state.clone() {
        LoginState::AskName => ask_name(turn, flow, input),
        LoginState::ConfirmName => {
            if matches!(input.to_lowercase().as_str(), "yes" | "y") {
                flow.state = LoginState::NewPassword;
                Ok(Outcome::reply(format!(
                    "Welcome {}, please give me a password: ",
                    flow.pending_name()
                )))
            } else {
                flow.restart();
                Ok(Outcome::reply("Okay, so what's your name?"))
            }
        }
        LoginState::NewPassword => {
            if let Err(e) = validate_password(line) {
                return Ok(Outcome::reply(format!("{}. Please give me a password: ", e)));
            }
            flow.state = LoginState::ConfirmPassword {
                first: line.to_string(),
            };
            Ok(Outcome::reply("Confirm your password and type it again: "))
        }
        LoginState::ConfirmPassword { first } => {
            if line != first {
                flow.state = LoginState::NewPassword;
                return Ok(Outcome::reply("Passwords do not match")
                    .line("Let's try this again. Please give me a new password: "));
            }
            let Some(mut record) = flow.pending.take() else {
                flow.restart();
                return Ok(Outcome::reply(ASK_NAME_AGAIN));
            };
            let stored = turn
                .world
                .store()
                .hash_password(line)
                .and_then(|hash| {
                    record.password_hash = hash;
                    turn.world.store().save_player(&record)
                });
            if let Err(e) = stored {
                error!("failed to create player {}: {}", record.name, e);
                return Ok(Outcome::reply(LOAD_FAILED).close());
            }
            info!(target: "security", "new player {} created from {}", record.name, turn.session.peer());
            enter_world(turn, record).await
        }
        LoginState::AskPassword => {
            let Some(record) = flow.pending.take() else {
                flow.restart();
                return Ok(Outcome::reply(ASK_NAME_AGAIN));
            };
            if !turn.world.store().verify_password(&record.password_hash, line) {
                warn!(
                    target: "security",
                    "failed password for {} from {}",
                    record.name,
                    turn.session.peer()
                );
                return Ok(Outcome::reply("Wrong password. Bye.").close());
            }
            info!(target: "security", "{} authenticated from {}", record.name, turn.session.peer());
            enter_world(turn, record).await
        }
    }
}

fn ask_name(turn: Turn<'_>, flow: &mut LoginFlow, input: &str) -> Result<Outcome, MudError> {
    let name = match validate_name(input) {
        Ok(name) => name,
        Err(e) => {
            info!("rejected name '{}': {}", escape_log(input), e);
            return Ok(Outcome::reply(INVALID_NAME).line(ASK_NAME_AGAIN));
        }
    };
    match turn.world.store().load_player(&name) {
        Ok(Some(record)) => {
            flow.pending = Some(record);
            flow.state = LoginState::AskPassword;
            Ok(Outcome::reply("Password: "))
        }
        Ok(None) => {
            let reply = format!("Are you sure you want to be known as {}?", name);
            flow.pending = Some(PlayerRecord::new(&name));
            flow.state = LoginState::ConfirmName;
            Ok(Outcome::reply(reply))
        }
        Err(e) => {
            error!("failed to load player {}: {}", name, e);
            Ok(Outcome::reply(LOAD_FAILED).close())
        }
    }
}

/// Register the authenticated session, or hand the connection to the live one.
async fn enter_world(turn: Turn<'_>, record: PlayerRecord) -> Result<Outcome, MudError> {
    let Turn { world, session } = turn;
    session.set_player(record);

    let mut attempts = 0;
    while let Some(existing) = world.add_session(session.clone()) {
        attempts += 1;
        if attempts > SEIZE_ATTEMPTS {
            error!("could not register or seize session for {}", session.name());
            return Ok(Outcome::reply(LOAD_FAILED).close());
        }
        match seize(session, &existing).await {
            Seize::Done => return Ok(Outcome::silent().detach()),
            Seize::NoTransport => return Ok(Outcome::silent().close()),
            Seize::Closed => {
                world.remove_session(&existing);
            }
        }
    }

    let room_id = session.player().room;
    let room = room_id
        .as_deref()
        .and_then(|id| world.room_by_id(id))
        .or_else(|| world.room_at(0, 0, 0))
        .or_else(|| world.rooms().into_iter().next());
    let Some(room) = room else {
        error!("no room to place {} in", session.name());
        world.remove_session(session);
        return Ok(Outcome::reply(LOAD_FAILED).close());
    };
    if let Err(e) = session.move_to(world, room.clone()).await {
        error!("could not place {} in {}: {}", session.name(), room.id(), e);
        world.remove_session(session);
        return Ok(Outcome::reply(LOAD_FAILED).close());
    }
    session.mark_logged_in();

    let name = session.name();
    let arrival = format!("{} enters the realm before your eyes.", name);
    let arrival = arrival.as_str();
    room.for_each_player(session.token(), move |other| async move {
        if !Arc::ptr_eq(&other, session) {
            other.send(arrival).await;
        }
    })
    .await;
    info!("{} entered the world at {}", name, room.id());
    session.inject("look");
    Ok(Outcome::reply("Entering the world!").switch(Mode::Play))
}

enum Seize {
    Done,
    NoTransport,
    Closed,
}

async fn seize(session: &Arc<Session>, existing: &Arc<Session>) -> Seize {
    session.send_line(SEIZED).await;
    let Some((lines, writer)) = session.take_transport().await else {
        return Seize::NoTransport;
    };
    match existing
        .adopt_transport(session.token(), lines, writer)
        .await
    {
        Ok(()) => {
            info!(target: "security", "{} seized by connection from {}", existing.name(), session.peer());
            Seize::Done
        }
        Err((lines, writer)) => {
            session.restore_transport(lines, writer).await;
            Seize::Closed
        }
    }
}
