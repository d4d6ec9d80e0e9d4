//! Everything a connection sees: sessions, their modes and the command
//! handlers behind each mode, plus the TCP server that creates them.

pub mod builder_commands;
pub mod commands;
pub mod editor;
pub mod errors;
pub mod login;
pub mod mode;
pub mod server;
pub mod session;

pub use errors::MudError;
pub use mode::{Directive, Mode, Outcome};
pub use server::MudServer;
pub use session::{spawn_session, Session};
