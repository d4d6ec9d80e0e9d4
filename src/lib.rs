//! # Gridmud - a multi-session MUD server on a coordinate grid
//!
//! Players connect over plain TCP, log in, walk a persistent graph of rooms
//! and, in build mode, dig new rooms and edit their text while others are
//! moving through the same world.
//!
//! ## Features
//!
//! - **Coordinate grid**: every room sits at an integer `(x, y, z)` and has six
//!   directional exits plus any number of named ones.
//! - **Concurrent world**: reentrant, token-owned async locks per room and per
//!   session, and a structural lock so digs and deletes never race a move.
//! - **Session modes**: login, play, build and a line editor, each a variant of
//!   [`mud::Mode`] with its own command table.
//! - **Persistence**: rooms and players are JSON files written atomically under
//!   an exclusive file lock; passwords are Argon2id hashes.
//! - **Reconnection**: logging in as a live character takes over that session.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridmud::config::Config;
//! use gridmud::mud::MudServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut server = MudServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`lock`] - reentrant async identity lock
//! - [`world`] - rooms, the registry, the store and the map
//! - [`mud`] - sessions, modes, commands and the TCP server
//! - [`config`] - TOML configuration
//! - [`color`] - `{x`-style color codes
//! - [`validation`] - name and password rules
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   MudServer     │ ← accept loop, one session per connection
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Session / Mode  │ ← turn loop, per-mode command tables
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  World / Room   │ ← exit graph, locks, registry
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   WorldStore    │ ← JSON files, Argon2
//! └─────────────────┘
//! ```

pub mod color;
pub mod config;
pub mod lock;
pub mod logutil;
pub mod mud;
pub mod validation;
pub mod world;
