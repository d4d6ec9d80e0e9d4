//! TCP front end: accepts connections and gives each one a session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::session::{spawn_session_with_greeting, Session};
use crate::config::Config;
use crate::world::{World, WorldStoreBuilder};

/// How long shutdown waits for sessions to save and close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct MudServer {
    config: Config,
    world: Arc<World>,
    sessions: Vec<(Arc<Session>, JoinHandle<()>)>,
}

impl MudServer {
    /// Open the store and load the world described by `config`.
    pub async fn new(config: Config) -> Result<Self> {
        let mut builder = WorldStoreBuilder::new(&config.storage.data_dir);
        if let Some(params) = config.argon2_params() {
            builder = builder.with_argon2_params(params);
        }
        let store = builder
            .open()
            .map_err(|e| anyhow!("Failed to open data dir {}: {}", config.storage.data_dir, e))?;
        let world = Arc::new(World::new(store, config.world_settings()));
        let rooms = world.load()?;
        info!("Loaded {} rooms from {}", rooms, config.storage.data_dir);
        Ok(Self {
            config,
            world,
            sessions: Vec::new(),
        })
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        let address = self.config.server.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow!("Failed to bind {}: {}", address, e))?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accept connections on `listener` until `shutdown` resolves, then close every session.
    pub async fn serve<F>(&mut self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Connection from {}", peer);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("set_nodelay failed for {}: {}", peer, e);
                        }
                        let (reader, writer) = stream.into_split();
                        let entry = spawn_session_with_greeting(
                            self.world.clone(),
                            reader,
                            writer,
                            peer.to_string(),
                            &self.config.server.greeting,
                        )
                        .await;
                        self.sessions.retain(|(_, handle)| !handle.is_finished());
                        self.sessions.push(entry);
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("Shutting down, closing {} sessions", self.sessions.len());
        for (session, _) in &self.sessions {
            session.cancel();
        }
        for (session, handle) in self.sessions.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Session {} task failed: {}", session.id(), e),
                Err(_) => warn!("Session {} did not close in time", session.id()),
            }
        }
    }

    /// Print room, player and session counts.
    pub async fn show_status(&self) -> Result<()> {
        println!("=== Gridmud Status ===");
        println!("Data Dir: {}", self.config.storage.data_dir);
        println!("Listen Address: {}", self.config.server.address());
        println!("Rooms: {}", self.world.rooms().len());
        println!("Players: {}", self.world.store().player_count()?);
        Ok(())
    }
}
