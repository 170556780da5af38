//! Server bind, accept loop and shutdown protocol.
//!
//! The accept loop is the single writer of the connection registry;
//! shutdown code is its only other reader. Shutdown is explicit: flip
//! the running flag, stop accepting, then join every connection's task
//! pair in registry order.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::world::{prepare_map, WorldState};
use log::{debug, info, warn};
use shared::MapSize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The listening server, bound but not yet serving.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    world: Arc<WorldState>,
}

impl Server {
    /// Binds the listening socket and creates the world state. The
    /// map generation pass starts when [`spawn`](Server::spawn) is
    /// called, not here.
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let world = Arc::new(WorldState::new(config.max_players));
        Ok(Self {
            listener,
            config,
            world,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> Arc<WorldState> {
        Arc::clone(&self.world)
    }

    /// Starts the generation pass and the accept loop, returning a
    /// handle used to shut the server down.
    pub fn spawn(self) -> ServerHandle {
        let Server {
            listener,
            config,
            world,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(true);

        tokio::spawn(prepare_map(
            Arc::clone(&world),
            config.terrain.clone(),
            config.budget,
            config.workers,
        ));

        let addr = listener.local_addr().ok();
        let accept_world = Arc::clone(&world);
        let join = tokio::spawn(accept_loop(listener, config, accept_world, shutdown_rx));

        ServerHandle {
            shutdown: shutdown_tx,
            join,
            addr,
            world,
        }
    }
}

/// Control handle for a running server.
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    addr: Option<SocketAddr>,
    world: Arc<WorldState>,
}

impl ServerHandle {
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn world(&self) -> Arc<WorldState> {
        Arc::clone(&self.world)
    }

    /// Flips the running flag and waits for the accept loop, which in
    /// turn joins every connection task before returning.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(false);
        let _ = self.join.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    world: Arc<WorldState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let map_size = MapSize::new(
        config.terrain.width as u32,
        config.terrain.height as u32,
    );
    let mut connections: Vec<Connection> = Vec::new();
    let mut next_conn_id: u64 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || !*shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Connection {} accepted from {}", next_conn_id, peer);
                    connections.push(Connection::spawn(
                        next_conn_id,
                        stream,
                        peer,
                        Arc::clone(&world),
                        map_size,
                        config.broadcast_interval,
                        shutdown.clone(),
                    ));
                    next_conn_id += 1;

                    // Reap entries whose tasks have both finished so the
                    // registry stays append-mostly but bounded.
                    connections.retain(|conn| !conn.is_finished());
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    info!(
        "Server stopping; closing {} connection(s)",
        connections.len()
    );
    for connection in connections {
        debug!("Closing connection {} ({})", connection.id, connection.peer);
        connection.close().await;
    }
    info!("Server stopped");
}
