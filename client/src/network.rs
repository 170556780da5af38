//! Connection to a game server: handshake, listener task, outgoing
//! requests.
//!
//! The listener task runs the same framing state machine as the
//! server's receive tasks, with the client-side dispatch table: player
//! snapshots upsert the local list, map chunks merge into the local
//! field (unless the map is owned directly via a listen-server join),
//! and a late `ServerFull` is fatal.

use crate::game::ClientWorld;
use log::{debug, info, warn};
use shared::framing::{
    encode_frame, is_disconnect_error, is_transient_error, FrameDecoder,
};
use shared::{DecodeError, HeightField, MapSize, Packet, Player, Vec2};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSIENT_RETRY: Duration = Duration::from_millis(5);
const MAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a join attempt failed.
#[derive(Debug)]
pub enum JoinError {
    /// The server answered the handshake with `ServerFull`.
    ServerFull,
    /// The connection closed before the handshake finished.
    ConnectionClosed,
    /// No handshake response within the allowed time.
    Timeout,
    /// The server sent something unrecoverable during the handshake.
    Protocol(DecodeError),
    Io(io::Error),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::ServerFull => write!(f, "server is full"),
            JoinError::ConnectionClosed => write!(f, "connection closed during handshake"),
            JoinError::Timeout => write!(f, "handshake timed out"),
            JoinError::Protocol(e) => write!(f, "protocol error during handshake: {}", e),
            JoinError::Io(e) => write!(f, "connection failed: {}", e),
        }
    }
}

impl std::error::Error for JoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JoinError::Protocol(e) => Some(e),
            JoinError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A joined connection to a server.
pub struct Client {
    writer: OwnedWriteHalf,
    map_size: MapSize,
    world: Arc<RwLock<ClientWorld>>,
    connected: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    listener: JoinHandle<()>,
}

impl Client {
    /// Remote join: connect, handshake, then rebuild the map from the
    /// chunks the server streams over.
    pub async fn connect(addr: &str, nickname: &str) -> Result<Self, JoinError> {
        Self::join(addr, nickname, None).await
    }

    /// Listen-server join: client and server share a process, so the
    /// height field is taken directly and the wire only carries player
    /// state and move requests.
    pub async fn connect_local(
        addr: &str,
        nickname: &str,
        field: Arc<HeightField>,
    ) -> Result<Self, JoinError> {
        Self::join(addr, nickname, Some(field)).await
    }

    async fn join(
        addr: &str,
        nickname: &str,
        local_field: Option<Arc<HeightField>>,
    ) -> Result<Self, JoinError> {
        info!("Connecting to {}...", addr);
        let stream = TcpStream::connect(addr).await.map_err(JoinError::Io)?;
        let (mut reader, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &Packet::ConnectRequest {
                nickname: nickname.to_string(),
            },
        )
        .await
        .map_err(JoinError::Io)?;

        // Player-state broadcasts can arrive ahead of the acceptance;
        // keep them rather than drop them on the floor.
        let mut decoder = FrameDecoder::new();
        let mut early_players = Vec::new();
        let map_size = timeout(
            HANDSHAKE_TIMEOUT,
            await_acceptance(&mut reader, &mut decoder, &mut early_players),
        )
        .await
        .map_err(|_| JoinError::Timeout)??;

        info!(
            "Joined as {}: map is {}x{}",
            nickname, map_size.width, map_size.height
        );

        let mut world = match local_field {
            Some(field) => ClientWorld::local(field),
            None => ClientWorld::remote(map_size),
        };
        for player in early_players {
            world.upsert_player(player);
        }

        let world = Arc::new(RwLock::new(world));
        let connected = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(true);
        let listener = tokio::spawn(run_listener(
            reader,
            decoder,
            Arc::clone(&world),
            shutdown_rx,
            Arc::clone(&connected),
        ));

        Ok(Self {
            writer,
            map_size,
            world,
            connected,
            shutdown_tx,
            listener,
        })
    }

    pub fn map_size(&self) -> MapSize {
        self.map_size
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Snapshot of the players the server has reported so far.
    pub async fn players(&self) -> Vec<Player> {
        self.world.read().await.players().to_vec()
    }

    pub async fn map_complete(&self) -> bool {
        self.world.read().await.map_complete()
    }

    pub async fn map_samples_filled(&self) -> usize {
        self.world.read().await.map_samples_filled()
    }

    /// Copy of the current local height field.
    pub async fn height_field(&self) -> HeightField {
        self.world.read().await.height_field().clone()
    }

    /// Asks the server to stream every map chunk.
    pub async fn request_map_data(&mut self) -> io::Result<()> {
        write_frame(&mut self.writer, &Packet::MapDataRequest).await
    }

    /// Asks the server to move this client's player.
    pub async fn send_move(&mut self, position: Vec2) -> io::Result<()> {
        write_frame(&mut self.writer, &Packet::MovePlayer { position }).await
    }

    /// Polls until the local map is fully reassembled or `limit`
    /// elapses. Returns whether the map completed.
    pub async fn wait_for_map(&self, limit: Duration) -> bool {
        let poll = async {
            while !self.map_complete().await {
                sleep(MAP_POLL_INTERVAL).await;
            }
        };
        timeout(limit, poll).await.is_ok()
    }

    /// Signals the listener task and waits for it to exit.
    pub async fn disconnect(self) {
        let _ = self.shutdown_tx.send(false);
        let _ = self.listener.await;
    }
}

/// Reads frames until the handshake resolves one way or the other.
async fn await_acceptance(
    reader: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    early_players: &mut Vec<Player>,
) -> Result<MapSize, JoinError> {
    let mut buf = [0u8; 4096];
    loop {
        loop {
            match decoder.try_next() {
                Ok(Some(Packet::ConnectAccepted { map_size })) => return Ok(map_size),
                Ok(Some(Packet::ServerFull)) => return Err(JoinError::ServerFull),
                Ok(Some(Packet::PlayerState(player))) => early_players.push(player),
                Ok(Some(other)) => {
                    debug!("Ignoring packet (tag {}) during handshake", other.tag())
                }
                Ok(None) => break,
                Err(e @ DecodeError::FrameTooLarge(_)) => return Err(JoinError::Protocol(e)),
                Err(e) => warn!("Dropping bad frame during handshake: {}", e),
            }
        }
        match reader.read(&mut buf).await {
            Ok(0) => return Err(JoinError::ConnectionClosed),
            Ok(n) => decoder.extend(&buf[..n]),
            Err(e) if is_transient_error(&e) => sleep(TRANSIENT_RETRY).await,
            Err(e) => return Err(JoinError::Io(e)),
        }
    }
}

async fn run_listener(
    mut reader: OwnedReadHalf,
    mut decoder: FrameDecoder,
    world: Arc<RwLock<ClientWorld>>,
    mut shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 4096];

    'conn: loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || !*shutdown.borrow() {
                    break 'conn;
                }
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Server closed the connection");
                    break 'conn;
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    loop {
                        match decoder.try_next() {
                            Ok(Some(packet)) => {
                                if !handle_packet(&world, packet).await {
                                    break 'conn;
                                }
                            }
                            Ok(None) => break,
                            Err(DecodeError::FrameTooLarge(len)) => {
                                warn!("Desynchronized stream (frame of {} bytes)", len);
                                break 'conn;
                            }
                            Err(e) => warn!("Dropping bad frame: {}", e),
                        }
                    }
                }
                Err(e) if is_transient_error(&e) => sleep(TRANSIENT_RETRY).await,
                Err(e) => {
                    if is_disconnect_error(&e) {
                        info!("Disconnected: {}", e);
                    } else {
                        warn!("Read failed: {}", e);
                    }
                    break 'conn;
                }
            }
        }
    }

    connected.store(false, Ordering::Release);
}

/// Client-side dispatch. Returns false when the connection is over.
async fn handle_packet(world: &Arc<RwLock<ClientWorld>>, packet: Packet) -> bool {
    match packet {
        Packet::PlayerState(player) => {
            world.write().await.upsert_player(player);
            true
        }
        Packet::MapChunk(chunk) => {
            world.write().await.apply_chunk(&chunk);
            true
        }
        Packet::ServerFull => {
            warn!("Server reported full; dropping connection");
            false
        }
        other => {
            debug!("Ignoring unexpected packet (tag {})", other.tag());
            true
        }
    }
}

/// Writes one framed packet, retrying transient errors.
async fn write_frame(writer: &mut OwnedWriteHalf, packet: &Packet) -> io::Result<()> {
    let frame =
        encode_frame(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    loop {
        match writer.write_all(&frame).await {
            Ok(()) => return Ok(()),
            Err(e) if is_transient_error(&e) => sleep(TRANSIENT_RETRY).await,
            Err(e) => return Err(e),
        }
    }
}
