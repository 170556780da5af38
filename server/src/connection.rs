//! Per-connection receive/send tasks and the message dispatcher.
//!
//! Each accepted socket is split into two independent tasks. The
//! receive task runs the framing state machine and dispatches every
//! decoded packet; the send task owns the write half, draining an
//! outbound queue and waking on the broadcast interval to push
//! player-state snapshots.
//!
//! Connection lifecycle: *Connecting* until a connect request is
//! accepted (tracked by the dispatcher's registered player id), *Open*
//! while both tasks run, *Closing* once the peer drops or the running
//! flag flips, *Closed* when the manager has joined both tasks. The
//! tasks end themselves in pairs: when the receive task exits its
//! queue sender drops and the send task drains out; when the send task
//! exits the receive task notices on its next queued reply.

use crate::world::WorldState;
use log::{debug, error, info, warn};
use shared::framing::{
    encode_frame, is_disconnect_error, is_transient_error, FrameDecoder,
};
use shared::{DecodeError, MapSize, Packet, Vec2, MAX_NICKNAME_LEN};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

/// Pause before retrying a transient (no data / interrupted) I/O error.
const TRANSIENT_RETRY: Duration = Duration::from_millis(5);

/// One live client connection as tracked by the manager.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub peer: SocketAddr,
    pub open: Arc<AtomicBool>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

impl Connection {
    /// Splits the stream and starts the connection's task pair.
    pub fn spawn(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        world: Arc<WorldState>,
        map_size: MapSize,
        broadcast_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let recv_task = tokio::spawn(run_receive(ReceiveTask {
            conn_id: id,
            reader,
            outbound: outbound_tx,
            world: Arc::clone(&world),
            map_size,
            player_id: None,
            shutdown: shutdown.clone(),
            open: Arc::clone(&open),
        }));
        let send_task = tokio::spawn(run_send(
            id,
            writer,
            outbound_rx,
            world,
            broadcast_interval,
            shutdown,
            Arc::clone(&open),
        ));

        Self {
            id,
            peer,
            open,
            recv_task,
            send_task,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.recv_task.is_finished() && self.send_task.is_finished()
    }

    /// Waits for both tasks to exit. Called by the manager during
    /// shutdown, after the running flag has been flipped.
    pub async fn close(self) {
        let _ = self.recv_task.await;
        let _ = self.send_task.await;
    }
}

struct ReceiveTask {
    conn_id: u64,
    reader: OwnedReadHalf,
    outbound: mpsc::UnboundedSender<Packet>,
    world: Arc<WorldState>,
    map_size: MapSize,
    /// `None` while the connection is still in the Connecting phase.
    player_id: Option<u32>,
    shutdown: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
}

async fn run_receive(mut task: ReceiveTask) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    'conn: loop {
        tokio::select! {
            changed = task.shutdown.changed() => {
                if changed.is_err() || !*task.shutdown.borrow() {
                    break 'conn;
                }
            }
            read = task.reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("Connection {}: closed by peer", task.conn_id);
                    break 'conn;
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    loop {
                        match decoder.try_next() {
                            Ok(Some(packet)) => {
                                if !task.dispatch(packet).await {
                                    break 'conn;
                                }
                            }
                            Ok(None) => break,
                            Err(DecodeError::FrameTooLarge(len)) => {
                                warn!(
                                    "Connection {}: desynchronized stream (frame of {} bytes), dropping",
                                    task.conn_id, len
                                );
                                break 'conn;
                            }
                            Err(e) => {
                                // Protocol violation: drop the frame, keep the connection.
                                warn!("Connection {}: dropping bad frame: {}", task.conn_id, e);
                            }
                        }
                    }
                }
                Err(e) if is_transient_error(&e) => sleep(TRANSIENT_RETRY).await,
                Err(e) => {
                    if is_disconnect_error(&e) {
                        debug!("Connection {}: disconnected: {}", task.conn_id, e);
                    } else {
                        warn!("Connection {}: read failed: {}", task.conn_id, e);
                    }
                    break 'conn;
                }
            }
        }
    }

    task.open.store(false, Ordering::Release);
}

impl ReceiveTask {
    /// Handles one decoded packet. Returns false when the connection
    /// should shut down (peer gone or server stopping).
    async fn dispatch(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::ConnectRequest { nickname } => self.handle_connect(nickname).await,
            Packet::MapDataRequest => self.handle_map_request().await,
            Packet::MovePlayer { position } => self.handle_move(position).await,
            other => {
                // Client-bound or reserved packets are violations here.
                warn!(
                    "Connection {}: ignoring unexpected packet (tag {})",
                    self.conn_id,
                    other.tag()
                );
                true
            }
        }
    }

    async fn handle_connect(&mut self, nickname: String) -> bool {
        if self.player_id.is_some() {
            warn!("Connection {}: duplicate connect request", self.conn_id);
            return true;
        }
        let nickname = nickname.trim();
        if nickname.is_empty() || nickname.len() > MAX_NICKNAME_LEN {
            warn!(
                "Connection {}: rejecting invalid nickname ({} bytes)",
                self.conn_id,
                nickname.len()
            );
            return true;
        }

        match self.world.try_register_player(nickname).await {
            Some(id) => {
                self.player_id = Some(id);
                info!(
                    "Connection {}: accepted as player {} ({})",
                    self.conn_id, id, nickname
                );
                self.queue(Packet::ConnectAccepted {
                    map_size: self.map_size,
                })
            }
            None => {
                info!("Connection {}: server full, refusing {}", self.conn_id, nickname);
                self.queue(Packet::ServerFull)
            }
        }
    }

    async fn handle_map_request(&mut self) -> bool {
        if self.player_id.is_none() {
            warn!(
                "Connection {}: map data requested before connect",
                self.conn_id
            );
            return true;
        }

        // Block only this connection until the map is published.
        let mut map_rx = self.world.map_watch();
        let map = tokio::select! {
            _ = self.shutdown.changed() => return false,
            ready = map_rx.wait_for(|m| m.is_some()) => match ready {
                Ok(guard) => guard.clone(),
                Err(_) => return false,
            },
        };

        if let Some(map) = map {
            debug!(
                "Connection {}: streaming {} chunks",
                self.conn_id,
                map.chunks.len()
            );
            for chunk in map.chunks.iter() {
                if !self.queue(Packet::MapChunk(chunk.clone())) {
                    return false;
                }
            }
        }
        true
    }

    async fn handle_move(&mut self, position: Vec2) -> bool {
        match self.player_id {
            Some(id) => self.world.set_player_position(id, position).await,
            None => warn!(
                "Connection {}: move request before connect",
                self.conn_id
            ),
        }
        true
    }

    /// Queues a packet for the send task. Fails only when the send
    /// task has already exited, which means the connection is dead.
    fn queue(&self, packet: Packet) -> bool {
        self.outbound.send(packet).is_ok()
    }
}

async fn run_send(
    conn_id: u64,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    world: Arc<WorldState>,
    broadcast_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
) {
    let mut ticker = interval(broadcast_interval);

    'conn: loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || !*shutdown.borrow() {
                    break 'conn;
                }
            }
            queued = outbound.recv() => match queued {
                Some(packet) => {
                    if !send_frame(&mut writer, &packet, conn_id).await {
                        break 'conn;
                    }
                }
                // Receive task is gone and the queue is drained.
                None => break 'conn,
            },
            _ = ticker.tick() => {
                for player in world.players_snapshot().await {
                    if !send_frame(&mut writer, &Packet::PlayerState(player), conn_id).await {
                        break 'conn;
                    }
                }
            }
        }
    }

    open.store(false, Ordering::Release);
}

/// Writes one framed packet, retrying transient errors. Returns false
/// on disconnect-class failures so the caller can stop the task.
async fn send_frame(writer: &mut OwnedWriteHalf, packet: &Packet, conn_id: u64) -> bool {
    let frame = match encode_frame(packet) {
        Ok(frame) => frame,
        Err(e) => {
            // Fatal to this message only; already-sent data is unaffected.
            error!("Connection {}: failed to encode packet: {}", conn_id, e);
            return true;
        }
    };

    loop {
        match writer.write_all(&frame).await {
            Ok(()) => return true,
            Err(e) if is_transient_error(&e) => sleep(TRANSIENT_RETRY).await,
            Err(e) => {
                if is_disconnect_error(&e) {
                    debug!("Connection {}: peer gone during send: {}", conn_id, e);
                } else {
                    warn!("Connection {}: send failed: {}", conn_id, e);
                }
                return false;
            }
        }
    }
}
