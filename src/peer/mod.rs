//! Consumer end of the bridge
//!
//! Stands in for the external agent process: answers the readiness
//! handshake, decodes the update stream, and sends commands and control
//! queries back to the bridge listener.

pub mod recorder;

pub use recorder::{read_recording, RecordedFrame, Recorder};

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::Shutdown;
use crate::config::PeerConfig;
use crate::protocol::{decode_bridge_msg, encode, BridgeMsg, PeerMsg, ProtocolError};
use crate::world::{Command, WorldSnapshot};

/// Buffered events before the consumer starts missing updates
const EVENT_CHANNEL: usize = 256;
const RECV_BUFFER: usize = 64 * 1024;
/// Pause after a failed receive (ICMP resets surface here on some platforms)
const RECV_BACKOFF: Duration = Duration::from_millis(200);

/// Something the bridge sent us
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// First ping from a bridge, answered with pong
    Connected(SocketAddr),
    /// Streamed world state
    Update(WorldSnapshot),
    /// Answer to a control query (reset_done, state, error)
    Reply(BridgeMsg),
}

/// Handle to a running consumer
pub struct Peer {
    socket: Arc<UdpSocket>,
    bridge_addr: Option<SocketAddr>,
    shutdown: Shutdown,
    task: JoinHandle<u64>,
}

impl Peer {
    /// Bind and start answering the bridge
    pub async fn bind(config: &PeerConfig) -> Result<(Self, mpsc::Receiver<PeerEvent>), PeerError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| PeerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let socket = Arc::new(socket);

        let recorder = match &config.record_path {
            Some(path) => Some(Recorder::create(path)?),
            None => None,
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL);
        let shutdown = Shutdown::new();
        let task = tokio::spawn(receive_loop(
            socket.clone(),
            events_tx,
            recorder,
            shutdown.clone(),
        ));

        info!(local = ?socket.local_addr().ok(), "Peer listening for bridge");

        let peer = Self {
            socket,
            bridge_addr: config.bridge_addr,
            shutdown,
            task,
        };
        Ok((peer, events_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PeerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Point commands and queries at a bridge listener
    pub fn set_bridge_addr(&mut self, addr: SocketAddr) {
        self.bridge_addr = Some(addr);
    }

    pub async fn send_command(&self, cmd: &Command) -> Result<(), PeerError> {
        self.send(&encode(cmd)?).await
    }

    pub async fn request_reset(&self) -> Result<(), PeerError> {
        self.send(&encode(&PeerMsg::Reset)?).await
    }

    pub async fn request_state(&self) -> Result<(), PeerError> {
        self.send(&encode(&PeerMsg::GetState)?).await
    }

    async fn send(&self, payload: &[u8]) -> Result<(), PeerError> {
        let addr = self.bridge_addr.ok_or(PeerError::NoBridgeAddr)?;
        self.socket.send_to(payload, addr).await?;
        Ok(())
    }

    /// Stop receiving; returns the number of updates seen
    pub async fn stop(self) -> u64 {
        self.shutdown.trigger();
        match self.task.await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Peer task ended abnormally");
                0
            }
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    events: mpsc::Sender<PeerEvent>,
    mut recorder: Option<Recorder>,
    shutdown: Shutdown,
) -> u64 {
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut bridges = HashSet::new();
    let mut updates = 0u64;
    let pong = match encode(&PeerMsg::Pong) {
        Ok(pong) => pong,
        Err(e) => {
            warn!(error = %e, "Failed to encode pong");
            return 0;
        }
    };

    while !shutdown.is_triggered() {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => received,
            _ = shutdown.wait() => break,
        };
        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                if !recv_backoff(&shutdown, &e).await {
                    break;
                }
                continue;
            }
        };

        let msg = match decode_bridge_msg(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(from = %from, error = %e, "Discarding malformed bridge message");
                continue;
            }
        };

        let event = match msg {
            BridgeMsg::Ping => {
                if let Err(e) = socket.send_to(&pong, from).await {
                    warn!(to = %from, error = %e, "Failed to answer ping");
                    continue;
                }
                if !bridges.insert(from) {
                    continue;
                }
                info!(bridge = %from, "Bridge connected");
                PeerEvent::Connected(from)
            }
            BridgeMsg::FullUpdate { state } => {
                updates += 1;
                if let Some(rec) = recorder.as_mut() {
                    if let Err(e) = rec.record(&state) {
                        warn!(error = %e, "Recording failed, disabling recorder");
                        recorder = None;
                    }
                }
                PeerEvent::Update(state)
            }
            reply => PeerEvent::Reply(reply),
        };

        if events.try_send(event).is_err() {
            debug!("Event consumer lagging, dropping event");
        }
    }

    updates
}

/// Back off after a receive error; false once shutdown was requested
async fn recv_backoff(shutdown: &Shutdown, error: &std::io::Error) -> bool {
    debug!(error = %error, "Peer receive failed, backing off");
    shutdown.pause(RECV_BACKOFF).await
}

/// Peer errors
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("No bridge address configured")]
    NoBridgeAddr,

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Recording error: {0}")]
    Record(#[source] std::io::Error),

    #[error("Corrupt recording at line {line}: {source}")]
    CorruptRecording {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
