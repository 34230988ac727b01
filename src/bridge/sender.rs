//! Outbound worker: readiness handshake, then fixed-cadence streaming

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::protocol::{decode_inbound, encode, BridgeMsg, Inbound, MAX_DATAGRAM};

use super::link::SharedStats;
use super::queue::OutboundQueue;
use super::shutdown::Shutdown;

/// Sender state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderPhase {
    /// Pinging the consumer until it answers pong/ready
    Handshaking,
    /// Draining the outbound queue
    Streaming,
    /// Terminal
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    tick_interval: Duration,
    handshake_interval: Duration,
    handshake_timeout: Duration,
    send_backoff: Duration,
}

pub(crate) struct Sender {
    /// Connected to the remote consumer
    socket: UdpSocket,
    remote: SocketAddr,
    queue: Arc<OutboundQueue>,
    shutdown: Shutdown,
    phase: watch::Sender<SenderPhase>,
    stats: SharedStats,
    timings: Timings,
}

impl Sender {
    pub(crate) fn new(
        socket: UdpSocket,
        remote: SocketAddr,
        queue: Arc<OutboundQueue>,
        shutdown: Shutdown,
        phase: watch::Sender<SenderPhase>,
        stats: SharedStats,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            socket,
            remote,
            queue,
            shutdown,
            phase,
            stats,
            timings: Timings {
                tick_interval: config.tick_interval,
                handshake_interval: config.handshake_interval,
                handshake_timeout: config.handshake_timeout,
                send_backoff: config.send_backoff,
            },
        }
    }

    pub(crate) async fn run(self) {
        info!(remote = %self.remote, "Sender waiting for consumer handshake");

        if self.handshake().await {
            let stale = self.queue.clear();
            if stale > 0 {
                self.stats.lock().stale_drops += stale as u64;
                debug!(stale, "Discarded updates queued during handshake");
            }
            self.phase.send_replace(SenderPhase::Streaming);
            info!(remote = %self.remote, "Consumer ready, streaming updates");
            self.stream().await;
        }

        self.phase.send_replace(SenderPhase::Stopped);
        let stats = self.stats.lock().clone();
        info!(
            sent = stats.messages_sent,
            bytes = stats.bytes_sent,
            errors = stats.send_errors,
            "Sender stopped"
        );
    }

    /// Ping until a pong/ready arrives. False if stopped first.
    async fn handshake(&self) -> bool {
        let ping = match encode(&BridgeMsg::Ping) {
            Ok(ping) => ping,
            Err(e) => {
                warn!(error = %e, "Failed to encode ping");
                return false;
            }
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut attempts: u32 = 0;

        while !self.shutdown.is_triggered() {
            attempts += 1;
            if let Err(e) = self.socket.send(&ping).await {
                debug!(error = %e, attempts, "Ping failed");
            }

            let recv = timeout(self.timings.handshake_timeout, self.socket.recv(&mut buf));
            let reply = tokio::select! {
                reply = recv => reply,
                _ = self.shutdown.wait() => return false,
            };

            match reply {
                Ok(Ok(len)) => match decode_inbound(&buf[..len]) {
                    Ok(Inbound::Control(control)) if control.is_ready_signal() => {
                        info!(attempts, "Handshake complete");
                        return true;
                    }
                    Ok(other) => debug!(?other, "Ignoring non-ready reply during handshake"),
                    Err(e) => debug!(error = %e, "Ignoring malformed handshake reply"),
                },
                // nobody bound on the remote port yet
                Ok(Err(e)) => trace!(error = %e, "Handshake receive failed"),
                Err(_) => trace!(attempts, "No reply to ping"),
            }

            if !self.shutdown.pause(self.timings.handshake_interval).await {
                return false;
            }
        }

        false
    }

    async fn stream(&self) {
        while !self.shutdown.is_triggered() {
            let next = tokio::select! {
                next = self.queue.dequeue_or_wait(self.timings.tick_interval) => next,
                _ = self.shutdown.wait() => break,
            };
            let Some(msg) = next else {
                continue;
            };

            match self.socket.send(msg.payload()).await {
                Ok(len) => {
                    self.stats.lock().record_sent(len);
                    trace!(bytes = len, "Update sent");
                }
                Err(e) => {
                    self.stats.lock().send_errors += 1;
                    warn!(error = %e, remote = %self.remote, "Failed to send update, backing off");
                    if !self.shutdown.pause(self.timings.send_backoff).await {
                        break;
                    }
                }
            }
        }
    }
}
