//! Inbound worker: agent commands and control queries

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::protocol::{decode_inbound, encode_reply, BridgeMsg, Control, Inbound, StateReply};
use crate::util::rate_limit::CommandRateLimiter;
use crate::world::Command;

use super::link::SimRequest;
use super::shutdown::Shutdown;

/// Receive buffer, large enough for any UDP payload
const RECV_BUFFER: usize = 64 * 1024;

pub(crate) struct Listener {
    socket: UdpSocket,
    requests: mpsc::Sender<SimRequest>,
    shutdown: Shutdown,
    limiter: CommandRateLimiter,
    request_timeout: Duration,
    backoff: Duration,
}

impl Listener {
    pub(crate) fn new(
        socket: UdpSocket,
        requests: mpsc::Sender<SimRequest>,
        shutdown: Shutdown,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            socket,
            requests,
            shutdown,
            limiter: CommandRateLimiter::new(config.command_rate_limit),
            request_timeout: config.request_timeout,
            backoff: config.send_backoff,
        }
    }

    pub(crate) async fn run(self) {
        if let Ok(local) = self.socket.local_addr() {
            info!(local = %local, "Listener accepting commands");
        }
        let mut buf = vec![0u8; RECV_BUFFER];

        while !self.shutdown.is_triggered() {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received,
                _ = self.shutdown.wait() => break,
            };

            match received {
                Ok((len, from)) => self.handle(&buf[..len], from).await,
                Err(e) => {
                    warn!(error = %e, "Listener receive failed, backing off");
                    if !self.shutdown.pause(self.backoff).await {
                        break;
                    }
                }
            }
        }

        info!("Listener stopped");
    }

    /// One datagram. Failures are logged and the message discarded.
    async fn handle(&self, payload: &[u8], from: SocketAddr) {
        let inbound = match decode_inbound(payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(from = %from, error = %e, "Discarding malformed message");
                return;
            }
        };

        match inbound {
            Inbound::Command(cmd) => self.forward_command(cmd, from),
            Inbound::Control(Control::Reset) => {
                debug!(from = %from, "Handling reset request");
                let reply = self.reset().await;
                self.reply(&reply, from).await;
            }
            Inbound::Control(Control::GetState) => {
                debug!(from = %from, "Handling get_state request");
                let reply = self.get_state().await;
                self.reply(&reply, from).await;
            }
            Inbound::Control(other) => {
                debug!(from = %from, control = ?other, "Ignoring control message");
            }
        }
    }

    fn forward_command(&self, cmd: Command, from: SocketAddr) {
        if !self.limiter.check() {
            warn!(from = %from, "Rate limited command");
            return;
        }

        match self.requests.try_send(SimRequest::Command(cmd)) {
            Ok(()) => trace!(from = %from, ?cmd, "Command forwarded"),
            Err(e) => warn!(error = %e, "Simulation not draining requests, dropping command"),
        }
    }

    async fn reset(&self) -> BridgeMsg {
        let (reply, rx) = oneshot::channel();
        if self.requests.try_send(SimRequest::Reset { reply }).is_err() {
            return unavailable();
        }

        match self.await_sim(rx).await {
            Some(Ok(())) => BridgeMsg::ResetDone,
            Some(Err(e)) => BridgeMsg::Error {
                message: format!("Reset failed: {}", e),
                size: None,
            },
            None => unavailable(),
        }
    }

    async fn get_state(&self) -> BridgeMsg {
        let (reply, rx) = oneshot::channel();
        let snapshot = if self.requests.try_send(SimRequest::Snapshot { reply }).is_ok() {
            self.await_sim(rx).await
        } else {
            None
        };

        match snapshot {
            Some(snapshot) => BridgeMsg::State(StateReply::Snapshot(snapshot)),
            None => BridgeMsg::State(StateReply::Failed {
                error: "Simulation did not respond".to_string(),
            }),
        }
    }

    /// Wait for the simulation context, bounded by the request timeout
    async fn await_sim<T>(&self, rx: oneshot::Receiver<T>) -> Option<T> {
        tokio::select! {
            result = timeout(self.request_timeout, rx) => result.ok().and_then(Result::ok),
            _ = self.shutdown.wait() => None,
        }
    }

    async fn reply(&self, msg: &BridgeMsg, to: SocketAddr) {
        let bytes = encode_reply(msg);
        match self.socket.send_to(&bytes, to).await {
            Ok(len) => debug!(to = %to, bytes = len, "Sent reply"),
            Err(e) => warn!(to = %to, error = %e, "Failed to send reply"),
        }
    }
}

fn unavailable() -> BridgeMsg {
    BridgeMsg::Error {
        message: "Simulation did not respond".to_string(),
        size: None,
    }
}
