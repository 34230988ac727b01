//! Network side of the bridge
//!
//! [`Bridge::start`] resolves and binds everything up front, then spawns up
//! to two independent workers:
//! - the sender (handshake, then streaming from the outbound queue)
//! - the listener (commands and control queries)
//!
//! The matching [`SimulationLink`] stays with the host frame loop.

pub mod link;
pub mod listener;
pub mod queue;
pub mod sender;
pub mod shutdown;
pub mod stats;

pub use link::{SimRequest, SimulationLink, TickReport};
pub use queue::{OutboundMessage, OutboundQueue};
pub use sender::SenderPhase;
pub use shutdown::Shutdown;
pub use stats::StreamStats;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::BridgeConfig;

use self::link::SharedStats;
use self::listener::Listener;
use self::sender::Sender;

/// Pending listener requests the simulation has not drained yet
const REQUEST_CHANNEL: usize = 64;

/// Handle to the running network workers
pub struct Bridge {
    shutdown: Shutdown,
    phase: watch::Receiver<SenderPhase>,
    stats: SharedStats,
    queue: Option<Arc<OutboundQueue>>,
    remote_addr: Option<SocketAddr>,
    listen_addr: Option<SocketAddr>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    join_timeout: Duration,
}

impl Bridge {
    /// Start the workers selected by `config.mode`.
    ///
    /// Host resolution and socket binding happen before anything is spawned,
    /// so those failures surface here.
    pub async fn start(config: BridgeConfig) -> Result<(Self, SimulationLink), BridgeError> {
        let outbound = if config.mode.streams() {
            let remote = resolve(&config.remote()).await?;
            if config.mode.listens() && targets_listener(remote, config.listen_addr) {
                return Err(BridgeError::LoopsBack {
                    remote,
                    listen: config.listen_addr,
                });
            }
            let socket = bind(unspecified_for(remote)).await?;
            socket.connect(remote).await?;
            Some((socket, remote))
        } else {
            None
        };

        let inbound = if config.mode.listens() {
            Some(bind(config.listen_addr).await?)
        } else {
            None
        };

        let shutdown = Shutdown::new();
        let stats = SharedStats::default();
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL);
        let initial_phase = if outbound.is_some() {
            SenderPhase::Handshaking
        } else {
            SenderPhase::Stopped
        };
        let (phase_tx, phase_rx) = watch::channel(initial_phase);

        let mut workers = Vec::new();
        let mut queue = None;
        let mut remote_addr = None;
        let mut listen_addr = None;

        if let Some((socket, remote)) = outbound {
            let outbound_queue = Arc::new(OutboundQueue::new(config.queue_capacity));
            let sender = Sender::new(
                socket,
                remote,
                outbound_queue.clone(),
                shutdown.clone(),
                phase_tx,
                stats.clone(),
                &config,
            );
            workers.push(("sender", tokio::spawn(sender.run())));
            queue = Some(outbound_queue);
            remote_addr = Some(remote);
        }

        if let Some(socket) = inbound {
            listen_addr = socket.local_addr().ok();
            let listener = Listener::new(socket, requests_tx, shutdown.clone(), &config);
            workers.push(("listener", tokio::spawn(listener.run())));
        }

        info!(
            mode = ?config.mode,
            remote = ?remote_addr,
            listen = ?listen_addr,
            "Bridge started"
        );

        let link = SimulationLink::new(
            requests_rx,
            queue.clone(),
            config.tick_interval,
            stats.clone(),
        );
        let bridge = Self {
            shutdown,
            phase: phase_rx,
            stats,
            queue,
            remote_addr,
            listen_addr,
            workers,
            join_timeout: config.join_timeout,
        };

        Ok((bridge, link))
    }

    pub fn phase(&self) -> SenderPhase {
        *self.phase.borrow()
    }

    /// Watch sender phase transitions
    pub fn phase_watch(&self) -> watch::Receiver<SenderPhase> {
        self.phase.clone()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.lock().clone()
    }

    /// Messages waiting for the sender
    pub fn queued(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.len())
    }

    /// Resolved remote consumer, when streaming
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Bound listener address, when listening
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Stop both workers, waiting at most the join timeout for each
    pub async fn stop(mut self) {
        self.shutdown.trigger();

        for (name, mut handle) in std::mem::take(&mut self.workers) {
            match timeout(self.join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker = name, error = %e, "Worker ended abnormally"),
                Err(_) => {
                    warn!(worker = name, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        info!("Bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn resolve(remote: &str) -> Result<SocketAddr, BridgeError> {
    let addrs: Vec<SocketAddr> = lookup_host(remote)
        .await
        .map_err(|source| BridgeError::Resolve {
            host: remote.to_string(),
            source,
        })?
        .collect();

    // localhost often resolves to ::1 first while consumers bind IPv4
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| BridgeError::NoAddress(remote.to_string()))
}

/// Whether datagrams sent to `remote` would land on our own listener
fn targets_listener(remote: SocketAddr, listen: SocketAddr) -> bool {
    remote.port() == listen.port() && (listen.ip().is_unspecified() || listen.ip() == remote.ip())
}

fn unspecified_for(remote: SocketAddr) -> SocketAddr {
    if remote.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    }
}

async fn bind(addr: SocketAddr) -> Result<UdpSocket, BridgeError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| BridgeError::Bind { addr, source })
}

/// Startup errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No address found for {0}")]
    NoAddress(String),

    #[error("Remote {remote} is this bridge's own listener {listen}; use a different port")]
    LoopsBack {
        remote: SocketAddr,
        listen: SocketAddr,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeMode;
    use crate::protocol::MAX_DATAGRAM;
    use crate::world::fixture::FixtureWorld;
    use crate::world::{CollisionVolume, PlayerVitals, TERRAIN_LAYER};
    use serde_json::{json, Value};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config(mode: BridgeMode) -> BridgeConfig {
        BridgeConfig {
            mode,
            remote_host: "127.0.0.1".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            tick_interval: Duration::from_millis(5),
            handshake_interval: Duration::from_millis(20),
            handshake_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(500),
            ..BridgeConfig::default()
        }
    }

    async fn recv_json(socket: &UdpSocket) -> (Value, SocketAddr) {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, from) = timeout(WAIT, socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        (serde_json::from_slice(&buf[..len]).unwrap(), from)
    }

    /// Tick the link on its own task, as a host frame loop would
    fn drive(mut link: SimulationLink, mut world: FixtureWorld) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                link.tick(&mut world, Duration::from_millis(5));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    async fn streaming_bridge(consumer: &UdpSocket) -> (Bridge, SimulationLink) {
        let config = BridgeConfig {
            remote_port: consumer.local_addr().unwrap().port(),
            ..fast_config(BridgeMode::Stream)
        };
        Bridge::start(config).await.unwrap()
    }

    #[tokio::test]
    async fn handshake_gates_streaming() {
        let consumer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, link) = streaming_bridge(&consumer).await;
        let world = FixtureWorld::with_player(
            PlayerVitals {
                current: 5,
                max: 9,
                blue: 1,
            },
            (10.25, -3.0),
        );
        let driver = drive(link, world);

        // updates pile up in the queue but only pings reach the wire
        let mut bridge_addr = None;
        for _ in 0..3 {
            let (msg, from) = recv_json(&consumer).await;
            assert_eq!(msg, json!({"type": "ping"}));
            bridge_addr = Some(from);
        }
        assert_eq!(bridge.phase(), SenderPhase::Handshaking);
        assert_eq!(bridge.stats().messages_sent, 0);

        consumer
            .send_to(br#"{"type":"pong"}"#, bridge_addr.unwrap())
            .await
            .unwrap();

        let mut phase = bridge.phase_watch();
        timeout(WAIT, phase.wait_for(|p| *p == SenderPhase::Streaming))
            .await
            .unwrap()
            .unwrap();

        // a ping may already have been in flight when the pong landed
        let update = loop {
            let (msg, _) = recv_json(&consumer).await;
            if msg["type"] != "ping" {
                break msg;
            }
        };
        assert_eq!(update["type"], "full_update");
        assert_eq!(
            update["state"]["player_health"],
            json!({"current": 5, "max": 9, "blue": 1})
        );

        for _ in 0..5 {
            let (msg, _) = recv_json(&consumer).await;
            assert_eq!(msg["type"], "full_update");
        }

        driver.abort();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn malformed_handshake_replies_are_ignored() {
        let consumer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, _link) = streaming_bridge(&consumer).await;

        let (_, from) = recv_json(&consumer).await;
        consumer.send_to(b"not json at all", from).await.unwrap();
        consumer.send_to(br#"{"type":"reset"}"#, from).await.unwrap();

        let (msg, _) = recv_json(&consumer).await;
        assert_eq!(msg["type"], "ping");
        assert_eq!(bridge.phase(), SenderPhase::Handshaking);

        consumer.send_to(br#"{"type":"READY"}"#, from).await.unwrap();
        let mut phase = bridge.phase_watch();
        timeout(WAIT, phase.wait_for(|p| *p == SenderPhase::Streaming))
            .await
            .unwrap()
            .unwrap();

        bridge.stop().await;
    }

    #[tokio::test]
    async fn stop_during_handshake_is_bounded() {
        // nobody listens on this port once the reserved socket is dropped
        let reserved = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);

        let config = BridgeConfig {
            remote_port: port,
            handshake_timeout: Duration::from_secs(1),
            handshake_interval: Duration::from_millis(500),
            ..fast_config(BridgeMode::Stream)
        };
        let (bridge, _link) = Bridge::start(config).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut phase = bridge.phase_watch();
        let started = Instant::now();
        bridge.stop().await;

        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(*phase.borrow_and_update(), SenderPhase::Stopped);
    }

    #[tokio::test]
    async fn unresolvable_host_fails_before_start() {
        let config = BridgeConfig {
            remote_host: "no-such-host.invalid".to_string(),
            ..fast_config(BridgeMode::Stream)
        };
        let result = timeout(Duration::from_secs(30), Bridge::start(config))
            .await
            .expect("resolution hung");
        assert!(matches!(
            result,
            Err(BridgeError::Resolve { .. }) | Err(BridgeError::NoAddress(_))
        ));
    }

    async fn listening_bridge(
        world: FixtureWorld,
    ) -> (Bridge, JoinHandle<()>, UdpSocket, SocketAddr) {
        let (bridge, link) = Bridge::start(fast_config(BridgeMode::Listen)).await.unwrap();
        assert_eq!(bridge.phase(), SenderPhase::Stopped);
        let addr = bridge.listen_addr().unwrap();
        let driver = drive(link, world);
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (bridge, driver, agent, addr)
    }

    #[tokio::test]
    async fn reset_is_acknowledged_exactly_once() {
        let world = FixtureWorld::default();
        let effects = world.effects.clone();
        let (bridge, driver, agent, addr) = listening_bridge(world).await;

        agent.send_to(br#"{"type":"reset"}"#, addr).await.unwrap();
        let (reply, _) = recv_json(&agent).await;
        assert_eq!(reply, json!({"type": "reset_done"}));

        let mut buf = [0u8; 256];
        let extra = timeout(Duration::from_millis(200), agent.recv_from(&mut buf)).await;
        assert!(extra.is_err(), "unexpected second reply");

        {
            let effects = effects.lock();
            assert_eq!(effects.resets, 1);
            assert!(effects.inputs.is_empty());
        }

        driver.abort();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn get_state_replies_with_snapshot() {
        let mut world = FixtureWorld::with_player(
            PlayerVitals {
                current: 5,
                max: 9,
                blue: 1,
            },
            (10.25, -3.0),
        );
        world.volumes = vec![CollisionVolume {
            layer: TERRAIN_LAYER,
            ..CollisionVolume::new("Floor")
        }];
        let (bridge, driver, agent, addr) = listening_bridge(world).await;

        agent.send_to(br#"{"type":"get_state"}"#, addr).await.unwrap();
        let (reply, _) = recv_json(&agent).await;

        assert_eq!(reply["type"], "state");
        assert_eq!(reply["player_health"], json!({"current": 5, "max": 9, "blue": 1}));
        assert_eq!(reply["player_position"], json!({"x": 10.25, "y": -3.0}));
        assert_eq!(reply["hitboxes"][0]["type"], "Terrain");
        assert_eq!(reply["enemies"], json!([]));

        driver.abort();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn oversized_state_becomes_error_reply() {
        let mut world = FixtureWorld::default();
        world.volumes = (0..80)
            .map(|i| CollisionVolume {
                layer: TERRAIN_LAYER,
                ..CollisionVolume::new(format!("{}{}", "v".repeat(500), i))
            })
            .collect();
        let (bridge, driver, agent, addr) = listening_bridge(world).await;

        agent.send_to(br#"{"type":"get_state"}"#, addr).await.unwrap();
        let (reply, _) = recv_json(&agent).await;

        assert_eq!(reply["type"], "error");
        assert!(reply["size"].as_u64().unwrap() > MAX_DATAGRAM as u64);

        driver.abort();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn commands_reach_the_simulation() {
        let world = FixtureWorld::default();
        let effects = world.effects.clone();
        let (bridge, driver, agent, addr) = listening_bridge(world).await;

        // a bad datagram first must not take the listener down
        agent.send_to(b"{broken", addr).await.unwrap();
        agent
            .send_to(br#"{"left":true,"right":false,"jump":true,"attack":false}"#, addr)
            .await
            .unwrap();

        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(axes) = effects.lock().inputs.first().copied() {
                assert_eq!((axes.horizontal, axes.vertical, axes.attack), (-127, 127, false));
                break;
            }
            assert!(Instant::now() < deadline, "command never applied");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        driver.abort();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn stalled_simulation_yields_state_error() {
        // link is never ticked
        let (bridge, _link) = Bridge::start(fast_config(BridgeMode::Listen)).await.unwrap();
        let addr = bridge.listen_addr().unwrap();
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        agent.send_to(br#"{"type":"get_state"}"#, addr).await.unwrap();
        let (reply, _) = recv_json(&agent).await;
        assert_eq!(
            reply,
            json!({"type": "state", "error": "Simulation did not respond"})
        );

        bridge.stop().await;
    }

    #[tokio::test]
    async fn timed_out_reset_is_never_applied() {
        let config = BridgeConfig {
            request_timeout: Duration::from_millis(100),
            ..fast_config(BridgeMode::Listen)
        };
        // link stays unticked until the agent has its answer
        let (bridge, mut link) = Bridge::start(config).await.unwrap();
        let addr = bridge.listen_addr().unwrap();
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut world = FixtureWorld::default();
        let effects = world.effects.clone();

        agent.send_to(br#"{"type":"reset"}"#, addr).await.unwrap();
        let (reply, _) = recv_json(&agent).await;
        assert_eq!(
            reply,
            json!({"type": "error", "message": "Simulation did not respond"})
        );

        let report = link.tick(&mut world, Duration::ZERO);
        assert_eq!(report.requests, 1);
        assert_eq!(effects.lock().resets, 0);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn duplex_rejects_remote_equal_to_listener() {
        let reserved = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);

        for listen in [
            SocketAddr::from(([127, 0, 0, 1], port)),
            SocketAddr::from(([0, 0, 0, 0], port)),
        ] {
            let config = BridgeConfig {
                remote_port: port,
                listen_addr: listen,
                ..fast_config(BridgeMode::Duplex)
            };
            assert!(matches!(
                Bridge::start(config).await,
                Err(BridgeError::LoopsBack { .. })
            ));
        }
    }

    #[test]
    fn listener_target_detection() {
        let remote = SocketAddr::from(([127, 0, 0, 1], 9999));
        assert!(targets_listener(remote, remote));
        assert!(targets_listener(remote, SocketAddr::from(([0, 0, 0, 0], 9999))));
        assert!(!targets_listener(remote, SocketAddr::from(([127, 0, 0, 1], 9998))));
        assert!(!targets_listener(remote, SocketAddr::from(([10, 0, 0, 1], 9999))));
        assert!(!targets_listener(remote, SocketAddr::from(([127, 0, 0, 1], 0))));
    }

    #[tokio::test]
    async fn updates_queued_while_handshaking_are_discarded() {
        let consumer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, mut link) = streaming_bridge(&consumer).await;
        let mut world = FixtureWorld::default();

        let mut phase = bridge.phase_watch();
        let transitions = tokio::spawn(async move {
            let mut seen = Vec::new();
            while phase.changed().await.is_ok() {
                seen.push(*phase.borrow_and_update());
            }
            seen
        });

        for _ in 0..10 {
            assert!(link.tick(&mut world, Duration::from_millis(5)).published);
        }
        assert_eq!(bridge.queued(), 10);

        let (_, from) = recv_json(&consumer).await;
        for _ in 0..3 {
            consumer.send_to(br#"{"type":"pong"}"#, from).await.unwrap();
        }
        let mut streaming = bridge.phase_watch();
        timeout(WAIT, streaming.wait_for(|p| *p == SenderPhase::Streaming))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bridge.queued(), 0);
        assert_eq!(bridge.stats().stale_drops, 10);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bridge.stats().messages_sent, 0);

        bridge.stop().await;
        let seen = timeout(WAIT, transitions).await.unwrap().unwrap();
        assert_eq!(seen, vec![SenderPhase::Streaming, SenderPhase::Stopped]);
    }
}
