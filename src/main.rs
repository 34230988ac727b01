//! HK Bridge - state synchronization between a platformer and an external agent
//!
//! Runs one of two roles:
//! - `demo`: a synthetic world driven through the bridge at a fixed frame rate
//! - `peer`: the external consumer, answering the handshake and logging updates

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hk_bridge::config::{Config, Role};
use hk_bridge::demo::DemoWorld;
use hk_bridge::peer::{Peer, PeerEvent};
use hk_bridge::protocol::BridgeMsg;
use hk_bridge::Bridge;

/// Host frame rate of the demo world
const DEMO_FPS: u64 = 60;
const DEMO_SEED: u64 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let mut config = Config::from_env()?;
    if let Some(role) = std::env::args().nth(1) {
        config.role = role.parse()?;
    }

    init_tracing(&config.log_level);

    info!(role = ?config.role, "Starting HK Bridge");

    match config.role {
        Role::Demo => run_demo(config).await,
        Role::Peer => run_peer(config).await,
    }
}

/// Drive a demo world through the bridge until a shutdown signal
async fn run_demo(config: Config) -> anyhow::Result<()> {
    let (bridge, mut link) = Bridge::start(config.bridge.clone()).await?;
    let mut world = DemoWorld::new(DEMO_SEED);

    info!(
        mode = ?config.bridge.mode,
        remote = ?bridge.remote_addr(),
        listen = ?bridge.listen_addr(),
        seed = world.seed(),
        "Demo world running"
    );

    let mut frames = tokio::time::interval(Duration::from_millis(1000 / DEMO_FPS));
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = Instant::now();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                let now = Instant::now();
                let dt = now - last;
                last = now;

                world.step(dt);
                let report = link.tick(&mut world, dt);
                if report.requests > 0 {
                    debug!(requests = report.requests, "Serviced bridge requests");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    let stats = bridge.stats();
    info!(
        sent = stats.messages_sent,
        bytes = stats.bytes_sent,
        avg_bytes = stats.avg_message_bytes,
        overflow_drops = stats.overflow_drops,
        oversize_drops = stats.oversize_drops,
        stale_drops = stats.stale_drops,
        "Stopping bridge"
    );
    bridge.stop().await;

    info!("Demo shutdown complete");
    Ok(())
}

/// Consume a bridge stream until a shutdown signal
async fn run_peer(config: Config) -> anyhow::Result<()> {
    let (peer, mut events) = Peer::bind(&config.peer).await?;
    info!(
        local = %peer.local_addr()?,
        bridge = ?config.peer.bridge_addr,
        record = ?config.peer.record_path,
        "Peer ready"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let can_query = config.peer.bridge_addr.is_some();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_peer_event(&peer, event, can_query).await,
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    let updates = peer.stop().await;
    info!(updates, "Peer shutdown complete");
    Ok(())
}

async fn handle_peer_event(peer: &Peer, event: PeerEvent, can_query: bool) {
    match event {
        PeerEvent::Connected(from) => {
            info!(bridge = %from, "Bridge handshake answered");
            if can_query {
                if let Err(e) = peer.request_state().await {
                    warn!(error = %e, "Failed to request state");
                }
            }
        }
        PeerEvent::Update(state) => {
            debug!(
                health = state.player_health.current,
                x = state.player_position.x,
                y = state.player_position.y,
                hitboxes = state.hitboxes.len(),
                enemies = state.enemies.len(),
                "Update"
            );
            if let Some(error) = &state.error {
                warn!(error = %error, "Bridge reported a partial snapshot");
            }
        }
        PeerEvent::Reply(BridgeMsg::Error { message, size }) => {
            warn!(message = %message, size = ?size, "Bridge error reply");
        }
        PeerEvent::Reply(reply) => info!(?reply, "Bridge reply"),
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
