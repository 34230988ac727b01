//! HK Bridge - live state synchronization between a 2D platformer and an external agent
//!
//! The bridge runs inside the game's frame loop and handles:
//! - Classifying collision volumes into semantic hitbox categories
//! - Building bounded world snapshots once per streaming tick
//! - Streaming snapshots over UDP after a ping/pong readiness handshake
//! - Accepting movement/jump/attack commands and reset/state queries back

pub mod bridge;
pub mod config;
pub mod demo;
pub mod peer;
pub mod protocol;
pub mod util;
pub mod world;

pub use bridge::{Bridge, BridgeError, SenderPhase, SimulationLink};
pub use config::{BridgeConfig, BridgeMode, Config, ConfigError};
pub use world::{
    classify, Command, HitboxCategory, InputAxes, SnapshotBuilder, WorldSnapshot,
    WorldStateProvider,
};
