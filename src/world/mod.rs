//! World model shared between the host simulation and the bridge
//!
//! The host engine fills these types in once per tick through
//! [`WorldStateProvider`]; nothing here touches the network.

pub mod classify;
pub mod snapshot;

#[cfg(test)]
pub mod fixture;

pub use classify::{classify, HitboxCategory, TERRAIN_LAYER};
pub use snapshot::{
    Bounds, EnemyRecord, HitboxSummary, PlayerPosition, SnapshotBuilder, WorldSnapshot,
    MAX_ENEMIES, MAX_HITBOXES,
};

use serde::{Deserialize, Serialize};

/// Shape of a collision volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Box,
    Polygon,
    Edge,
    Circle,
    Capsule,
    Composite,
}

impl ShapeKind {
    /// Shapes the classifier knows how to label
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Box | Self::Polygon | Self::Edge | Self::Circle)
    }
}

/// Host-provided tags on a collision volume or its owning entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Hurts the player on contact
    pub damages_player: bool,
    /// Hurts enemies on contact (nail slashes, spells)
    pub damages_enemies: bool,
    /// Carries a damage state machine (used with entities named "Damager")
    pub damage_fsm: bool,
    pub health_manager: bool,
    pub breakable: bool,
    /// Bounce suppression present and currently active
    pub bouncer_active: bool,
    pub hazard_respawn: bool,
    pub transition_gate: bool,
    /// Belongs to the player's own body
    pub player_body: bool,
}

/// A 2D collision volume as seen by the host this tick
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionVolume {
    pub name: String,
    pub shape: ShapeKind,
    pub is_trigger: bool,
    pub layer: u32,
    /// World-space center x
    pub x: f64,
    /// World-space center y
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Inactive or destroyed volumes are skipped
    pub active: bool,
    pub caps: Capabilities,
}

impl CollisionVolume {
    /// An active box volume at the origin with no capabilities
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: ShapeKind::Box,
            is_trigger: false,
            layer: 0,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            active: true,
            caps: Capabilities::default(),
        }
    }
}

/// An entity with a health manager, as enumerated by the host
#[derive(Debug, Clone, PartialEq)]
pub struct HealthEntity {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub hp: i32,
    /// Size of the attached collision volume, if any
    pub size: Option<(f64, f64)>,
    pub active: bool,
    /// The player's own object carries a health manager in some hosts
    pub is_player: bool,
}

/// Player health as tracked by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerVitals {
    pub current: u32,
    pub max: u32,
    /// Temporary "blue" health
    pub blue: u32,
}

/// Movement/jump/attack flags sent by the agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub jump: bool,
    #[serde(default)]
    pub attack: bool,
}

/// Analog axis value for a fully pressed direction
pub const AXIS_FULL: i16 = 127;

/// Input state applied to the simulation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputAxes {
    /// -127 (left), 0, or 127 (right)
    pub horizontal: i16,
    /// 0 or 127 (jump held)
    pub vertical: i16,
    pub attack: bool,
}

impl Command {
    /// Map the boolean flags onto analog axes.
    ///
    /// Opposing directions cancel out.
    pub fn axes(&self) -> InputAxes {
        let horizontal = match (self.left, self.right) {
            (true, false) => -AXIS_FULL,
            (false, true) => AXIS_FULL,
            _ => 0,
        };

        InputAxes {
            horizontal,
            vertical: if self.jump { AXIS_FULL } else { 0 },
            attack: self.attack,
        }
    }
}

/// Host failure while enumerating or mutating the world
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct WorldError(pub String);

impl WorldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The simulation as the bridge sees it.
///
/// Only ever called from the simulation context; implementations do not
/// need to be thread-safe.
pub trait WorldStateProvider {
    /// None when the player object does not exist yet
    fn player_vitals(&self) -> Option<PlayerVitals>;

    fn player_position(&self) -> Option<(f64, f64)>;

    /// Every collision volume currently loaded, in host order
    fn collision_volumes(&self) -> Result<Vec<CollisionVolume>, WorldError>;

    /// Every entity carrying a health manager, in host order
    fn health_entities(&self) -> Result<Vec<HealthEntity>, WorldError>;

    /// Whether the game is in a state worth streaming (not menus or loads)
    fn is_gameplay(&self) -> bool {
        true
    }

    fn apply_input(&mut self, axes: InputAxes) -> Result<(), WorldError>;

    fn reset(&mut self) -> Result<(), WorldError>;
}
