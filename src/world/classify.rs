//! Hitbox classification
//!
//! Maps a collision volume onto one semantic category. Categories overlap in
//! practice (most enemies both hurt the player and carry a health manager),
//! so the rules are checked in a fixed order and the first match wins.

use serde::{Deserialize, Serialize};

use super::CollisionVolume;

/// Physics layer the host reserves for level geometry
pub const TERRAIN_LAYER: u32 = 8;

/// Depth at and above which a category is left out of snapshots
pub const EXCLUDED_DEPTH: u8 = 8;

/// Semantic label for a collision volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitboxCategory {
    #[serde(rename = "Knight")]
    Player,
    Enemy,
    Attack,
    Terrain,
    Trigger,
    Breakable,
    Gate,
    HazardRespawn,
    Other,
    None,
}

impl HitboxCategory {
    /// Priority depth, 0 is the most specific
    pub fn depth(self) -> u8 {
        match self {
            Self::Player => 0,
            Self::Enemy => 1,
            Self::Attack => 2,
            Self::Terrain => 3,
            Self::Trigger => 4,
            Self::Breakable => 5,
            Self::Gate => 6,
            Self::HazardRespawn => 7,
            Self::Other => 8,
            Self::None => 9,
        }
    }

    /// Whether volumes of this category make it into a snapshot
    pub fn is_reported(self) -> bool {
        self.depth() < EXCLUDED_DEPTH
    }
}

/// Classify a volume. A missing volume is [`HitboxCategory::None`].
pub fn classify(volume: Option<&CollisionVolume>) -> HitboxCategory {
    match volume {
        Some(volume) => classify_volume(volume),
        None => HitboxCategory::None,
    }
}

fn classify_volume(volume: &CollisionVolume) -> HitboxCategory {
    if !volume.shape.is_supported() {
        return HitboxCategory::None;
    }

    let caps = &volume.caps;

    if caps.damages_player {
        return HitboxCategory::Enemy;
    }
    if caps.health_manager {
        return HitboxCategory::Other;
    }
    if volume.layer == TERRAIN_LAYER {
        let name_breaks = volume.name.contains("Breakable") || volume.name.contains("Collapse");
        return if name_breaks || caps.breakable {
            HitboxCategory::Breakable
        } else {
            HitboxCategory::Terrain
        };
    }
    if caps.player_body && !volume.is_trigger {
        return HitboxCategory::Player;
    }
    if caps.damages_enemies || (volume.name == "Damager" && caps.damage_fsm) {
        return HitboxCategory::Attack;
    }
    if volume.is_trigger && caps.hazard_respawn {
        return HitboxCategory::HazardRespawn;
    }
    if volume.is_trigger && caps.transition_gate {
        return HitboxCategory::Gate;
    }
    if caps.breakable {
        return if caps.bouncer_active {
            HitboxCategory::None
        } else {
            HitboxCategory::Trigger
        };
    }

    HitboxCategory::Other
}
