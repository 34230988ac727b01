//! Snapshot building

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{classify, HitboxCategory, PlayerVitals, WorldStateProvider};

/// Max hitboxes per snapshot, in host enumeration order
pub const MAX_HITBOXES: usize = 80;
/// Max enemies per snapshot
pub const MAX_ENEMIES: usize = 20;

/// Round a world coordinate to two decimals for the wire
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub x: f64,
    pub y: f64,
}

/// Center and size of a hitbox in world units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A classified collision volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitboxSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub category: HitboxCategory,
    pub bounds: Bounds,
}

/// An entity with hit points, other than the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub hp: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
}

/// One tick of world state, bounded in size
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub player_health: PlayerVitals,
    pub player_position: PlayerPosition,
    pub hitboxes: Vec<HitboxSummary>,
    pub enemies: Vec<EnemyRecord>,
    /// Set when part of the world could not be read; the rest is still valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds snapshots from the host world
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    max_hitboxes: usize,
    max_enemies: usize,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(MAX_HITBOXES, MAX_ENEMIES)
    }
}

impl SnapshotBuilder {
    pub fn new(max_hitboxes: usize, max_enemies: usize) -> Self {
        Self {
            max_hitboxes,
            max_enemies,
        }
    }

    /// Build a snapshot. Never fails: missing player data reads as zero and a
    /// failed enumeration leaves its collection empty with an error marker.
    pub fn build<W: WorldStateProvider + ?Sized>(&self, world: &W) -> WorldSnapshot {
        let mut errors = Vec::new();

        let player_health = world.player_vitals().unwrap_or_default();
        let player_position = world
            .player_position()
            .map(|(x, y)| PlayerPosition {
                x: round2(x),
                y: round2(y),
            })
            .unwrap_or_default();

        let hitboxes = match world.collision_volumes() {
            Ok(volumes) => volumes
                .iter()
                .filter(|v| v.active)
                .filter_map(|v| {
                    let category = classify(Some(v));
                    category.is_reported().then(|| HitboxSummary {
                        name: v.name.clone(),
                        category,
                        bounds: Bounds {
                            x: round2(v.x),
                            y: round2(v.y),
                            w: round2(v.width),
                            h: round2(v.height),
                        },
                    })
                })
                .take(self.max_hitboxes)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate collision volumes");
                errors.push(format!("hitboxes: {}", e));
                Vec::new()
            }
        };

        let enemies = match world.health_entities() {
            Ok(entities) => entities
                .into_iter()
                .filter(|e| e.active && !e.is_player)
                .take(self.max_enemies)
                .map(|e| EnemyRecord {
                    name: e.name,
                    x: round2(e.x),
                    y: round2(e.y),
                    hp: e.hp,
                    w: e.size.map(|(w, _)| round2(w)),
                    h: e.size.map(|(_, h)| round2(h)),
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate enemies");
                errors.push(format!("enemies: {}", e));
                Vec::new()
            }
        };

        trace!(
            hitboxes = hitboxes.len(),
            enemies = enemies.len(),
            "Snapshot built"
        );

        WorldSnapshot {
            player_health,
            player_position,
            hitboxes,
            enemies,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}
