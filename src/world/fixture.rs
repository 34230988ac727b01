//! Fixed-data world for tests

use std::sync::Arc;

use parking_lot::Mutex;

use super::{CollisionVolume, HealthEntity, InputAxes, PlayerVitals, WorldError, WorldStateProvider};

/// What the bridge did to a [`FixtureWorld`], readable from another task
#[derive(Debug, Default)]
pub struct Effects {
    pub inputs: Vec<InputAxes>,
    pub resets: usize,
}

#[derive(Debug, Default)]
pub struct FixtureWorld {
    pub vitals: Option<PlayerVitals>,
    pub position: Option<(f64, f64)>,
    pub volumes: Vec<CollisionVolume>,
    pub entities: Vec<HealthEntity>,
    pub volume_error: Option<WorldError>,
    pub entity_error: Option<WorldError>,
    pub reset_error: Option<WorldError>,
    pub in_menu: bool,
    pub effects: Arc<Mutex<Effects>>,
}

impl FixtureWorld {
    pub fn with_player(vitals: PlayerVitals, position: (f64, f64)) -> Self {
        Self {
            vitals: Some(vitals),
            position: Some(position),
            ..Default::default()
        }
    }
}

impl WorldStateProvider for FixtureWorld {
    fn player_vitals(&self) -> Option<PlayerVitals> {
        self.vitals
    }

    fn player_position(&self) -> Option<(f64, f64)> {
        self.position
    }

    fn collision_volumes(&self) -> Result<Vec<CollisionVolume>, WorldError> {
        match &self.volume_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.volumes.clone()),
        }
    }

    fn health_entities(&self) -> Result<Vec<HealthEntity>, WorldError> {
        match &self.entity_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.entities.clone()),
        }
    }

    fn is_gameplay(&self) -> bool {
        !self.in_menu
    }

    fn apply_input(&mut self, axes: InputAxes) -> Result<(), WorldError> {
        self.effects.lock().inputs.push(axes);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), WorldError> {
        if let Some(e) = &self.reset_error {
            return Err(e.clone());
        }
        self.effects.lock().resets += 1;
        Ok(())
    }
}
