//! Synthetic platformer world
//!
//! A single-room level with a floor, walls, a breakable wall, a spike pit
//! with its hazard respawn point, a transition gate and a few wandering
//! crawlers. All randomness comes from a seeded RNG, so the same seed and
//! the same input/step sequence always produce the same world.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::world::{
    Capabilities, CollisionVolume, HealthEntity, InputAxes, PlayerVitals, WorldError,
    WorldStateProvider, AXIS_FULL, TERRAIN_LAYER,
};

const ARENA_WIDTH: f64 = 60.0;
const ARENA_HEIGHT: f64 = 12.0;
const WALL_THICKNESS: f64 = 1.0;
const FLOOR_Y: f64 = 0.0;

const PLAYER_LAYER: u32 = 9;
const ENEMY_LAYER: u32 = 11;
const PLAYER_SIZE: (f64, f64) = (0.5, 1.3);
const SPAWN_X: f64 = 3.0;
const MAX_HEALTH: u32 = 5;

const GRAVITY: f64 = -60.0;
const RUN_SPEED: f64 = 8.3;
const JUMP_SPEED: f64 = 20.0;
const INVULN_SECS: f64 = 1.3;
const SLASH_SECS: f64 = 0.25;
const SLASH_SIZE: (f64, f64) = (1.6, 1.0);

const CRAWLER_COUNT: usize = 4;
const CRAWLER_HP: i32 = 3;
const CRAWLER_SPEED: f64 = 2.5;
const CRAWLER_SIZE: (f64, f64) = (1.2, 0.8);
/// Crawlers patrol between the left wall and the breakable wall
const CRAWLER_RANGE: (f64, f64) = (6.0, 38.0);

const SPIKES: Rect = Rect::new(24.0, 0.25, 3.0, 0.5);
const HAZARD_RESPAWN: Rect = Rect::new(20.0, 1.0, 1.0, 2.0);
const BREAKABLE_WALL: Rect = Rect::new(40.0, 1.5, 1.0, 3.0);
const BREAKABLE_HP: i32 = 3;
const GATE: Rect = Rect::new(ARENA_WIDTH - 1.5, 2.0, 1.0, 4.0);
/// Time spent "loading" after walking through the gate
const TRANSITION_SECS: f64 = 0.5;

/// Axis-aligned box given by its center and size
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Rect {
    const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    fn overlaps(&self, other: &Rect) -> bool {
        (self.x - other.x).abs() * 2.0 < self.w + other.w
            && (self.y - other.y).abs() * 2.0 < self.h + other.h
    }

    fn volume(
        &self,
        name: &str,
        layer: u32,
        is_trigger: bool,
        caps: Capabilities,
    ) -> CollisionVolume {
        CollisionVolume {
            layer,
            is_trigger,
            x: self.x,
            y: self.y,
            width: self.w,
            height: self.h,
            caps,
            ..CollisionVolume::new(name)
        }
    }
}

#[derive(Debug, Clone)]
struct Knight {
    x: f64,
    y: f64,
    vel_y: f64,
    grounded: bool,
    /// -1.0 or 1.0
    facing: f64,
    health: u32,
    blue: u32,
    invuln: f64,
    slash: f64,
    slash_landed: bool,
}

impl Knight {
    fn spawn() -> Self {
        Self {
            x: SPAWN_X,
            y: standing_y(),
            vel_y: 0.0,
            grounded: true,
            facing: 1.0,
            health: MAX_HEALTH,
            blue: 0,
            invuln: 0.0,
            slash: 0.0,
            slash_landed: false,
        }
    }

    fn body(&self) -> Rect {
        Rect::new(self.x, self.y, PLAYER_SIZE.0, PLAYER_SIZE.1)
    }

    fn slash_area(&self) -> Option<Rect> {
        (self.slash > 0.0).then(|| {
            Rect::new(
                self.x + self.facing * (PLAYER_SIZE.0 + SLASH_SIZE.0) / 2.0,
                self.y,
                SLASH_SIZE.0,
                SLASH_SIZE.1,
            )
        })
    }
}

#[derive(Debug, Clone)]
struct Crawler {
    name: String,
    x: f64,
    dir: f64,
    hp: i32,
    turn_in: f64,
}

impl Crawler {
    fn body(&self) -> Rect {
        Rect::new(self.x, FLOOR_Y + CRAWLER_SIZE.1 / 2.0, CRAWLER_SIZE.0, CRAWLER_SIZE.1)
    }

    fn alive(&self) -> bool {
        self.hp > 0
    }
}

fn standing_y() -> f64 {
    FLOOR_Y + PLAYER_SIZE.1 / 2.0
}

/// Deterministic stand-in for a game engine
#[derive(Debug, Clone)]
pub struct DemoWorld {
    seed: u64,
    rng: ChaCha8Rng,
    knight: Knight,
    crawlers: Vec<Crawler>,
    breakable_hp: i32,
    input: InputAxes,
    /// Remaining scene-load time; no gameplay while positive
    transition: f64,
}

impl DemoWorld {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let crawlers = (0..CRAWLER_COUNT)
            .map(|i| Crawler {
                name: format!("Crawler {}", i + 1),
                x: rng.gen_range(CRAWLER_RANGE.0 + 4.0..CRAWLER_RANGE.1),
                dir: if rng.gen() { 1.0 } else { -1.0 },
                hp: CRAWLER_HP,
                turn_in: rng.gen_range(1.0..4.0),
            })
            .collect();

        Self {
            seed,
            rng,
            knight: Knight::spawn(),
            crawlers,
            breakable_hp: BREAKABLE_HP,
            input: InputAxes::default(),
            transition: 0.0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Advance the simulation by one host frame
    pub fn step(&mut self, dt: Duration) {
        let dt = dt.as_secs_f64();
        if dt <= 0.0 {
            return;
        }

        if self.transition > 0.0 {
            self.transition -= dt;
            if self.transition <= 0.0 {
                self.transition = 0.0;
                self.knight.x = SPAWN_X;
                self.knight.y = standing_y();
                self.knight.vel_y = 0.0;
                info!("Scene loaded, back at spawn");
            }
            return;
        }

        self.move_knight(dt);
        self.move_crawlers(dt);
        self.resolve_slash();
        self.resolve_contact();

        if self.knight.body().overlaps(&GATE) {
            info!("Entered transition gate");
            self.transition = TRANSITION_SECS;
        }
    }

    fn move_knight(&mut self, dt: f64) {
        let input = self.input;
        let wall_up = self.breakable_hp > 0;
        let k = &mut self.knight;

        let run = f64::from(input.horizontal) / f64::from(AXIS_FULL);
        if run != 0.0 {
            k.facing = run.signum();
        }
        if input.vertical > 0 && k.grounded {
            k.vel_y = JUMP_SPEED;
            k.grounded = false;
        }

        let prev_x = k.x;
        let min_x = WALL_THICKNESS + PLAYER_SIZE.0 / 2.0;
        let max_x = ARENA_WIDTH - WALL_THICKNESS - PLAYER_SIZE.0 / 2.0;
        k.x = (k.x + run * RUN_SPEED * dt).clamp(min_x, max_x);
        if wall_up && k.body().overlaps(&BREAKABLE_WALL) {
            k.x = prev_x;
        }

        k.vel_y += GRAVITY * dt;
        k.y = (k.y + k.vel_y * dt).min(ARENA_HEIGHT - PLAYER_SIZE.1 / 2.0);
        if k.y <= standing_y() {
            k.y = standing_y();
            k.vel_y = 0.0;
            k.grounded = true;
        }

        k.invuln = (k.invuln - dt).max(0.0);
        k.slash = (k.slash - dt).max(0.0);
        if input.attack && k.slash == 0.0 {
            k.slash = SLASH_SECS;
            k.slash_landed = false;
        }
    }

    fn move_crawlers(&mut self, dt: f64) {
        for crawler in self.crawlers.iter_mut().filter(|c| c.alive()) {
            crawler.turn_in -= dt;
            if crawler.turn_in <= 0.0 {
                crawler.dir = -crawler.dir;
                crawler.turn_in = self.rng.gen_range(1.0..4.0);
            }

            crawler.x += crawler.dir * CRAWLER_SPEED * dt;
            if crawler.x < CRAWLER_RANGE.0 || crawler.x > CRAWLER_RANGE.1 {
                crawler.x = crawler.x.clamp(CRAWLER_RANGE.0, CRAWLER_RANGE.1);
                crawler.dir = -crawler.dir;
            }
        }
    }

    /// Each slash lands at most once, on everything it overlaps
    fn resolve_slash(&mut self) {
        if self.knight.slash_landed {
            return;
        }
        let Some(area) = self.knight.slash_area() else {
            return;
        };

        let mut landed = false;
        for crawler in self.crawlers.iter_mut().filter(|c| c.alive()) {
            if area.overlaps(&crawler.body()) {
                crawler.hp -= 1;
                landed = true;
                debug!(enemy = %crawler.name, hp = crawler.hp, "Slash hit");
            }
        }
        if self.breakable_hp > 0 && area.overlaps(&BREAKABLE_WALL) {
            self.breakable_hp -= 1;
            landed = true;
            if self.breakable_hp == 0 {
                info!("Breakable wall destroyed");
            }
        }

        self.knight.slash_landed = landed;
    }

    fn resolve_contact(&mut self) {
        if self.knight.invuln > 0.0 {
            return;
        }

        let body = self.knight.body();
        if body.overlaps(&SPIKES) {
            self.hurt("spikes");
            self.knight.x = HAZARD_RESPAWN.x;
            self.knight.y = standing_y();
            self.knight.vel_y = 0.0;
            return;
        }

        let touching = self
            .crawlers
            .iter()
            .find(|c| c.alive() && body.overlaps(&c.body()))
            .map(|c| c.name.clone());
        if let Some(name) = touching {
            self.hurt(&name);
        }
    }

    /// Blue health absorbs damage first
    fn hurt(&mut self, source: &str) {
        let k = &mut self.knight;
        if k.blue > 0 {
            k.blue -= 1;
        } else {
            k.health = k.health.saturating_sub(1);
        }
        k.invuln = INVULN_SECS;
        debug!(source, health = k.health, blue = k.blue, "Player hurt");

        if k.health == 0 {
            info!("Player died, respawning");
            *k = Knight::spawn();
        }
    }
}

impl WorldStateProvider for DemoWorld {
    fn player_vitals(&self) -> Option<PlayerVitals> {
        Some(PlayerVitals {
            current: self.knight.health,
            max: MAX_HEALTH,
            blue: self.knight.blue,
        })
    }

    fn player_position(&self) -> Option<(f64, f64)> {
        Some((self.knight.x, self.knight.y))
    }

    fn collision_volumes(&self) -> Result<Vec<CollisionVolume>, WorldError> {
        let terrain = Capabilities::default();
        let mut volumes = vec![
            Rect::new(ARENA_WIDTH / 2.0, FLOOR_Y - 0.5, ARENA_WIDTH, 1.0)
                .volume("Floor", TERRAIN_LAYER, false, terrain),
            Rect::new(WALL_THICKNESS / 2.0, ARENA_HEIGHT / 2.0, WALL_THICKNESS, ARENA_HEIGHT)
                .volume("Wall Left", TERRAIN_LAYER, false, terrain),
            Rect::new(
                ARENA_WIDTH - WALL_THICKNESS / 2.0,
                ARENA_HEIGHT / 2.0,
                WALL_THICKNESS,
                ARENA_HEIGHT,
            )
            .volume("Wall Right", TERRAIN_LAYER, false, terrain),
            CollisionVolume {
                active: self.breakable_hp > 0,
                ..BREAKABLE_WALL.volume("Breakable Wall", TERRAIN_LAYER, false, terrain)
            },
            SPIKES.volume(
                "Spikes",
                0,
                true,
                Capabilities {
                    damages_player: true,
                    ..Default::default()
                },
            ),
            HAZARD_RESPAWN.volume(
                "Hazard Respawn Trigger",
                0,
                true,
                Capabilities {
                    hazard_respawn: true,
                    ..Default::default()
                },
            ),
            GATE.volume(
                "right1",
                0,
                true,
                Capabilities {
                    transition_gate: true,
                    ..Default::default()
                },
            ),
            self.knight.body().volume(
                "Knight",
                PLAYER_LAYER,
                false,
                Capabilities {
                    player_body: true,
                    ..Default::default()
                },
            ),
        ];

        if let Some(area) = self.knight.slash_area() {
            volumes.push(area.volume(
                "Slash",
                PLAYER_LAYER,
                true,
                Capabilities {
                    damages_enemies: true,
                    ..Default::default()
                },
            ));
        }

        let enemy = Capabilities {
            damages_player: true,
            health_manager: true,
            ..Default::default()
        };
        volumes.extend(self.crawlers.iter().map(|c| CollisionVolume {
            active: c.alive(),
            ..c.body().volume(&c.name, ENEMY_LAYER, false, enemy)
        }));

        Ok(volumes)
    }

    fn health_entities(&self) -> Result<Vec<HealthEntity>, WorldError> {
        let knight = HealthEntity {
            name: "Knight".to_string(),
            x: self.knight.x,
            y: self.knight.y,
            hp: self.knight.health as i32,
            size: Some(PLAYER_SIZE),
            active: true,
            is_player: true,
        };

        Ok(std::iter::once(knight)
            .chain(self.crawlers.iter().map(|c| {
                let body = c.body();
                HealthEntity {
                    name: c.name.clone(),
                    x: body.x,
                    y: body.y,
                    hp: c.hp,
                    size: Some(CRAWLER_SIZE),
                    active: c.alive(),
                    is_player: false,
                }
            }))
            .collect())
    }

    fn is_gameplay(&self) -> bool {
        self.transition <= 0.0
    }

    /// Input is held until the next command replaces it
    fn apply_input(&mut self, axes: InputAxes) -> Result<(), WorldError> {
        self.input = axes;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), WorldError> {
        info!(seed = self.seed, "Resetting demo world");
        *self = Self::new(self.seed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Command, HitboxCategory, SnapshotBuilder};

    const FRAME: Duration = Duration::from_millis(16);

    fn run(world: &mut DemoWorld, frames: usize) {
        for _ in 0..frames {
            world.step(FRAME);
        }
    }

    fn categories(world: &DemoWorld) -> Vec<HitboxCategory> {
        SnapshotBuilder::default()
            .build(world)
            .hitboxes
            .iter()
            .map(|h| h.category)
            .collect()
    }

    #[test]
    fn same_seed_same_world() {
        let mut a = DemoWorld::new(7);
        let mut b = DemoWorld::new(7);
        let input = Command {
            right: true,
            jump: true,
            ..Default::default()
        }
        .axes();

        for world in [&mut a, &mut b] {
            world.apply_input(input).unwrap();
            run(world, 120);
        }

        let builder = SnapshotBuilder::default();
        assert_eq!(builder.build(&a), builder.build(&b));
    }

    #[test]
    fn running_and_jumping() {
        let mut world = DemoWorld::new(1);
        let (x0, y0) = world.player_position().unwrap();

        world
            .apply_input(Command {
                right: true,
                jump: true,
                ..Default::default()
            }.axes())
            .unwrap();
        run(&mut world, 10);

        let (x1, y1) = world.player_position().unwrap();
        assert!(x1 > x0);
        assert!(y1 > y0);

        world.apply_input(InputAxes::default()).unwrap();
        run(&mut world, 120);
        let (x2, y2) = world.player_position().unwrap();
        assert_eq!(x2, x1);
        assert_eq!(y2, standing_y());
    }

    #[test]
    fn every_reported_category_shows_up() {
        let mut world = DemoWorld::new(3);
        let found = categories(&world);
        for expected in [
            HitboxCategory::Player,
            HitboxCategory::Enemy,
            HitboxCategory::Terrain,
            HitboxCategory::Breakable,
            HitboxCategory::HazardRespawn,
            HitboxCategory::Gate,
        ] {
            assert!(found.contains(&expected), "missing {:?}", expected);
        }
        assert!(!found.contains(&HitboxCategory::Attack));

        world
            .apply_input(Command {
                attack: true,
                ..Default::default()
            }.axes())
            .unwrap();
        world.step(FRAME);
        assert!(categories(&world).contains(&HitboxCategory::Attack));
    }

    #[test]
    fn snapshot_enemies_exclude_the_player() {
        let world = DemoWorld::new(3);
        let snapshot = SnapshotBuilder::default().build(&world);
        assert_eq!(snapshot.enemies.len(), CRAWLER_COUNT);
        assert!(snapshot.enemies.iter().all(|e| e.name.starts_with("Crawler")));
    }

    #[test]
    fn spikes_hurt_and_send_back_to_respawn_point() {
        let mut world = DemoWorld::new(5);
        world.knight.x = SPIKES.x;
        world.step(FRAME);

        assert_eq!(world.player_vitals().unwrap().current, MAX_HEALTH - 1);
        assert_eq!(world.player_position().unwrap().0, HAZARD_RESPAWN.x);
    }

    #[test]
    fn blue_health_absorbs_first() {
        let mut world = DemoWorld::new(5);
        world.knight.blue = 1;
        world.hurt("test");
        let vitals = world.player_vitals().unwrap();
        assert_eq!((vitals.current, vitals.blue), (MAX_HEALTH, 0));
    }

    #[test]
    fn breakable_wall_blocks_until_broken() {
        let mut world = DemoWorld::new(9);
        world.crawlers.clear();
        world.knight.x = BREAKABLE_WALL.x - 2.0;
        world
            .apply_input(Command {
                right: true,
                ..Default::default()
            }.axes())
            .unwrap();
        run(&mut world, 60);
        assert!(world.knight.x < BREAKABLE_WALL.x);

        for _ in 0..BREAKABLE_HP {
            world
                .apply_input(Command {
                    right: true,
                    attack: true,
                    ..Default::default()
                }.axes())
                .unwrap();
            world.step(FRAME);
            world
                .apply_input(Command {
                    right: true,
                    ..Default::default()
                }.axes())
                .unwrap();
            run(&mut world, 20);
        }
        assert_eq!(world.breakable_hp, 0);

        run(&mut world, 60);
        assert!(world.knight.x > BREAKABLE_WALL.x);
    }

    #[test]
    fn gate_pauses_gameplay_then_returns_to_spawn() {
        let mut world = DemoWorld::new(2);
        world.knight.x = GATE.x;
        world.step(FRAME);
        assert!(!world.is_gameplay());

        world.step(Duration::from_millis(600));
        assert!(world.is_gameplay());
        assert_eq!(world.player_position().unwrap().0, SPAWN_X);
    }

    #[test]
    fn reset_restores_the_seeded_start() {
        let mut world = DemoWorld::new(11);
        let builder = SnapshotBuilder::default();
        let initial = builder.build(&world);

        world
            .apply_input(Command {
                left: true,
                attack: true,
                ..Default::default()
            }.axes())
            .unwrap();
        run(&mut world, 90);
        assert_ne!(builder.build(&world), initial);

        world.reset().unwrap();
        assert_eq!(builder.build(&world), initial);
        assert_eq!(world.seed(), 11);
    }
}
