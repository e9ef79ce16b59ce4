//! Deterministic top-down arena used for offline runs and tests.
//!
//! The player clears a bounded arena of enemies, picks up coins and medkits,
//! then leaves through a door that only appears once every enemy is down.
//! Input arrives as primitive key and pointer events through the stock
//! [`Keymap`]; held keys are applied over fixed simulation ticks while the
//! harness holds an action.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::action::ActionSpec;
use crate::checkpoint::CheckpointState;
use crate::error::AdapterError;
use crate::executor::{Keymap, KeymapExecutor};
use crate::harness::{GameInfo, HarnessCore, InputSink, StateHooks, VisionAdapter};
use crate::input::{InputEvent, MOUSE_BUTTON};
use crate::invariant::{Invariant, InvariantRegistry};
use crate::vision::{GameStateTag, PlayerRecord, Position, UiValue, VisibleEntity, VisionSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub width: f64,
    pub height: f64,
    pub enemies: u32,
    pub coins: u32,
    pub medkits: u32,
    pub tick_ms: u64,
    /// Distance per tick.
    pub player_speed: f64,
    pub enemy_speed: f64,
    pub max_health: f64,
    pub enemy_health: f64,
    pub contact_range: f64,
    pub contact_damage: f64,
    /// Ticks between two hits from the same enemy.
    pub contact_cooldown: u32,
    pub shot_range: f64,
    pub shot_damage: f64,
    /// Ticks between two shots.
    pub fire_cooldown: u32,
    pub interact_range: f64,
    pub medkit_heal: f64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: 24.0,
            height: 16.0,
            enemies: 3,
            coins: 4,
            medkits: 1,
            tick_ms: 50,
            player_speed: 0.25,
            enemy_speed: 0.05,
            max_health: 10.0,
            enemy_health: 4.0,
            contact_range: 0.8,
            contact_damage: 1.0,
            contact_cooldown: 10,
            shot_range: 10.0,
            shot_damage: 2.0,
            fire_cooldown: 3,
            interact_range: 1.0,
            medkit_heal: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Enemy {
    id: String,
    position: Position,
    health: f64,
    cooldown: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pickup {
    id: String,
    kind: String,
    position: Position,
}

/// Everything the snapshot is derived from; also the checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArenaState {
    phase: GameStateTag,
    player: Position,
    health: f64,
    coins: u32,
    kills: u32,
    tick: u64,
    fire_cooldown: u32,
    enemies: Vec<Enemy>,
    pickups: Vec<Pickup>,
    door: Position,
}

impl ArenaState {
    fn title(config: &ArenaConfig) -> Self {
        Self {
            phase: GameStateTag::Menu,
            player: Position::new(config.width / 2.0, config.height / 2.0),
            health: config.max_health,
            coins: 0,
            kills: 0,
            tick: 0,
            fire_cooldown: 0,
            enemies: Vec::new(),
            pickups: Vec::new(),
            door: Position::new(config.width - 1.0, config.height / 2.0),
        }
    }

    fn score(&self) -> u32 {
        self.coins * 10 + self.kills * 25
    }

    fn door_open(&self) -> bool {
        self.enemies.is_empty()
    }
}

/// In-process arena game implementing every adapter trait.
#[derive(Debug, Clone)]
pub struct ArenaGame {
    config: ArenaConfig,
    keymap: Keymap,
    seed: u64,
    starts: u64,
    state: ArenaState,
    pressed: BTreeSet<String>,
    pointer: Option<Position>,
}

impl ArenaGame {
    #[must_use]
    pub fn new(config: ArenaConfig, keymap: Keymap, seed: u64) -> Self {
        let state = ArenaState::title(&config);
        Self {
            config,
            keymap,
            seed,
            starts: 0,
            state,
            pressed: BTreeSet::new(),
            pointer: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> &GameStateTag {
        &self.state.phase
    }

    #[must_use]
    pub fn pressed_keys(&self) -> &BTreeSet<String> {
        &self.pressed
    }

    /// Lay out a fresh arena. Each restart draws a new layout from the seed.
    fn restart(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(self.starts));
        self.starts += 1;

        let mut state = ArenaState::title(&self.config);
        state.phase = GameStateTag::Playing;
        let (w, h) = (self.config.width.max(3.0), self.config.height.max(3.0));
        let origin = state.player;
        let mut spot = |min_gap: f64| {
            let mut p = origin;
            for _ in 0..64 {
                p = Position::new(rng.gen_range(1.0..w - 1.0), rng.gen_range(1.0..h - 1.0));
                if p.distance(origin) >= min_gap {
                    break;
                }
            }
            p
        };

        for i in 0..self.config.enemies {
            state.enemies.push(Enemy {
                id: format!("enemy-{i}"),
                position: spot(6.0),
                health: self.config.enemy_health,
                cooldown: 0,
            });
        }
        for i in 0..self.config.coins {
            state.pickups.push(Pickup {
                id: format!("coin-{i}"),
                kind: "coin".to_string(),
                position: spot(2.0),
            });
        }
        for i in 0..self.config.medkits {
            state.pickups.push(Pickup {
                id: format!("medkit-{i}"),
                kind: "medkit".to_string(),
                position: spot(2.0),
            });
        }
        self.state = state;
        self.pressed.clear();
        self.pointer = None;
    }

    fn on_confirm(&mut self) {
        if self.state.phase != GameStateTag::Playing {
            self.restart();
        }
    }

    fn on_interact(&mut self) {
        if self.state.phase != GameStateTag::Playing {
            return;
        }
        let player = self.state.player;
        let reach = self.config.interact_range;
        if self.state.door_open() && player.distance(self.state.door) <= reach {
            self.state.phase = GameStateTag::Victory;
            return;
        }
        let Some(index) = self
            .state
            .pickups
            .iter()
            .position(|pickup| pickup.position.distance(player) <= reach)
        else {
            return;
        };
        let pickup = self.state.pickups.remove(index);
        match pickup.kind.as_str() {
            "medkit" => {
                self.state.health =
                    (self.state.health + self.config.medkit_heal).min(self.config.max_health);
            }
            _ => self.state.coins += 1,
        }
    }

    fn movement(&self) -> (f64, f64) {
        let held = |key: &str| self.pressed.contains(key);
        let mut dx = 0.0;
        let mut dy = 0.0;
        if held(&self.keymap.up) {
            dy -= 1.0;
        }
        if held(&self.keymap.down) {
            dy += 1.0;
        }
        if held(&self.keymap.left) {
            dx -= 1.0;
        }
        if held(&self.keymap.right) {
            dx += 1.0;
        }
        let len = f64::hypot(dx, dy);
        if len > 0.0 { (dx / len, dy / len) } else { (0.0, 0.0) }
    }

    /// Aim vector for this tick, if any fire input is held.
    fn aim(&self) -> Option<(f64, f64)> {
        let held = |key: &str| self.pressed.contains(key);
        let k = &self.keymap;
        let mut dx = 0.0;
        let mut dy = 0.0;
        if held(&k.fire_up) {
            dy -= 1.0;
        }
        if held(&k.fire_down) {
            dy += 1.0;
        }
        if held(&k.fire_left) {
            dx -= 1.0;
        }
        if held(&k.fire_right) {
            dx += 1.0;
        }
        if dx != 0.0 || dy != 0.0 {
            return Some((dx, dy));
        }

        let pointer_fire = held(MOUSE_BUTTON) || held(&k.fire);
        let player = self.state.player;
        let toward = |p: Position| (p.x - player.x, p.y - player.y);
        if pointer_fire && let Some(pointer) = self.pointer {
            return Some(toward(pointer));
        }
        if held(&k.fire) {
            // Unaimed fire locks on to the closest enemy.
            return self
                .state
                .enemies
                .iter()
                .min_by(|a, b| a.position.distance(player).total_cmp(&b.position.distance(player)))
                .map(|enemy| toward(enemy.position));
        }
        None
    }

    fn fire(&mut self, (ax, ay): (f64, f64)) {
        let len = f64::hypot(ax, ay);
        if len == 0.0 {
            return;
        }
        let (ux, uy) = (ax / len, ay / len);
        let player = self.state.player;
        let range = self.config.shot_range;
        // Hitscan: nearest enemy within ~25 degrees of the aim line.
        let hit = self
            .state
            .enemies
            .iter()
            .enumerate()
            .filter_map(|(i, enemy)| {
                let (ex, ey) = (enemy.position.x - player.x, enemy.position.y - player.y);
                let dist = f64::hypot(ex, ey);
                let cos = if dist > 0.0 { (ex * ux + ey * uy) / dist } else { 1.0 };
                (dist <= range && cos >= 0.9).then_some((i, dist))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        self.state.fire_cooldown = self.config.fire_cooldown;
        if let Some(index) = hit {
            self.state.enemies[index].health -= self.config.shot_damage;
            if self.state.enemies[index].health <= 0.0 {
                self.state.enemies.remove(index);
                self.state.kills += 1;
            }
        }
    }

    fn tick(&mut self) {
        if self.state.phase != GameStateTag::Playing {
            return;
        }
        self.state.tick += 1;

        let (dx, dy) = self.movement();
        let speed = self.config.player_speed;
        let p = &mut self.state.player;
        p.x = (p.x + dx * speed).clamp(0.0, self.config.width);
        p.y = (p.y + dy * speed).clamp(0.0, self.config.height);

        if self.state.fire_cooldown > 0 {
            self.state.fire_cooldown -= 1;
        } else if let Some(aim) = self.aim() {
            self.fire(aim);
        }

        let player = self.state.player;
        let mut damage = 0.0;
        for enemy in &mut self.state.enemies {
            let gap = enemy.position.distance(player);
            if gap > self.config.contact_range {
                let step = self.config.enemy_speed.min(gap);
                enemy.position.x += (player.x - enemy.position.x) / gap * step;
                enemy.position.y += (player.y - enemy.position.y) / gap * step;
            }
            if enemy.cooldown > 0 {
                enemy.cooldown -= 1;
            } else if enemy.position.distance(player) <= self.config.contact_range {
                damage += self.config.contact_damage;
                enemy.cooldown = self.config.contact_cooldown;
            }
        }
        if damage > 0.0 {
            self.state.health = (self.state.health - damage).max(0.0);
            if self.state.health <= 0.0 {
                self.state.phase = GameStateTag::GameOver;
                self.pressed.clear();
            }
        }
    }
}

impl VisionAdapter for ArenaGame {
    fn game_info(&self) -> GameInfo {
        let k = &self.keymap;
        GameInfo {
            name: "arena".to_string(),
            framework: "sandbox".to_string(),
            actions: vec![
                ActionSpec::new("moveDir", "Walk in a compass direction", &["direction"]),
                ActionSpec::new("moveTo", "Walk toward a point", &["x", "y"]),
                ActionSpec::new("shoot", "Fire at a point or in a direction", &["target", "direction"]),
                ActionSpec::new("interact", "Pick up an item or use the door", &[]),
                ActionSpec::new("menuSelect", "Start or restart the game", &[]),
                ActionSpec::new("wait", "Do nothing", &[]),
            ],
            entity_types: ["enemy", "coin", "medkit", "door"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            controls: BTreeMap::from([
                ("move".to_string(), format!("{}/{}/{}/{}", k.up, k.left, k.down, k.right)),
                (
                    "fire".to_string(),
                    format!("{} / arrows / {MOUSE_BUTTON}", if k.fire == " " { "Space" } else { &k.fire }),
                ),
                ("interact".to_string(), k.interact.clone()),
                ("confirm".to_string(), k.confirm.clone()),
            ]),
        }
    }

    fn vision(&self) -> Result<VisionSnapshot, AdapterError> {
        let state = &self.state;
        let mut snapshot = VisionSnapshot::new(state.phase.clone());
        if state.phase == GameStateTag::Menu {
            snapshot
                .ui
                .insert("title".to_string(), UiValue::Text("ARENA".to_string()));
            return Ok(snapshot);
        }

        snapshot.player = Some(PlayerRecord {
            x: state.player.x,
            y: state.player.y,
            health: Some(state.health),
            max_health: Some(self.config.max_health),
            resources: BTreeMap::from([("coins".to_string(), f64::from(state.coins))]),
            inventory: Vec::new(),
        });
        for enemy in &state.enemies {
            snapshot.visible_entities.push(VisibleEntity {
                id: enemy.id.clone(),
                kind: "enemy".to_string(),
                subtype: None,
                position: enemy.position,
                health: Some(enemy.health),
            });
        }
        for pickup in &state.pickups {
            snapshot.visible_entities.push(VisibleEntity {
                id: pickup.id.clone(),
                kind: pickup.kind.clone(),
                subtype: None,
                position: pickup.position,
                health: None,
            });
        }
        if state.door_open() {
            snapshot.visible_entities.push(VisibleEntity {
                id: "door".to_string(),
                kind: "door".to_string(),
                subtype: Some("exit".to_string()),
                position: state.door,
                health: None,
            });
        }
        snapshot
            .ui
            .insert("score".to_string(), UiValue::Number(f64::from(state.score())));
        snapshot
            .ui
            .insert("doorOpen".to_string(), UiValue::Flag(state.door_open()));
        snapshot.context.insert("kills".to_string(), json!(state.kills));
        snapshot.context.insert("tick".to_string(), json!(state.tick));
        snapshot
            .context
            .insert("enemiesLeft".to_string(), json!(state.enemies.len()));
        Ok(snapshot)
    }
}

#[async_trait]
impl InputSink for ArenaGame {
    async fn dispatch(&mut self, event: &InputEvent) -> Result<(), AdapterError> {
        match event {
            InputEvent::KeyDown { key } => {
                if *key == self.keymap.confirm {
                    self.on_confirm();
                } else if *key == self.keymap.interact {
                    self.on_interact();
                }
                self.pressed.insert(key.clone());
            }
            InputEvent::KeyUp { key } => {
                self.pressed.remove(key);
            }
            InputEvent::MouseMove { x, y } => self.pointer = Some(Position::new(*x, *y)),
            InputEvent::MouseDown => {
                self.pressed.insert(MOUSE_BUTTON.to_string());
            }
            InputEvent::MouseUp => {
                self.pressed.remove(MOUSE_BUTTON);
            }
            InputEvent::Click { x, y } => {
                self.pointer = Some(Position::new(*x, *y));
                self.on_confirm();
            }
        }
        Ok(())
    }

    /// Advance the simulation instead of sleeping; at least one tick per hold.
    async fn hold(&mut self, duration: Duration) -> Result<(), AdapterError> {
        let tick = self.config.tick_ms.max(1);
        let ticks = (u64::try_from(duration.as_millis()).unwrap_or(u64::MAX) / tick).max(1);
        for _ in 0..ticks {
            self.tick();
        }
        Ok(())
    }
}

impl StateHooks for ArenaGame {
    fn serialize_state(&self) -> Option<CheckpointState> {
        let state = &self.state;
        Some(CheckpointState {
            position: Some(state.player),
            resources: BTreeMap::from([
                ("coins".to_string(), f64::from(state.coins)),
                ("health".to_string(), state.health),
            ]),
            level: Some(1),
            wave: Some(state.kills),
            extra: serde_json::to_value(state).ok()?,
        })
    }

    fn deserialize_state(&mut self, checkpoint: &CheckpointState) -> Result<bool, AdapterError> {
        let state: ArenaState = serde_json::from_value(checkpoint.extra.clone())
            .map_err(|err| AdapterError::new(format!("bad arena checkpoint: {err}")))?;
        self.state = state;
        self.pressed.clear();
        self.pointer = None;
        Ok(true)
    }

    fn force_start(&mut self) -> Result<bool, AdapterError> {
        self.restart();
        Ok(true)
    }
}

/// Arena-specific invariants on top of the built-ins.
#[must_use]
pub fn arena_invariants(config: &ArenaConfig) -> InvariantRegistry {
    let (w, h) = (config.width, config.height);
    let mut registry = InvariantRegistry::with_builtins();
    registry.register(Invariant::new(
        "playerInBounds",
        "player left the arena",
        move |snapshot| {
            snapshot
                .player_position()
                .is_none_or(|p| (0.0..=w).contains(&p.x) && (0.0..=h).contains(&p.y))
        },
    ));
    registry.register(Invariant::new(
        "doorOnlyWhenCleared",
        "exit door visible while enemies remain",
        |snapshot| {
            let has = |kind: &str| snapshot.visible_entities.iter().any(|e| e.kind == kind);
            !(has("door") && has("enemy"))
        },
    ));
    registry
}

/// Ready-to-drive harness around a fresh arena.
#[must_use]
pub fn arena_harness(
    config: ArenaConfig,
    keymap: Keymap,
    seed: u64,
) -> HarnessCore<ArenaGame, KeymapExecutor> {
    let invariants = arena_invariants(&config);
    let game = ArenaGame::new(config, keymap.clone(), seed);
    HarnessCore::new(game, KeymapExecutor::new(keymap), invariants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, Direction};
    use crate::driver::{DriverConfig, IterationOutcome, PlaytestDriver};
    use crate::harness::GameHarness;
    use crate::policy::{PolicyConfig, PolicyPreset};

    fn harness(seed: u64) -> HarnessCore<ArenaGame, KeymapExecutor> {
        arena_harness(ArenaConfig::default(), Keymap::default(), seed)
    }

    #[test]
    fn title_screen_has_no_player() {
        let mut core = harness(1);
        let snapshot = tokio_test::block_on(core.vision()).unwrap();
        assert_eq!(snapshot.game_state, GameStateTag::Menu);
        assert!(snapshot.player.is_none());
    }

    #[test]
    fn menu_select_starts_play() {
        let mut core = harness(1);
        tokio_test::block_on(async {
            core.execute(&Action::MenuSelect, Duration::ZERO).await.unwrap();
            let snapshot = core.vision().await.unwrap();
            assert_eq!(snapshot.game_state, GameStateTag::Playing);
            assert_eq!(snapshot.entities_of(&["enemy".to_string()]).count(), 3);
        });
        assert!(core.game().pressed_keys().is_empty());
    }

    #[test]
    fn held_movement_moves_the_player() {
        let mut core = harness(2);
        tokio_test::block_on(async {
            core.force_start().await.unwrap();
            let before = core.vision().await.unwrap().player_position().unwrap();
            core.execute(&Action::move_dir(Direction::Right), Duration::from_millis(200))
                .await
                .unwrap();
            let after = core.vision().await.unwrap().player_position().unwrap();
            assert!((after.x - before.x - 1.0).abs() < 1e-9);
            assert!((after.y - before.y).abs() < 1e-9);
        });
    }

    #[test]
    fn checkpoint_round_trip_reproduces_snapshot() {
        let mut core = harness(3);
        tokio_test::block_on(async {
            core.force_start().await.unwrap();
            for _ in 0..5 {
                core.execute(&Action::move_dir(Direction::Down), Duration::from_millis(100))
                    .await
                    .unwrap();
            }
            let saved = core.serialize_state().await.unwrap().expect("checkpoint");
            let expected = core.vision().await.unwrap();

            core.force_start().await.unwrap();
            assert_ne!(core.vision().await.unwrap(), expected);

            assert!(core.deserialize_state(&saved).await.unwrap());
            assert_eq!(core.vision().await.unwrap(), expected);
        });
    }

    #[test]
    fn same_seed_same_layout() {
        let mut a = harness(9);
        let mut b = harness(9);
        let (va, vb) = tokio_test::block_on(async {
            a.force_start().await.unwrap();
            b.force_start().await.unwrap();
            (a.vision().await.unwrap(), b.vision().await.unwrap())
        });
        assert_eq!(va, vb);
    }

    #[test]
    fn arena_invariants_hold_during_play() {
        let mut core = harness(4);
        tokio_test::block_on(async {
            core.force_start().await.unwrap();
            for direction in Direction::ALL {
                core.execute(&Action::move_dir(direction), Duration::from_millis(500))
                    .await
                    .unwrap();
                core.vision().await.unwrap();
                assert!(core.check_invariants().await.unwrap().is_empty());
            }
        });
    }

    #[test]
    fn shooter_policy_finishes_iterations_in_the_arena() {
        let policy = PolicyPreset::Shooter.create_policy(&PolicyConfig::default(), 5);
        let config = DriverConfig {
            iterations: 2,
            max_steps: 400,
            step_duration_ms: 100,
            screenshot_interval_ms: 0,
            ..DriverConfig::default()
        };
        let mut driver = PlaytestDriver::new(harness(5), policy, config);
        let summary = tokio_test::block_on(driver.run());
        assert_eq!(summary.iterations_completed, 2);
        assert!(!summary.aborted);
        assert!(
            summary
                .iterations
                .iter()
                .all(|log| log.outcome != IterationOutcome::Error)
        );
        assert!(summary.totals.get("steps").is_some_and(|steps| *steps > 0.0));
    }
}
