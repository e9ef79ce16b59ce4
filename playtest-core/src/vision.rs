//! Point-in-time, read-only view of a running game.
//!
//! The wire form matches what page-side vision adapters emit (camelCase).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Direction;

/// High-level screen the game reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GameStateTag {
    Menu,
    Playing,
    Paused,
    GameOver,
    Victory,
    Custom(String),
}

impl GameStateTag {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Menu => "menu",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::GameOver => "gameover",
            Self::Victory => "victory",
            Self::Custom(name) => name,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::GameOver | Self::Victory)
    }
}

impl From<String> for GameStateTag {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "menu" | "title" => Self::Menu,
            "playing" => Self::Playing,
            "paused" => Self::Paused,
            "gameover" | "game_over" | "dead" | "death" => Self::GameOver,
            "victory" | "win" | "won" | "complete" => Self::Victory,
            _ => Self::Custom(value),
        }
    }
}

impl From<&str> for GameStateTag {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<GameStateTag> for String {
    fn from(value: GameStateTag) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for GameStateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Eight-way direction pointing from `self` toward `other`.
    ///
    /// Returns `None` when the points coincide. Screen coordinates: `y` grows
    /// downward.
    #[must_use]
    pub fn direction_to(self, other: Self) -> Option<Direction> {
        Direction::from_delta(other.x - self.x, other.y - self.y)
    }
}

/// The controllable character, when the game has one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_health: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inventory: Vec<String>,
}

impl PlayerRecord {
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Health as a fraction of its maximum, if both are known.
    #[must_use]
    pub fn health_ratio(&self) -> Option<f64> {
        match (self.health, self.max_health) {
            (Some(hp), Some(max)) if max > 0.0 => Some(hp / max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f64>,
}

/// Free-form UI summary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UiValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl UiValue {
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionSnapshot {
    pub game_state: GameStateTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerRecord>,
    #[serde(default)]
    pub visible_entities: Vec<VisibleEntity>,
    #[serde(default)]
    pub ui: BTreeMap<String, UiValue>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl VisionSnapshot {
    #[must_use]
    pub fn new(game_state: impl Into<GameStateTag>) -> Self {
        Self {
            game_state: game_state.into(),
            player: None,
            visible_entities: Vec::new(),
            ui: BTreeMap::new(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_player(mut self, player: PlayerRecord) -> Self {
        self.player = Some(player);
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity: VisibleEntity) -> Self {
        self.visible_entities.push(entity);
        self
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.game_state.is_terminal()
    }

    #[must_use]
    pub fn player_position(&self) -> Option<Position> {
        self.player.as_ref().map(PlayerRecord::position)
    }

    /// Entities whose `type` is one of `kinds`.
    pub fn entities_of<'a, 'k>(
        &'a self,
        kinds: &'k [String],
    ) -> impl Iterator<Item = &'a VisibleEntity> + use<'a, 'k> {
        self.visible_entities
            .iter()
            .filter(move |entity| kinds.iter().any(|kind| *kind == entity.kind))
    }

    /// Nearest entity of the given types to the player, with its distance.
    #[must_use]
    pub fn nearest_of(&self, kinds: &[String]) -> Option<(&VisibleEntity, f64)> {
        let origin = self.player_position()?;
        self.visible_entities
            .iter()
            .filter(|entity| kinds.iter().any(|kind| *kind == entity.kind))
            .map(|entity| (entity, origin.distance(entity.position)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    #[must_use]
    pub fn entity(&self, id: &str) -> Option<&VisibleEntity> {
        self.visible_entities.iter().find(|entity| entity.id == id)
    }

    /// Numeric value published under `key` in `context`, falling back to `ui`.
    #[must_use]
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.context
            .get(key)
            .and_then(Value::as_f64)
            .or_else(|| self.ui.get(key).and_then(UiValue::as_number))
    }

    /// Every numeric value published in `context` and `ui`.
    ///
    /// `context` wins when both publish the same key.
    #[must_use]
    pub fn numeric_fields(&self) -> BTreeMap<String, f64> {
        let mut fields: BTreeMap<String, f64> = self
            .ui
            .iter()
            .filter_map(|(key, value)| value.as_number().map(|n| (key.clone(), n)))
            .collect();
        for (key, value) in &self.context {
            if let Some(n) = value.as_f64() {
                fields.insert(key.clone(), n);
            }
        }
        fields
    }
}
