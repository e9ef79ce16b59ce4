//! Symbolic, game-agnostic instructions.
//!
//! Actions are built by a decision policy, consumed once by an
//! [`crate::ActionExecutor`], then dropped.

use std::f64::consts::FRAC_PI_4;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::input::InputChannel;
use crate::vision::Position;

/// Eight-way compass direction in screen space (`y` grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    UpRight,
    Right,
    DownRight,
    Down,
    DownLeft,
    Left,
    UpLeft,
}

impl Direction {
    /// Clockwise order starting at `Up`.
    pub const ALL: [Self; 8] = [
        Self::Up,
        Self::UpRight,
        Self::Right,
        Self::DownRight,
        Self::Down,
        Self::DownLeft,
        Self::Left,
        Self::UpLeft,
    ];

    #[must_use]
    pub fn from_delta(dx: f64, dy: f64) -> Option<Self> {
        if dx.abs() < f64::EPSILON && dy.abs() < f64::EPSILON {
            return None;
        }
        // atan2 is measured from +x toward +y (clockwise on screen).
        let sector = (dy.atan2(dx) / FRAC_PI_4).round() as i64;
        // Right is index 2 in `ALL`.
        let index = (sector + 2).rem_euclid(8) as usize;
        Some(Self::ALL[index])
    }

    const fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::UpRight => 1,
            Self::Right => 2,
            Self::DownRight => 3,
            Self::Down => 4,
            Self::DownLeft => 5,
            Self::Left => 6,
            Self::UpLeft => 7,
        }
    }

    /// Rotate clockwise by `steps` eighths of a turn (negative is counter-clockwise).
    #[must_use]
    pub const fn rotate(self, steps: i32) -> Self {
        let index = (self.index() as i32 + steps).rem_euclid(8) as usize;
        Self::ALL[index]
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        self.rotate(4)
    }

    /// Unit vector for this direction.
    #[must_use]
    pub fn unit(self) -> (f64, f64) {
        let (dx, dy): (f64, f64) = match self {
            Self::Up => (0.0, -1.0),
            Self::UpRight => (1.0, -1.0),
            Self::Right => (1.0, 0.0),
            Self::DownRight => (1.0, 1.0),
            Self::Down => (0.0, 1.0),
            Self::DownLeft => (-1.0, 1.0),
            Self::Left => (-1.0, 0.0),
            Self::UpLeft => (-1.0, -1.0),
        };
        let len = dx.hypot(dy);
        (dx / len, dy / len)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::UpRight => "upRight",
            Self::Right => "right",
            Self::DownRight => "downRight",
            Self::Down => "down",
            Self::DownLeft => "downLeft",
            Self::Left => "left",
            Self::UpLeft => "upLeft",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouseSpec {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickSpec {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    MoveDir {
        direction: Direction,
    },
    MoveTo {
        x: f64,
        y: f64,
    },
    Interact,
    Shoot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Position>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
    },
    MenuSelect,
    Click {
        x: f64,
        y: f64,
    },
    Wait,
    Custom {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mouse: Option<MouseSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        click: Option<ClickSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<InputChannel>,
    },
}

impl Action {
    #[must_use]
    pub const fn move_dir(direction: Direction) -> Self {
        Self::MoveDir { direction }
    }

    #[must_use]
    pub const fn move_to(position: Position) -> Self {
        Self::MoveTo {
            x: position.x,
            y: position.y,
        }
    }

    #[must_use]
    pub const fn shoot_at(target: Position) -> Self {
        Self::Shoot {
            target: Some(target),
            direction: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MoveDir { .. } => "moveDir",
            Self::MoveTo { .. } => "moveTo",
            Self::Interact => "interact",
            Self::Shoot { .. } => "shoot",
            Self::MenuSelect => "menuSelect",
            Self::Click { .. } => "click",
            Self::Wait => "wait",
            Self::Custom { .. } => "custom",
        }
    }

    /// Whether the action is expected to change the player's position.
    #[must_use]
    pub const fn is_movement(&self) -> bool {
        matches!(self, Self::MoveDir { .. } | Self::MoveTo { .. })
    }

    /// Wire form sent to page-side harnesses.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Describes one action a game accepts, for `getGameInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl ActionSpec {
    #[must_use]
    pub fn new(kind: &str, description: &str, params: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}
