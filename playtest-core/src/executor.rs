//! Action → primitive input translation.

use serde::{Deserialize, Serialize};

use crate::action::{Action, Direction};
use crate::error::AdapterError;
use crate::input::{InputChannel, InputEvent, InputPlan, MOUSE_BUTTON};
use crate::vision::{Position, VisionSnapshot};

/// Converts a symbolic [`Action`] into the input a game already understands.
///
/// `latest` is the most recent snapshot, used to resolve actions that are
/// relative to the player (`moveTo`, aimed `shoot`).
pub trait ActionExecutor {
    /// # Errors
    ///
    /// Returns an error when the action cannot be expressed for this game.
    fn translate(
        &self,
        action: &Action,
        latest: Option<&VisionSnapshot>,
    ) -> Result<InputPlan, AdapterError>;
}

/// Key bindings used by [`KeymapExecutor`]. Values are DOM `key` names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keymap {
    pub up: String,
    pub down: String,
    pub left: String,
    pub right: String,
    pub fire_up: String,
    pub fire_down: String,
    pub fire_left: String,
    pub fire_right: String,
    pub fire: String,
    pub interact: String,
    pub confirm: String,
    /// Aim `shoot{target}` with the mouse instead of directional fire keys.
    pub aim_with_mouse: bool,
    /// `moveTo` closer than this is treated as arrived.
    pub arrive_radius: f64,
}

impl Default for Keymap {
    fn default() -> Self {
        Self {
            up: "w".to_string(),
            down: "s".to_string(),
            left: "a".to_string(),
            right: "d".to_string(),
            fire_up: "ArrowUp".to_string(),
            fire_down: "ArrowDown".to_string(),
            fire_left: "ArrowLeft".to_string(),
            fire_right: "ArrowRight".to_string(),
            fire: " ".to_string(),
            interact: "e".to_string(),
            confirm: "Enter".to_string(),
            aim_with_mouse: true,
            arrive_radius: 0.5,
        }
    }
}

impl Keymap {
    fn split(direction: Direction, up: &str, down: &str, left: &str, right: &str) -> Vec<String> {
        let parts = match direction {
            Direction::Up => vec![up],
            Direction::Down => vec![down],
            Direction::Left => vec![left],
            Direction::Right => vec![right],
            Direction::UpLeft => vec![up, left],
            Direction::UpRight => vec![up, right],
            Direction::DownLeft => vec![down, left],
            Direction::DownRight => vec![down, right],
        };
        parts.into_iter().map(str::to_string).collect()
    }

    #[must_use]
    pub fn movement_keys(&self, direction: Direction) -> Vec<String> {
        Self::split(direction, &self.up, &self.down, &self.left, &self.right)
    }

    #[must_use]
    pub fn fire_keys(&self, direction: Direction) -> Vec<String> {
        Self::split(
            direction,
            &self.fire_up,
            &self.fire_down,
            &self.fire_left,
            &self.fire_right,
        )
    }
}

/// Stock executor for keyboard-and-mouse games.
#[derive(Debug, Clone, Default)]
pub struct KeymapExecutor {
    keymap: Keymap,
}

impl KeymapExecutor {
    #[must_use]
    pub const fn new(keymap: Keymap) -> Self {
        Self { keymap }
    }

    #[must_use]
    pub const fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    fn player_origin(latest: Option<&VisionSnapshot>, kind: &str) -> Result<Position, AdapterError> {
        latest
            .and_then(VisionSnapshot::player_position)
            .ok_or_else(|| AdapterError::new(format!("{kind} requires a visible player")))
    }

    fn shoot(
        &self,
        target: Option<Position>,
        direction: Option<Direction>,
        latest: Option<&VisionSnapshot>,
    ) -> Result<InputPlan, AdapterError> {
        if let Some(direction) = direction {
            return Ok(InputPlan::keys(
                InputChannel::Combat,
                self.keymap.fire_keys(direction),
            ));
        }
        let Some(target) = target else {
            return Ok(InputPlan::keys(
                InputChannel::Combat,
                [self.keymap.fire.clone()],
            ));
        };
        if self.keymap.aim_with_mouse {
            return Ok(InputPlan::keys(InputChannel::Combat, [MOUSE_BUTTON])
                .with_pointer(InputEvent::MouseMove {
                    x: target.x,
                    y: target.y,
                }));
        }
        let origin = Self::player_origin(latest, "aimed shoot")?;
        let keys = origin
            .direction_to(target)
            .map_or_else(|| vec![self.keymap.fire.clone()], |d| self.keymap.fire_keys(d));
        Ok(InputPlan::keys(InputChannel::Combat, keys))
    }
}

impl ActionExecutor for KeymapExecutor {
    fn translate(
        &self,
        action: &Action,
        latest: Option<&VisionSnapshot>,
    ) -> Result<InputPlan, AdapterError> {
        let plan = match action {
            Action::MoveDir { direction } => {
                InputPlan::keys(InputChannel::Movement, self.keymap.movement_keys(*direction))
            }
            Action::MoveTo { x, y } => {
                let origin = Self::player_origin(latest, "moveTo")?;
                let target = Position::new(*x, *y);
                if origin.distance(target) <= self.keymap.arrive_radius {
                    InputPlan::idle(InputChannel::Movement)
                } else {
                    origin.direction_to(target).map_or_else(
                        || InputPlan::idle(InputChannel::Movement),
                        |d| InputPlan::keys(InputChannel::Movement, self.keymap.movement_keys(d)),
                    )
                }
            }
            Action::Interact => {
                InputPlan::keys(InputChannel::Menu, [self.keymap.interact.clone()])
            }
            Action::MenuSelect => InputPlan::keys(InputChannel::Menu, [self.keymap.confirm.clone()]),
            Action::Shoot { target, direction } => self.shoot(*target, *direction, latest)?,
            Action::Click { x, y } => InputPlan::idle(InputChannel::Menu)
                .with_pointer(InputEvent::Click { x: *x, y: *y }),
            Action::Wait => InputPlan::idle(InputChannel::Movement),
            Action::Custom {
                keys,
                mouse,
                click,
                channel,
                ..
            } => {
                let mut held = keys.clone();
                let mut pointer = Vec::new();
                if let Some(mouse) = mouse {
                    pointer.push(InputEvent::MouseMove {
                        x: mouse.x,
                        y: mouse.y,
                    });
                    if mouse.down {
                        held.push(MOUSE_BUTTON.to_string());
                    }
                }
                if let Some(click) = click {
                    pointer.push(InputEvent::Click {
                        x: click.x,
                        y: click.y,
                    });
                }
                let mut plan = InputPlan::keys(channel.unwrap_or(InputChannel::Combat), held);
                plan.pointer = pointer;
                plan
            }
        };
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::PlayerRecord;

    fn snapshot_at(x: f64, y: f64) -> VisionSnapshot {
        VisionSnapshot::new("playing").with_player(PlayerRecord {
            x,
            y,
            ..PlayerRecord::default()
        })
    }

    #[test]
    fn diagonal_movement_presses_two_keys() {
        let executor = KeymapExecutor::default();
        let plan = executor
            .translate(&Action::move_dir(Direction::UpLeft), None)
            .unwrap();
        assert_eq!(plan.channel, InputChannel::Movement);
        assert!(plan.keys.contains("w") && plan.keys.contains("a"));
    }

    #[test]
    fn move_to_resolves_against_player() {
        let executor = KeymapExecutor::default();
        let latest = snapshot_at(0.0, 0.0);
        let plan = executor
            .translate(&Action::MoveTo { x: 0.0, y: 5.0 }, Some(&latest))
            .unwrap();
        assert_eq!(plan.keys.iter().collect::<Vec<_>>(), vec!["s"]);

        let arrived = executor
            .translate(&Action::MoveTo { x: 0.2, y: 0.0 }, Some(&latest))
            .unwrap();
        assert!(arrived.keys.is_empty());

        let err = executor
            .translate(&Action::MoveTo { x: 1.0, y: 1.0 }, None)
            .unwrap_err();
        assert!(err.message.contains("moveTo"));
    }

    #[test]
    fn shoot_aims_with_mouse_or_fire_keys() {
        let executor = KeymapExecutor::default();
        let plan = executor
            .translate(&Action::shoot_at(Position::new(3.0, 4.0)), None)
            .unwrap();
        assert_eq!(plan.pointer, vec![InputEvent::MouseMove { x: 3.0, y: 4.0 }]);
        assert!(plan.keys.contains(MOUSE_BUTTON));

        let keyboard = KeymapExecutor::new(Keymap {
            aim_with_mouse: false,
            ..Keymap::default()
        });
        let latest = snapshot_at(0.0, 0.0);
        let plan = keyboard
            .translate(&Action::shoot_at(Position::new(-4.0, 0.0)), Some(&latest))
            .unwrap();
        assert_eq!(plan.keys.iter().collect::<Vec<_>>(), vec!["ArrowLeft"]);
    }

    #[test]
    fn custom_action_honours_channel_and_pointer() {
        let action: Action = serde_json::from_value(serde_json::json!({
            "type": "custom",
            "name": "buy",
            "keys": ["b"],
            "click": { "x": 5, "y": 6 },
            "channel": "menu"
        }))
        .unwrap();
        let plan = KeymapExecutor::default().translate(&action, None).unwrap();
        assert_eq!(plan.channel, InputChannel::Menu);
        assert_eq!(plan.pointer, vec![InputEvent::Click { x: 5.0, y: 6.0 }]);
    }
}
