//! Primitive input events and held-key bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Reserved key name for the primary mouse button.
pub const MOUSE_BUTTON: &str = "Mouse0";

/// Logical group of keys; stale keys are reconciled per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputChannel {
    Movement,
    Menu,
    Combat,
}

/// Primitive event understood by a game's own input layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputEvent {
    KeyDown { key: String },
    KeyUp { key: String },
    MouseMove { x: f64, y: f64 },
    MouseDown,
    MouseUp,
    Click { x: f64, y: f64 },
}

impl InputEvent {
    #[must_use]
    pub fn press(key: &str) -> Self {
        if key == MOUSE_BUTTON {
            Self::MouseDown
        } else {
            Self::KeyDown {
                key: key.to_string(),
            }
        }
    }

    #[must_use]
    pub fn release(key: &str) -> Self {
        if key == MOUSE_BUTTON {
            Self::MouseUp
        } else {
            Self::KeyUp {
                key: key.to_string(),
            }
        }
    }
}

/// Primitive input for one action: keys held on one channel for the hold
/// duration, plus pointer events fired before the hold starts.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPlan {
    pub channel: InputChannel,
    pub keys: BTreeSet<String>,
    pub pointer: Vec<InputEvent>,
}

impl InputPlan {
    #[must_use]
    pub fn keys<I, S>(channel: InputChannel, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel,
            keys: keys.into_iter().map(Into::into).collect(),
            pointer: Vec::new(),
        }
    }

    #[must_use]
    pub fn idle(channel: InputChannel) -> Self {
        Self {
            channel,
            keys: BTreeSet::new(),
            pointer: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pointer(mut self, event: InputEvent) -> Self {
        self.pointer.push(event);
        self
    }
}

/// Keys currently held down, per channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldKeys {
    held: BTreeMap<InputChannel, BTreeSet<String>>,
}

impl HeldKeys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.values().all(BTreeSet::is_empty)
    }

    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.held.values().any(|keys| keys.contains(key))
    }

    /// Every held key across all channels.
    #[must_use]
    pub fn all(&self) -> BTreeSet<String> {
        self.held.values().flatten().cloned().collect()
    }

    /// Events that move `channel` from its current keys to `keys`.
    ///
    /// Stale keys are released first, then missing keys are pressed; keys in
    /// both sets stay down without a repeated press.
    pub fn transition(&mut self, channel: InputChannel, keys: &BTreeSet<String>) -> Vec<InputEvent> {
        let current = self.held.entry(channel).or_default();
        let mut events: Vec<InputEvent> = current
            .difference(keys)
            .map(|key| InputEvent::release(key))
            .collect();
        events.extend(keys.difference(current).map(|key| InputEvent::press(key)));
        current.clone_from(keys);
        events
    }

    /// Mark a key as released after the sink confirmed the key-up.
    pub fn mark_released(&mut self, channel: InputChannel, key: &str) {
        if let Some(keys) = self.held.get_mut(&channel) {
            keys.remove(key);
        }
    }

    /// Keys held on `channel`, without changing state.
    #[must_use]
    pub fn held_on(&self, channel: InputChannel) -> Vec<String> {
        self.held
            .get(&channel)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Channels with at least one held key.
    #[must_use]
    pub fn active_channels(&self) -> Vec<InputChannel> {
        self.held
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(channel, _)| *channel)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| (*k).to_string()).collect()
    }

    #[test]
    fn transition_releases_stale_and_presses_new() {
        let mut held = HeldKeys::new();
        let first = held.transition(InputChannel::Movement, &set(&["w", "d"]));
        assert_eq!(
            first,
            vec![InputEvent::press("d"), InputEvent::press("w")]
        );

        let second = held.transition(InputChannel::Movement, &set(&["w", "a"]));
        assert_eq!(second, vec![InputEvent::release("d"), InputEvent::press("a")]);
        assert!(held.is_held("w"));
        assert!(!held.is_held("d"));
    }

    #[test]
    fn channels_are_independent() {
        let mut held = HeldKeys::new();
        held.transition(InputChannel::Combat, &set(&[MOUSE_BUTTON]));
        let events = held.transition(InputChannel::Movement, &set(&["s"]));
        assert_eq!(events, vec![InputEvent::press("s")]);
        assert_eq!(held.held_on(InputChannel::Combat), vec![MOUSE_BUTTON.to_string()]);
        assert_eq!(
            held.active_channels(),
            vec![InputChannel::Movement, InputChannel::Combat]
        );
    }

    #[test]
    fn mouse_button_maps_to_pointer_events() {
        assert_eq!(InputEvent::press(MOUSE_BUTTON), InputEvent::MouseDown);
        assert_eq!(InputEvent::release(MOUSE_BUTTON), InputEvent::MouseUp);
        let mut held = HeldKeys::new();
        held.transition(InputChannel::Combat, &set(&[MOUSE_BUTTON]));
        held.mark_released(InputChannel::Combat, MOUSE_BUTTON);
        assert!(held.is_empty());
    }
}
