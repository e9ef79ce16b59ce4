//! Harness protocol and the in-process façade that composes game adapters.
//!
//! The driver only ever talks to a [`GameHarness`]. Browser pages implement
//! it over a script bridge; in-process games get it from [`HarnessCore`],
//! which wires a [`VisionAdapter`], an [`ActionExecutor`], the game's
//! [`InputSink`] and an [`InvariantRegistry`] together and turns every
//! adapter failure into a [`HarnessError`].

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionSpec};
use crate::checkpoint::CheckpointState;
use crate::error::{AdapterError, HarnessError};
use crate::executor::ActionExecutor;
use crate::input::{HeldKeys, InputChannel, InputEvent};
use crate::invariant::{InvariantRegistry, Violation};
use crate::vision::VisionSnapshot;

/// Static description of a game. Callable before the game starts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub name: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub controls: BTreeMap<String, String>,
}

/// Harness protocol consumed by the playtest driver.
#[async_trait]
pub trait GameHarness: Send {
    async fn game_info(&mut self) -> Result<GameInfo, HarnessError>;

    /// Fresh snapshot. A missing player is reported as `player: None`.
    async fn vision(&mut self) -> Result<VisionSnapshot, HarnessError>;

    /// Press the action's input, hold it for `duration`, then release it.
    async fn execute(&mut self, action: &Action, duration: Duration) -> Result<(), HarnessError>;

    /// Registered invariants evaluated against the latest snapshot.
    async fn check_invariants(&mut self) -> Result<Vec<Violation>, HarnessError>;

    /// `Ok(None)` when the game has no checkpoint support.
    async fn serialize_state(&mut self) -> Result<Option<CheckpointState>, HarnessError>;

    /// `Ok(false)` when the game has no checkpoint support.
    async fn deserialize_state(&mut self, state: &CheckpointState) -> Result<bool, HarnessError>;

    /// Skip title screens and reset. `Ok(false)` when the hook is absent.
    async fn force_start(&mut self) -> Result<bool, HarnessError>;

    /// Reload the host and re-attach the harness.
    async fn reload(&mut self) -> Result<(), HarnessError> {
        Ok(())
    }

    /// PNG capture of the current frame, when the host can produce one.
    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, HarnessError> {
        Ok(None)
    }
}

/// Converts internal game state into a snapshot.
pub trait VisionAdapter {
    fn game_info(&self) -> GameInfo;

    /// # Errors
    ///
    /// Returns an error when the game cannot be observed right now.
    fn vision(&self) -> Result<VisionSnapshot, AdapterError>;
}

/// The game's own input layer.
#[async_trait]
pub trait InputSink: Send {
    async fn dispatch(&mut self, event: &InputEvent) -> Result<(), AdapterError>;

    /// Keep the current input applied for `duration`.
    async fn hold(&mut self, duration: Duration) -> Result<(), AdapterError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Optional save-state and debug hooks. Defaults report "unsupported".
pub trait StateHooks {
    fn serialize_state(&self) -> Option<CheckpointState> {
        None
    }

    /// # Errors
    ///
    /// Returns an error when the payload cannot be applied.
    fn deserialize_state(&mut self, _state: &CheckpointState) -> Result<bool, AdapterError> {
        Ok(false)
    }

    /// # Errors
    ///
    /// Returns an error when the game refuses to restart.
    fn force_start(&mut self) -> Result<bool, AdapterError> {
        Ok(false)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Run a synchronous adapter call, containing both errors and panics.
fn contain<T>(
    operation: &'static str,
    call: impl FnOnce() -> Result<T, AdapterError>,
) -> Result<T, HarnessError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(HarnessError::adapter(operation, &err)),
        Err(payload) => Err(HarnessError::Panic {
            operation,
            message: panic_message(&*payload),
        }),
    }
}

/// Game-agnostic façade over one in-process game.
pub struct HarnessCore<G, E> {
    game: G,
    executor: E,
    invariants: InvariantRegistry,
    held: HeldKeys,
    latest: Option<VisionSnapshot>,
}

impl<G, E> HarnessCore<G, E>
where
    G: VisionAdapter + InputSink + StateHooks + Send,
    E: ActionExecutor + Send,
{
    #[must_use]
    pub fn new(game: G, executor: E, invariants: InvariantRegistry) -> Self {
        Self {
            game,
            executor,
            invariants,
            held: HeldKeys::new(),
            latest: None,
        }
    }

    #[must_use]
    pub const fn game(&self) -> &G {
        &self.game
    }

    pub const fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    pub const fn invariants_mut(&mut self) -> &mut InvariantRegistry {
        &mut self.invariants
    }

    #[must_use]
    pub const fn held_keys(&self) -> &HeldKeys {
        &self.held
    }

    async fn dispatch(&mut self, event: &InputEvent) -> Result<(), HarnessError> {
        self.game
            .dispatch(event)
            .await
            .map_err(|err| HarnessError::adapter("execute", &err))
    }

    async fn release_channel(&mut self, channel: InputChannel) -> Result<(), HarnessError> {
        for key in self.held.held_on(channel) {
            self.dispatch(&InputEvent::release(&key)).await?;
            self.held.mark_released(channel, &key);
        }
        Ok(())
    }

    /// Best-effort release of every held key; failures are logged.
    async fn release_all(&mut self) {
        for channel in self.held.active_channels() {
            if let Err(err) = self.release_channel(channel).await {
                log::warn!("could not release {channel:?} keys: {err}");
            }
        }
    }

    async fn apply(&mut self, action: &Action, duration: Duration) -> Result<(), HarnessError> {
        let plan = {
            let latest = self.latest.as_ref();
            let executor = &self.executor;
            contain("execute", || executor.translate(action, latest))?
        };

        for event in self.held.transition(plan.channel, &plan.keys) {
            self.dispatch(&event).await?;
        }
        for event in &plan.pointer {
            self.dispatch(event).await?;
        }

        self.game
            .hold(duration)
            .await
            .map_err(|err| HarnessError::adapter("execute", &err))?;
        self.release_channel(plan.channel).await
    }
}

#[async_trait]
impl<G, E> GameHarness for HarnessCore<G, E>
where
    G: VisionAdapter + InputSink + StateHooks + Send,
    E: ActionExecutor + Send,
{
    async fn game_info(&mut self) -> Result<GameInfo, HarnessError> {
        let game = &self.game;
        contain("getGameInfo", || Ok(game.game_info()))
    }

    async fn vision(&mut self) -> Result<VisionSnapshot, HarnessError> {
        let game = &self.game;
        let snapshot = contain("getVision", || game.vision())?;
        self.latest = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn execute(&mut self, action: &Action, duration: Duration) -> Result<(), HarnessError> {
        let result = self.apply(action, duration).await;
        if result.is_err() {
            self.release_all().await;
        }
        result
    }

    async fn check_invariants(&mut self) -> Result<Vec<Violation>, HarnessError> {
        if self.latest.is_none() {
            self.vision().await?;
        }
        let invariants = &self.invariants;
        let latest = self.latest.as_ref();
        contain("checkInvariants", || {
            Ok(latest.map(|s| invariants.evaluate(s)).unwrap_or_default())
        })
    }

    async fn serialize_state(&mut self) -> Result<Option<CheckpointState>, HarnessError> {
        let game = &self.game;
        let state = contain("serializeState", || Ok(game.serialize_state()))?;
        if state.is_none() {
            log::debug!("serializeState unsupported; checkpoint skipped");
        }
        Ok(state)
    }

    async fn deserialize_state(&mut self, state: &CheckpointState) -> Result<bool, HarnessError> {
        self.release_all().await;
        let game = &mut self.game;
        let restored = contain("deserializeState", || game.deserialize_state(state))?;
        if restored {
            self.latest = None;
        } else {
            log::debug!("deserializeState unsupported; restore skipped");
        }
        Ok(restored)
    }

    async fn force_start(&mut self) -> Result<bool, HarnessError> {
        self.release_all().await;
        self.latest = None;
        let game = &mut self.game;
        contain("forceStart", || game.force_start())
    }

    async fn reload(&mut self) -> Result<(), HarnessError> {
        self.force_start().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Direction;
    use crate::executor::KeymapExecutor;
    use crate::invariant::health_not_negative;
    use crate::vision::PlayerRecord;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct ScriptedGame {
        health: f64,
        pressed: BTreeSet<String>,
        events: Vec<InputEvent>,
        fail_holds: u32,
        panic_on_vision: bool,
    }

    impl VisionAdapter for ScriptedGame {
        fn game_info(&self) -> GameInfo {
            GameInfo {
                name: "scripted".into(),
                ..GameInfo::default()
            }
        }

        fn vision(&self) -> Result<VisionSnapshot, AdapterError> {
            assert!(!self.panic_on_vision, "vision exploded");
            Ok(VisionSnapshot::new("playing").with_player(PlayerRecord {
                health: Some(self.health),
                ..PlayerRecord::default()
            }))
        }
    }

    #[async_trait]
    impl InputSink for ScriptedGame {
        async fn dispatch(&mut self, event: &InputEvent) -> Result<(), AdapterError> {
            match event {
                InputEvent::KeyDown { key } => {
                    self.pressed.insert(key.clone());
                }
                InputEvent::KeyUp { key } => {
                    self.pressed.remove(key);
                }
                _ => {}
            }
            self.events.push(event.clone());
            Ok(())
        }

        async fn hold(&mut self, _duration: Duration) -> Result<(), AdapterError> {
            if self.fail_holds > 0 {
                self.fail_holds -= 1;
                return Err(AdapterError::new("input layer froze"));
            }
            Ok(())
        }
    }

    impl StateHooks for ScriptedGame {}

    fn harness(game: ScriptedGame) -> HarnessCore<ScriptedGame, KeymapExecutor> {
        HarnessCore::new(game, KeymapExecutor::default(), InvariantRegistry::new())
    }

    #[test]
    fn execute_releases_every_key_it_pressed() {
        let mut core = harness(ScriptedGame::default());
        tokio_test::block_on(async {
            core.execute(&Action::move_dir(Direction::UpLeft), Duration::ZERO)
                .await
                .unwrap();
            assert!(core.game().pressed.is_empty());
            core.execute(&Action::move_dir(Direction::Down), Duration::ZERO)
                .await
                .unwrap();
        });
        assert!(core.game().pressed.is_empty());
        assert!(core.held_keys().is_empty());
        assert_eq!(
            core.game().events.first(),
            Some(&InputEvent::KeyDown { key: "a".into() })
        );
    }

    #[test]
    fn failed_hold_does_not_leave_stuck_keys() {
        let mut core = harness(ScriptedGame {
            fail_holds: 1,
            ..ScriptedGame::default()
        });
        tokio_test::block_on(async {
            let err = core
                .execute(&Action::move_dir(Direction::Right), Duration::ZERO)
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::Adapter { operation: "execute", .. }));
            assert!(core.game().pressed.is_empty());
            core.execute(&Action::move_dir(Direction::Left), Duration::ZERO)
                .await
                .unwrap();
        });
        assert!(core.game().pressed.is_empty());
    }

    #[test]
    fn adapter_panic_becomes_typed_error() {
        let mut core = harness(ScriptedGame {
            panic_on_vision: true,
            ..ScriptedGame::default()
        });
        let err = tokio_test::block_on(core.vision()).unwrap_err();
        match err {
            HarnessError::Panic { operation, message } => {
                assert_eq!(operation, "getVision");
                assert!(message.contains("vision exploded"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invariants_use_latest_snapshot() {
        let mut core = harness(ScriptedGame {
            health: -5.0,
            ..ScriptedGame::default()
        });
        core.invariants_mut().register(health_not_negative());
        let violations = tokio_test::block_on(core.check_invariants()).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "healthNotNegative");
    }

    #[test]
    fn missing_hooks_degrade_to_no_ops() {
        let mut core = harness(ScriptedGame::default());
        tokio_test::block_on(async {
            assert_eq!(core.serialize_state().await.unwrap(), None);
            assert!(!core
                .deserialize_state(&CheckpointState::default())
                .await
                .unwrap());
            assert!(!core.force_start().await.unwrap());
            core.reload().await.unwrap();
            assert_eq!(core.screenshot().await.unwrap(), None);
        });
    }
}
