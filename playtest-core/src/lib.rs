//! Game-agnostic automated playtesting.
//!
//! A controller observes a running game through [`GameHarness::vision`],
//! picks an action with a [`DecisionPolicy`], executes it as held input and
//! checks registered invariants after every step. [`PlaytestDriver`] runs
//! many independent iterations and leaves a [`Recording`] plus an
//! [`IterationLog`] per iteration, and a [`RunSummary`] per batch.

pub mod action;
pub mod artifacts;
pub mod checkpoint;
pub mod driver;
pub mod error;
pub mod executor;
pub mod harness;
pub mod input;
pub mod invariant;
pub mod policy;
pub mod recorder;
pub mod sandbox;
pub mod vision;

pub use action::{Action, ActionSpec, ClickSpec, Direction, MouseSpec};
pub use artifacts::ArtifactStore;
pub use checkpoint::CheckpointState;
pub use driver::{
    DriverConfig, IterationLog, IterationOutcome, OutcomeCounts, PlaytestDriver, RunSummary,
    TestType, merge_metrics,
};
pub use error::{AdapterError, ArtifactError, DriverError, HarnessError, RecorderError};
pub use executor::{ActionExecutor, Keymap, KeymapExecutor};
pub use harness::{GameHarness, GameInfo, HarnessCore, InputSink, StateHooks, VisionAdapter};
pub use input::{HeldKeys, InputChannel, InputEvent, InputPlan, MOUSE_BUTTON};
pub use invariant::{Invariant, InvariantRegistry, Violation};
pub use policy::{
    Decision, DecisionPolicy, PolicyConfig, PolicyPreset, PolicyState, PriorityPolicy, Rule,
    RuleAction, StuckDetector,
};
pub use recorder::{
    InitialState, Issue, Observation, Outcome, Recorder, Recording, RecordingMetadata,
    ScreenshotRef, Step, StepEntry,
};
pub use sandbox::{ArenaConfig, ArenaGame, arena_harness, arena_invariants};
pub use vision::{GameStateTag, PlayerRecord, Position, UiValue, VisibleEntity, VisionSnapshot};
