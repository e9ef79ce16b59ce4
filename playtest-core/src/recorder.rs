//! Single-session recording of one playtest iteration.
//!
//! A [`Recorder`] holds at most one open session. Steps are stamped with the
//! milliseconds elapsed since [`Recorder::start`]; stamps never decrease.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::action::Action;
use crate::driver::TestType;
use crate::error::RecorderError;
use crate::invariant::Violation;
use crate::vision::{GameStateTag, UiValue, VisionSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub game: String,
    pub framework: String,
    pub iteration: u32,
    pub test_type: TestType,
    pub started_at: String,
    /// Filled in when the session ends.
    #[serde(default)]
    pub duration_ms: u64,
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InitialState {
    /// Debug hooks used to reach a playable state (e.g. `forceStart`).
    pub used_debug_commands: Vec<String>,
    pub game_state: Value,
}

/// What the harness saw after a step was executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub game_state: GameStateTag,
    #[serde(default)]
    pub ui: BTreeMap<String, UiValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// SHA-256 of the snapshot's JSON encoding.
    pub digest: String,
}

impl Observation {
    #[must_use]
    pub fn new(snapshot: &VisionSnapshot, violations: Vec<Violation>) -> Self {
        Self {
            game_state: snapshot.game_state.clone(),
            ui: snapshot.ui.clone(),
            violations,
            note: None,
            digest: snapshot_digest(snapshot),
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// Hex SHA-256 of a snapshot, used to check replays against recordings.
#[must_use]
pub fn snapshot_digest(snapshot: &VisionSnapshot) -> String {
    let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Question for a reviewer looking at the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub t: u64,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotRef>,
}

/// Input to [`Recorder::step`]; the recorder assigns `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEntry {
    pub intent: String,
    pub action: Option<Action>,
    pub duration_ms: u64,
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub message: String,
    /// First step index where the issue was seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub summary: String,
    pub issues_found: Vec<Issue>,
    pub issues_verified_fixed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub metadata: RecordingMetadata,
    pub initial_state: InitialState,
    pub steps: Vec<Step>,
    pub outcome: Outcome,
    pub final_state: Value,
}

#[derive(Debug)]
struct Session {
    opened: Instant,
    last_t: u64,
    metadata: RecordingMetadata,
    initial_state: InitialState,
    steps: Vec<Step>,
}

impl Session {
    fn stamp(&mut self) -> u64 {
        let elapsed = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_t = self.last_t.max(elapsed);
        self.last_t
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    session: Option<Session>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Open a session.
    ///
    /// # Errors
    ///
    /// [`RecorderError::SessionOpen`] when a session is already open.
    pub fn start(
        &mut self,
        metadata: RecordingMetadata,
        initial_state: InitialState,
    ) -> Result<(), RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::SessionOpen);
        }
        self.session = Some(Session {
            opened: Instant::now(),
            last_t: 0,
            metadata,
            initial_state,
            steps: Vec::new(),
        });
        Ok(())
    }

    fn session(&mut self) -> Result<&mut Session, RecorderError> {
        self.session.as_mut().ok_or(RecorderError::NoSession)
    }

    /// Append a step and return its timestamp.
    ///
    /// # Errors
    ///
    /// [`RecorderError::NoSession`] when no session is open.
    pub fn step(&mut self, entry: StepEntry) -> Result<u64, RecorderError> {
        let session = self.session()?;
        let t = session.stamp();
        session.steps.push(Step {
            t,
            intent: entry.intent,
            action: entry.action,
            duration_ms: entry.duration_ms,
            observation: entry.observation,
            screenshot: None,
        });
        Ok(t)
    }

    /// Append a screenshot reference step.
    ///
    /// # Errors
    ///
    /// [`RecorderError::NoSession`] when no session is open.
    pub fn screenshot(
        &mut self,
        name: &str,
        path: Option<String>,
        question: Option<String>,
    ) -> Result<u64, RecorderError> {
        let session = self.session()?;
        let t = session.stamp();
        session.steps.push(Step {
            t,
            intent: "screenshot".to_string(),
            action: None,
            duration_ms: 0,
            observation: None,
            screenshot: Some(ScreenshotRef {
                name: name.to_string(),
                path,
                question,
            }),
        });
        Ok(t)
    }

    /// Seal the session and hand back the finished recording.
    ///
    /// # Errors
    ///
    /// [`RecorderError::NoSession`] when no session is open.
    pub fn end(&mut self, outcome: Outcome, final_state: Value) -> Result<Recording, RecorderError> {
        let mut session = self.session.take().ok_or(RecorderError::NoSession)?;
        session.metadata.duration_ms = session.stamp();
        Ok(Recording {
            metadata: session.metadata,
            initial_state: session.initial_state,
            steps: session.steps,
            outcome,
            final_state,
        })
    }
}
