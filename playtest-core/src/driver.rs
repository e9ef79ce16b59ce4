//! Iteration loop: observe, decide, act, check, record.
//!
//! Each iteration moves through `Init → Running → {Victory, Death, Timeout,
//! Error} → Finalized`. Terminal transitions come only from the snapshot's
//! `gameState`; the step ceiling turns into `Timeout`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::ArtifactStore;
use crate::error::{DriverError, HarnessError};
use crate::harness::{GameHarness, GameInfo};
use crate::invariant::Violation;
use crate::policy::DecisionPolicy;
use crate::recorder::{
    InitialState, Issue, Observation, Outcome, Recorder, RecordingMetadata, StepEntry,
};
use crate::vision::{GameStateTag, VisionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    GeneralPlaytest,
    BugRepro,
    FeatureTest,
}

impl TestType {
    pub const ALL: [Self; 3] = [Self::GeneralPlaytest, Self::BugRepro, Self::FeatureTest];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::GeneralPlaytest => "general_playtest",
            Self::BugRepro => "bug_repro",
            Self::FeatureTest => "feature_test",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| {
                format!(
                    "unknown test type `{s}` (expected one of: general_playtest, bug_repro, feature_test)"
                )
            })
    }
}

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Victory,
    Death,
    Timeout,
    Error,
}

impl IterationOutcome {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Victory => "victory",
            Self::Death => "death",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    fn from_state(state: &GameStateTag) -> Option<Self> {
        match state {
            GameStateTag::Victory => Some(Self::Victory),
            GameStateTag::GameOver => Some(Self::Death),
            _ => None,
        }
    }
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub iterations: u32,
    /// Index of the first iteration; lets parallel drivers use disjoint ranges.
    pub first_iteration: u32,
    /// Ceiling on executed actions per iteration.
    pub max_steps: u32,
    /// How long each action's input is held.
    pub step_duration_ms: u64,
    /// Periodic screenshot cadence; `0` disables periodic captures.
    pub screenshot_interval_ms: u64,
    /// Reload the host after this many iterations; `0` disables.
    pub checkpoint_every: u32,
    /// Consecutive host reload attempts before the run aborts.
    pub max_recoveries: u32,
    pub test_type: TestType,
    /// Invariant or issue id a `bug_repro` run tries to reproduce.
    pub target: Option<String>,
    pub agent_id: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            first_iteration: 1,
            max_steps: 500,
            step_duration_ms: 100,
            screenshot_interval_ms: 5_000,
            checkpoint_every: 25,
            max_recoveries: 3,
            test_type: TestType::GeneralPlaytest,
            target: None,
            agent_id: "playtest-agent".to_string(),
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub const fn step_duration(&self) -> Duration {
        Duration::from_millis(self.step_duration_ms)
    }

    /// Periodic screenshot cadence expressed in executed steps.
    #[must_use]
    pub fn screenshot_every_steps(&self) -> Option<u32> {
        if self.screenshot_interval_ms == 0 {
            return None;
        }
        let steps = self.screenshot_interval_ms / self.step_duration_ms.max(1);
        Some(u32::try_from(steps).unwrap_or(u32::MAX).max(1))
    }
}

/// Per-iteration result, flushed once when the iteration ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationLog {
    pub game: String,
    pub iteration: u32,
    pub test_type: TestType,
    pub started_at: String,
    pub outcome: IterationOutcome,
    pub metrics: BTreeMap<String, f64>,
    pub steps: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub victory: u32,
    pub death: u32,
    pub timeout: u32,
    pub error: u32,
}

impl OutcomeCounts {
    fn bump(&mut self, outcome: IterationOutcome) {
        match outcome {
            IterationOutcome::Victory => self.victory += 1,
            IterationOutcome::Death => self.death += 1,
            IterationOutcome::Timeout => self.timeout += 1,
            IterationOutcome::Error => self.error += 1,
        }
    }
}

/// Batch-level result written as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub game: String,
    pub test_type: TestType,
    pub agent_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub iterations_planned: u32,
    pub iterations_completed: u32,
    pub outcomes: OutcomeCounts,
    /// Per-metric sums across completed iterations.
    pub totals: BTreeMap<String, f64>,
    pub reloads: u32,
    pub recoveries: u32,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub iterations: Vec<IterationLog>,
}

impl RunSummary {
    fn new(config: &DriverConfig) -> Self {
        Self {
            game: String::new(),
            test_type: config.test_type,
            agent_id: config.agent_id.clone(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            iterations_planned: config.iterations,
            iterations_completed: 0,
            outcomes: OutcomeCounts::default(),
            totals: BTreeMap::new(),
            reloads: 0,
            recoveries: 0,
            aborted: false,
            abort_reason: None,
            iterations: Vec::new(),
        }
    }

    /// Summary for a run that ended before any iteration could start.
    #[must_use]
    pub fn aborted(config: &DriverConfig, reason: impl Into<String>) -> Self {
        let mut summary = Self::new(config);
        summary.aborted = true;
        summary.abort_reason = Some(reason.into());
        summary.finished_at = Some(Utc::now().to_rfc3339());
        summary
    }

    fn absorb(&mut self, log: IterationLog) {
        self.iterations_completed += 1;
        self.outcomes.bump(log.outcome);
        merge_metrics(&mut self.totals, &log.metrics);
        self.iterations.push(log);
    }

    /// No iteration errored and the run was not aborted.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.aborted && self.outcomes.error == 0
    }
}

/// Fold `metrics` into `totals` by summation.
pub fn merge_metrics(totals: &mut BTreeMap<String, f64>, metrics: &BTreeMap<String, f64>) {
    for (name, value) in metrics {
        *totals.entry(name.clone()).or_insert(0.0) += value;
    }
}

/// Running observations for the iteration in progress.
#[derive(Debug, Default)]
struct IterationTracker {
    steps: u32,
    violations: u32,
    stuck_escapes: u32,
    screenshots: u32,
    last_numeric: BTreeMap<String, f64>,
    issues: Vec<Issue>,
    last_snapshot: Option<VisionSnapshot>,
}

impl IterationTracker {
    fn observe(&mut self, snapshot: &VisionSnapshot, violations: &[Violation]) {
        self.last_numeric = snapshot.numeric_fields();
        self.violations += u32::try_from(violations.len()).unwrap_or(u32::MAX);
        for violation in violations {
            if !self.issues.iter().any(|issue| issue.id == violation.name) {
                self.issues.push(Issue {
                    id: violation.name.clone(),
                    message: violation.message.clone(),
                    step: Some(self.steps),
                });
            }
        }
        self.last_snapshot = Some(snapshot.clone());
    }

    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.last_numeric.clone();
        metrics.insert("steps".to_string(), f64::from(self.steps));
        metrics.insert("invariant_violations".to_string(), f64::from(self.violations));
        metrics.insert("stuck_escapes".to_string(), f64::from(self.stuck_escapes));
        metrics
    }
}

/// What a finished iteration hands back to the batch loop.
struct IterationReport {
    log: IterationLog,
    failure: Option<HarnessError>,
}

/// Runs playtest iterations against one harness.
pub struct PlaytestDriver<H> {
    harness: H,
    policy: Box<dyn DecisionPolicy>,
    config: DriverConfig,
    recorder: Recorder,
    store: Option<ArtifactStore>,
    info: GameInfo,
    host_failures: u32,
}

impl<H: GameHarness> PlaytestDriver<H> {
    #[must_use]
    pub fn new(harness: H, policy: Box<dyn DecisionPolicy>, config: DriverConfig) -> Self {
        Self {
            harness,
            policy,
            config,
            recorder: Recorder::new(),
            store: None,
            info: GameInfo::default(),
            host_failures: 0,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[must_use]
    pub const fn harness(&self) -> &H {
        &self.harness
    }

    /// Run the whole batch. Always returns a summary; a driver-level failure
    /// is reported through `aborted` / `abort_reason`.
    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::new(&self.config);
        if let Err(err) = self.run_batch(&mut summary).await {
            log::error!("playtest run aborted: {err}");
            summary.aborted = true;
            summary.abort_reason = Some(err.to_string());
        }
        summary.finished_at = Some(Utc::now().to_rfc3339());
        if let Some(store) = &self.store {
            match store.write_summary(&summary) {
                Ok(path) => log::info!("run summary written to {}", path.display()),
                Err(err) => log::warn!("could not write run summary: {err}"),
            }
        }
        summary
    }

    async fn run_batch(&mut self, summary: &mut RunSummary) -> Result<(), DriverError> {
        self.info = self.harness.game_info().await?;
        summary.game.clone_from(&self.info.name);
        log::info!(
            "playtesting {} ({}) for {} iteration(s)",
            self.info.name,
            self.config.test_type,
            self.config.iterations
        );

        let first = self.config.first_iteration;
        let last = first.saturating_add(self.config.iterations);
        for iteration in first..last {
            let report = self.run_iteration(iteration).await?;
            log::info!(
                "iteration {iteration}: {} after {} step(s)",
                report.log.outcome,
                report.log.steps
            );
            summary.absorb(report.log);

            match report.failure {
                Some(err) if err.is_fatal() => return Err(err.into()),
                Some(err) if err.needs_recovery() => {
                    self.recover(err, summary).await?;
                }
                _ => self.host_failures = 0,
            }

            let done = iteration - first + 1;
            let every = self.config.checkpoint_every;
            if every > 0 && done % every == 0 && iteration + 1 < last {
                self.checkpoint(iteration, summary).await?;
            }
        }
        Ok(())
    }

    /// Reload the host until it comes back, bounded by `max_recoveries`
    /// consecutive attempts.
    async fn recover(&mut self, cause: HarnessError, summary: &mut RunSummary) -> Result<(), DriverError> {
        let mut last = cause;
        loop {
            if self.host_failures >= self.config.max_recoveries {
                return Err(DriverError::RecoveryExhausted {
                    attempts: self.host_failures,
                    last,
                });
            }
            self.host_failures += 1;
            summary.recoveries += 1;
            log::warn!(
                "host failure ({last}); reloading, attempt {}/{}",
                self.host_failures,
                self.config.max_recoveries
            );
            match self.harness.reload().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => last = err,
            }
        }
    }

    /// Periodic save-and-reload that bounds host memory growth.
    async fn checkpoint(&mut self, after: u32, summary: &mut RunSummary) -> Result<(), DriverError> {
        match self.harness.serialize_state().await {
            Ok(Some(state)) => {
                if let Some(store) = &self.store
                    && let Err(err) = store.write_checkpoint(after, &state)
                {
                    log::warn!("could not write checkpoint: {err}");
                }
            }
            Ok(None) => {}
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => log::warn!("checkpoint skipped: {err}"),
        }

        log::info!("reloading host after iteration {after}");
        summary.reloads += 1;
        match self.harness.reload().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) if err.needs_recovery() => self.recover(err, summary).await,
            Err(err) => {
                log::warn!("reload failed: {err}");
                Ok(())
            }
        }
    }

    /// Play one iteration and flush its recording and log.
    ///
    /// Harness failures end the iteration with an `Error` outcome and are
    /// handed back to the caller for classification.
    async fn run_iteration(&mut self, iteration: u32) -> Result<IterationReport, DriverError> {
        let started_at = Utc::now().to_rfc3339();
        let mut tracker = IterationTracker::default();
        let mut debug_commands = Vec::new();

        let opening = self.open(&mut debug_commands).await;
        let game_state = opening
            .as_ref()
            .ok()
            .and_then(|snapshot| serde_json::to_value(snapshot).ok())
            .unwrap_or(Value::Null);
        self.recorder.start(
            RecordingMetadata {
                game: self.info.name.clone(),
                framework: self.info.framework.clone(),
                iteration,
                test_type: self.config.test_type,
                started_at: started_at.clone(),
                duration_ms: 0,
                agent_id: self.config.agent_id.clone(),
            },
            InitialState {
                used_debug_commands: debug_commands,
                game_state,
            },
        )?;

        let played = match opening {
            Ok(snapshot) => self.play(iteration, snapshot, &mut tracker).await,
            Err(err) => Err(DriverError::Harness(err)),
        };
        let (outcome, failure) = match played {
            Ok(outcome) => (outcome, None),
            Err(DriverError::Harness(err)) => {
                log::warn!("iteration {iteration} failed: {err}");
                (IterationOutcome::Error, Some(err))
            }
            Err(other) => {
                // Close the session so a later start is not refused.
                let _ = self.recorder.end(Outcome::default(), Value::Null);
                return Err(other);
            }
        };

        if outcome != IterationOutcome::Error && self.config.screenshot_every_steps().is_some() {
            let question = format!("Does the final screen agree with a `{outcome}` outcome?");
            if let Err(err) = self
                .capture(iteration, "final", Some(question), &mut tracker)
                .await
            {
                log::warn!("final screenshot skipped: {err}");
            }
        }

        let record_outcome = self.outcome_record(outcome, failure.as_ref(), &tracker);
        let final_state = tracker
            .last_snapshot
            .as_ref()
            .and_then(|snapshot| serde_json::to_value(snapshot).ok())
            .unwrap_or(Value::Null);
        let recording = self.recorder.end(record_outcome, final_state)?;

        let log = IterationLog {
            game: self.info.name.clone(),
            iteration,
            test_type: self.config.test_type,
            started_at,
            outcome,
            metrics: tracker.metrics(),
            steps: tracker.steps,
            duration_ms: recording.metadata.duration_ms,
            error: failure.as_ref().map(ToString::to_string),
        };

        if let Some(store) = &self.store {
            let path = store.write_recording(&recording)?;
            log::debug!("recording saved to {}", path.display());
            store.write_iteration_log(&log)?;
        }

        Ok(IterationReport { log, failure })
    }

    /// Init phase: skip menus, reset the policy, take the first snapshot.
    async fn open(&mut self, debug_commands: &mut Vec<String>) -> Result<VisionSnapshot, HarnessError> {
        if self.harness.force_start().await? {
            debug_commands.push("forceStart".to_string());
        } else {
            log::debug!("forceStart unavailable; starting from the current screen");
        }
        self.policy.reset();
        self.harness.vision().await
    }

    async fn play(
        &mut self,
        iteration: u32,
        first: VisionSnapshot,
        tracker: &mut IterationTracker,
    ) -> Result<IterationOutcome, DriverError> {
        let screenshot_every = self.config.screenshot_every_steps();
        let duration = self.config.step_duration();
        let duration_ms = self.config.step_duration_ms;

        tracker.last_snapshot = Some(first.clone());
        if screenshot_every.is_some() {
            self.capture(
                iteration,
                "initial",
                Some("Is the game on a playable screen without visual glitches?".to_string()),
                tracker,
            )
            .await?;
        }

        let mut snapshot = first;
        loop {
            if let Some(outcome) = IterationOutcome::from_state(&snapshot.game_state) {
                return Ok(outcome);
            }
            if tracker.steps >= self.config.max_steps {
                return Ok(IterationOutcome::Timeout);
            }

            let decision = self.policy.decide(&snapshot);
            if decision.intent == "stuck-escape" {
                tracker.stuck_escapes += 1;
            }
            log::debug!(
                "iteration {iteration} step {}: {} -> {}",
                tracker.steps,
                decision.intent,
                decision.action.kind()
            );
            self.harness.execute(&decision.action, duration).await?;
            tracker.steps += 1;

            snapshot = self.harness.vision().await?;
            let violations = self.harness.check_invariants().await?;
            for violation in &violations {
                log::warn!(
                    "iteration {iteration} step {}: invariant `{}` violated: {}",
                    tracker.steps,
                    violation.name,
                    violation.message
                );
            }
            tracker.observe(&snapshot, &violations);
            self.recorder.step(StepEntry {
                intent: decision.intent,
                action: Some(decision.action),
                duration_ms,
                observation: Some(
                    Observation::new(&snapshot, violations).with_note(decision.rationale),
                ),
            })?;

            if let Some(every) = screenshot_every
                && tracker.steps % every == 0
            {
                let name = format!("step-{}", tracker.steps);
                self.capture(
                    iteration,
                    &name,
                    Some("Does the screen match the recorded observation?".to_string()),
                    tracker,
                )
                .await?;
            }
        }
    }

    /// Screenshot and a reference step in the recording. No frame, no step;
    /// a frame that cannot be saved is referenced without a path.
    async fn capture(
        &mut self,
        iteration: u32,
        name: &str,
        question: Option<String>,
        tracker: &mut IterationTracker,
    ) -> Result<(), DriverError> {
        let png = match self.harness.screenshot().await {
            Ok(Some(png)) => png,
            Ok(None) => return Ok(()),
            Err(err) if err.is_fatal() || err.needs_recovery() => return Err(err.into()),
            Err(err) => {
                log::warn!("screenshot `{name}` failed: {err}");
                return Ok(());
            }
        };
        tracker.screenshots += 1;
        let path = self.store.as_ref().and_then(|store| {
            store
                .write_screenshot(iteration, self.config.test_type, tracker.screenshots, name, &png)
                .map_err(|err| log::warn!("screenshot `{name}` not saved: {err}"))
                .ok()
                .map(|path| path.display().to_string())
        });
        self.recorder.screenshot(name, path, question)?;
        Ok(())
    }

    fn outcome_record(
        &self,
        outcome: IterationOutcome,
        failure: Option<&HarnessError>,
        tracker: &IterationTracker,
    ) -> Outcome {
        let issues_found = tracker.issues.clone();
        let mut issues_verified_fixed = Vec::new();
        if self.config.test_type == TestType::BugRepro
            && outcome != IterationOutcome::Error
            && let Some(target) = &self.config.target
            && !issues_found.iter().any(|issue| &issue.id == target)
        {
            issues_verified_fixed.push(target.clone());
        }

        let summary = match failure {
            Some(err) => format!("error after {} step(s): {err}", tracker.steps),
            None => format!(
                "{outcome} after {} step(s), {} issue(s) found",
                tracker.steps,
                issues_found.len()
            ),
        };
        Outcome {
            success: outcome != IterationOutcome::Error && issues_found.is_empty(),
            summary,
            issues_found,
            issues_verified_fixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::checkpoint::CheckpointState;
    use crate::policy::{PolicyConfig, PolicyPreset};
    use crate::policy::Decision;
    use crate::vision::PlayerRecord;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Scripted harness: `states` is consumed one entry per `vision` call;
    /// the last entry repeats.
    #[derive(Default)]
    struct StubHarness {
        states: Vec<&'static str>,
        calls: usize,
        executed: usize,
        health: f64,
        fail_vision_on: Vec<usize>,
        host_crash_on: Vec<usize>,
        protocol_broken: bool,
        reloads: u32,
        reload_fails: bool,
        frames: bool,
    }

    impl StubHarness {
        fn playing() -> Self {
            Self {
                states: vec!["playing"],
                health: 10.0,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl GameHarness for StubHarness {
        async fn game_info(&mut self) -> Result<GameInfo, HarnessError> {
            if self.protocol_broken {
                return Err(HarnessError::Protocol("getVision missing".into()));
            }
            Ok(GameInfo {
                name: "stub".into(),
                framework: "test".into(),
                ..GameInfo::default()
            })
        }

        async fn vision(&mut self) -> Result<VisionSnapshot, HarnessError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_vision_on.contains(&call) {
                return Err(HarnessError::Adapter {
                    operation: "getVision",
                    message: "scene not loaded".into(),
                });
            }
            if self.host_crash_on.contains(&call) {
                return Err(HarnessError::Host("page crashed".into()));
            }
            let state = self
                .states
                .get(call)
                .or_else(|| self.states.last())
                .copied()
                .unwrap_or("playing");
            Ok(VisionSnapshot::new(state).with_player(PlayerRecord {
                health: Some(self.health),
                max_health: Some(10.0),
                x: f64::from(u32::try_from(self.executed).unwrap_or(0)),
                ..PlayerRecord::default()
            }))
        }

        async fn execute(&mut self, _action: &Action, _duration: Duration) -> Result<(), HarnessError> {
            self.executed += 1;
            Ok(())
        }

        async fn check_invariants(&mut self) -> Result<Vec<Violation>, HarnessError> {
            if self.health < 0.0 {
                return Ok(vec![Violation {
                    name: "healthNotNegative".into(),
                    message: "player health dropped below zero".into(),
                }]);
            }
            Ok(Vec::new())
        }

        async fn serialize_state(&mut self) -> Result<Option<CheckpointState>, HarnessError> {
            Ok(None)
        }

        async fn deserialize_state(&mut self, _state: &CheckpointState) -> Result<bool, HarnessError> {
            Ok(false)
        }

        async fn force_start(&mut self) -> Result<bool, HarnessError> {
            Ok(true)
        }

        async fn reload(&mut self) -> Result<(), HarnessError> {
            self.reloads += 1;
            if self.reload_fails {
                return Err(HarnessError::Host("navigation failed".into()));
            }
            Ok(())
        }

        async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, HarnessError> {
            Ok(self.frames.then(|| vec![137, 80, 78, 71]))
        }
    }

    /// Logs every `reset` and `decide` so tests can check their order.
    struct ScriptedPolicy {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl DecisionPolicy for ScriptedPolicy {
        fn name(&self) -> &str {
            "scripted"
        }

        fn decide(&mut self, _snapshot: &VisionSnapshot) -> Decision {
            if let Ok(mut events) = self.events.lock() {
                events.push("decide");
            }
            Decision {
                intent: "wait".into(),
                action: Action::Wait,
                rationale: None,
            }
        }

        fn reset(&mut self) {
            if let Ok(mut events) = self.events.lock() {
                events.push("reset");
            }
        }
    }

    fn read_recording(store: &ArtifactStore, iteration: u32) -> crate::recorder::Recording {
        let path = store.recording_path(iteration, TestType::GeneralPlaytest);
        serde_json::from_slice(&std::fs::read(&path).expect("recording")).expect("decode")
    }

    fn driver(harness: StubHarness, config: DriverConfig) -> PlaytestDriver<StubHarness> {
        let policy = PolicyPreset::Shooter.create_policy(&PolicyConfig::default(), 42);
        PlaytestDriver::new(harness, policy, config)
    }

    fn config(iterations: u32, max_steps: u32) -> DriverConfig {
        DriverConfig {
            iterations,
            max_steps,
            step_duration_ms: 0,
            screenshot_interval_ms: 0,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn step_ceiling_yields_timeout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(tmp.path());
        let mut driver = driver(StubHarness::playing(), config(1, 5)).with_store(store.clone());
        let summary = tokio_test::block_on(driver.run());
        assert_eq!(summary.iterations.len(), 1);
        let log = &summary.iterations[0];
        assert_eq!(log.outcome, IterationOutcome::Timeout);
        assert_eq!(log.steps, 5);
        assert_eq!(driver.harness().executed, 5);
        assert_eq!(summary.outcomes.timeout, 1);

        let recording = read_recording(&store, 1);
        assert_eq!(recording.steps.len(), 5);
        assert!(recording.steps.iter().all(|step| step.screenshot.is_none()));
    }

    #[test]
    fn frames_are_referenced_when_capture_is_enabled() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(tmp.path());
        let harness = StubHarness {
            frames: true,
            ..StubHarness::playing()
        };
        let mut cfg = config(1, 2);
        cfg.screenshot_interval_ms = 1;
        let mut driver = driver(harness, cfg).with_store(store.clone());
        tokio_test::block_on(driver.run());

        let recording = read_recording(&store, 1);
        let names: Vec<_> = recording
            .steps
            .iter()
            .filter_map(|step| step.screenshot.as_ref().map(|shot| shot.name.as_str()))
            .collect();
        assert_eq!(names, vec!["initial", "step-1", "step-2", "final"]);
        let dir = store.iteration_dir(1, TestType::GeneralPlaytest);
        assert!(dir.join("001-initial.png").exists());
        assert!(dir.join("004-final.png").exists());
    }

    #[test]
    fn unsaved_frame_keeps_the_iteration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(tmp.path());
        // A directory where the first frame should go makes that write fail.
        let dir = store.iteration_dir(1, TestType::GeneralPlaytest);
        std::fs::create_dir_all(dir.join("001-initial.png")).expect("blocker");

        let harness = StubHarness {
            frames: true,
            ..StubHarness::playing()
        };
        let mut cfg = config(1, 2);
        cfg.screenshot_interval_ms = 1;
        let mut driver = driver(harness, cfg).with_store(store.clone());
        let summary = tokio_test::block_on(driver.run());

        assert!(!summary.aborted);
        assert_eq!(summary.iterations[0].outcome, IterationOutcome::Timeout);
        let recording = read_recording(&store, 1);
        let initial = recording.steps[0].screenshot.as_ref().expect("initial frame");
        assert_eq!(initial.name, "initial");
        assert!(initial.path.is_none());
        assert!(dir.join("002-step-1.png").exists());
        assert!(dir.join("iteration-log.json").exists());
    }

    #[test]
    fn policy_resets_before_every_iteration() {
        // Iteration 1 takes vision calls 0..=2; iteration 2 fails on its first.
        let harness = StubHarness {
            fail_vision_on: vec![3],
            ..StubHarness::playing()
        };
        let events = Arc::new(Mutex::new(Vec::new()));
        let policy = Box::new(ScriptedPolicy {
            events: Arc::clone(&events),
        });
        let mut driver = PlaytestDriver::new(harness, policy, config(3, 2));
        let summary = tokio_test::block_on(driver.run());

        let outcomes: Vec<_> = summary.iterations.iter().map(|log| log.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                IterationOutcome::Timeout,
                IterationOutcome::Error,
                IterationOutcome::Timeout
            ]
        );
        let events = events.lock().expect("events").clone();
        assert_eq!(
            events,
            vec!["reset", "decide", "decide", "reset", "reset", "decide", "decide"]
        );
    }

    #[test]
    fn gameover_on_first_snapshot_is_death_without_actions() {
        let harness = StubHarness {
            states: vec!["gameover"],
            ..StubHarness::playing()
        };
        let mut driver = driver(harness, config(1, 5));
        let summary = tokio_test::block_on(driver.run());
        assert_eq!(summary.iterations[0].outcome, IterationOutcome::Death);
        assert_eq!(summary.iterations[0].steps, 0);
        assert_eq!(driver.harness().executed, 0);
    }

    #[test]
    fn victory_comes_from_game_state() {
        let harness = StubHarness {
            states: vec!["playing", "playing", "victory"],
            ..StubHarness::playing()
        };
        let mut driver = driver(harness, config(1, 50));
        let summary = tokio_test::block_on(driver.run());
        assert_eq!(summary.iterations[0].outcome, IterationOutcome::Victory);
        assert_eq!(summary.iterations[0].steps, 2);
    }

    #[test]
    fn adapter_error_is_isolated_to_its_iteration() {
        // Iteration 1 uses vision calls 0..=3; the first call of iteration 2 fails.
        let harness = StubHarness {
            fail_vision_on: vec![4],
            ..StubHarness::playing()
        };
        let mut driver = driver(harness, config(3, 3));
        let summary = tokio_test::block_on(driver.run());
        let outcomes: Vec<_> = summary.iterations.iter().map(|log| log.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                IterationOutcome::Timeout,
                IterationOutcome::Error,
                IterationOutcome::Timeout
            ]
        );
        assert!(summary.iterations[1].error.as_deref().is_some_and(|e| e.contains("scene not loaded")));
        assert!(!summary.aborted);
        assert!(!summary.is_clean());
    }

    #[test]
    fn protocol_violation_aborts_before_any_iteration() {
        let harness = StubHarness {
            protocol_broken: true,
            ..StubHarness::playing()
        };
        let mut driver = driver(harness, config(2, 3));
        let summary = tokio_test::block_on(driver.run());
        assert!(summary.aborted);
        assert!(summary.iterations.is_empty());
        assert!(summary.abort_reason.is_some_and(|r| r.contains("getVision missing")));
    }

    #[test]
    fn host_crash_reloads_and_resumes() {
        let harness = StubHarness {
            host_crash_on: vec![1],
            ..StubHarness::playing()
        };
        let mut driver = driver(harness, config(2, 2));
        let summary = tokio_test::block_on(driver.run());
        assert!(!summary.aborted);
        assert_eq!(summary.recoveries, 1);
        assert_eq!(driver.harness().reloads, 1);
        assert_eq!(summary.iterations[0].outcome, IterationOutcome::Error);
        assert_eq!(summary.iterations[1].outcome, IterationOutcome::Timeout);
    }

    #[test]
    fn failing_reloads_exhaust_recovery() {
        let harness = StubHarness {
            host_crash_on: vec![0],
            reload_fails: true,
            ..StubHarness::playing()
        };
        let mut cfg = config(3, 2);
        cfg.max_recoveries = 2;
        let mut driver = driver(harness, cfg);
        let summary = tokio_test::block_on(driver.run());
        assert!(summary.aborted);
        assert_eq!(driver.harness().reloads, 2);
        assert_eq!(summary.iterations_completed, 1);
    }

    #[test]
    fn periodic_reload_between_iterations() {
        let mut cfg = config(5, 1);
        cfg.checkpoint_every = 2;
        let mut driver = driver(StubHarness::playing(), cfg);
        let summary = tokio_test::block_on(driver.run());
        // After iterations 2 and 4; never after the last one.
        assert_eq!(summary.reloads, 2);
        assert_eq!(driver.harness().reloads, 2);
    }

    #[test]
    fn violations_become_issues_and_metrics() {
        let harness = StubHarness {
            health: -5.0,
            ..StubHarness::playing()
        };
        let mut cfg = config(1, 3);
        cfg.test_type = TestType::BugRepro;
        cfg.target = Some("healthNotNegative".into());
        let mut driver = driver(harness, cfg);
        let summary = tokio_test::block_on(driver.run());
        let log = &summary.iterations[0];
        assert_eq!(log.metrics.get("invariant_violations"), Some(&3.0));
        assert_eq!(log.metrics.get("steps"), Some(&3.0));
        assert_eq!(summary.totals.get("steps"), Some(&3.0));
    }

    #[test]
    fn recordings_and_logs_are_written_per_iteration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(tmp.path());
        let mut driver = driver(StubHarness::playing(), config(2, 2)).with_store(store.clone());
        let summary = tokio_test::block_on(driver.run());
        assert_eq!(summary.iterations_completed, 2);
        for iteration in 1..=2 {
            let path = store.recording_path(iteration, TestType::GeneralPlaytest);
            let recording: crate::recorder::Recording =
                serde_json::from_slice(&std::fs::read(&path).expect("recording")).expect("decode");
            assert_eq!(recording.metadata.iteration, iteration);
            assert!(recording.outcome.success);
            assert_eq!(recording.initial_state.used_debug_commands, vec!["forceStart"]);
            assert!(store
                .iteration_dir(iteration, TestType::GeneralPlaytest)
                .join("iteration-log.json")
                .exists());
        }
        assert!(tmp.path().join("summary.json").exists());
    }

    #[test]
    fn aborted_summary_carries_reason() {
        let summary = RunSummary::aborted(&config(4, 10), "harness never attached");
        assert!(summary.aborted);
        assert!(!summary.is_clean());
        assert_eq!(summary.iterations_planned, 4);
        assert_eq!(summary.iterations_completed, 0);
        assert_eq!(summary.abort_reason.as_deref(), Some("harness never attached"));
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn metrics_merge_by_summation() {
        let mut totals = BTreeMap::from([("score".to_string(), 5.0)]);
        let metrics = BTreeMap::from([("score".to_string(), 7.0), ("wave".to_string(), 2.0)]);
        merge_metrics(&mut totals, &metrics);
        assert_eq!(totals.get("score"), Some(&12.0));
        assert_eq!(totals.get("wave"), Some(&2.0));
    }

    #[test]
    fn test_type_parses_cli_spellings() {
        assert_eq!("bug-repro".parse::<TestType>(), Ok(TestType::BugRepro));
        assert_eq!("FEATURE_TEST".parse::<TestType>(), Ok(TestType::FeatureTest));
        assert!("soak".parse::<TestType>().is_err());
    }
}
