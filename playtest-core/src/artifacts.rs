use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::checkpoint::CheckpointState;
use crate::driver::{IterationLog, RunSummary, TestType};
use crate::error::ArtifactError;
use crate::recorder::Recording;

/// Plain file-system sink for recordings, screenshots and logs.
///
/// Every iteration owns `iter-NNN-<type>/` plus the sibling
/// `iter-NNN-<type>.json`, so concurrent drivers with disjoint iteration
/// ranges never touch the same file.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem(iteration: u32, test_type: TestType) -> String {
        format!("iter-{iteration:03}-{}", test_type.label())
    }

    #[must_use]
    pub fn iteration_dir(&self, iteration: u32, test_type: TestType) -> PathBuf {
        self.root.join(Self::stem(iteration, test_type))
    }

    #[must_use]
    pub fn recording_path(&self, iteration: u32, test_type: TestType) -> PathBuf {
        self.root
            .join(format!("{}.json", Self::stem(iteration, test_type)))
    }

    /// Store a PNG as `NNN-<name>.png` inside the iteration directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or file cannot be written.
    pub fn write_screenshot(
        &self,
        iteration: u32,
        test_type: TestType,
        sequence: u32,
        name: &str,
        png: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        let dir = self.iteration_dir(iteration, test_type);
        create_dir(&dir)?;
        let path = dir.join(format!("{sequence:03}-{}.png", sanitize(name)));
        write_bytes(&path, png)?;
        Ok(path)
    }

    /// # Errors
    ///
    /// Returns an error when the recording cannot be encoded or written.
    pub fn write_recording(&self, recording: &Recording) -> Result<PathBuf, ArtifactError> {
        let meta = &recording.metadata;
        let path = self.recording_path(meta.iteration, meta.test_type);
        create_dir(&self.root)?;
        write_json(&path, "recording", recording)?;
        Ok(path)
    }

    /// # Errors
    ///
    /// Returns an error when the log cannot be encoded or written.
    pub fn write_iteration_log(&self, log: &IterationLog) -> Result<PathBuf, ArtifactError> {
        let dir = self.iteration_dir(log.iteration, log.test_type);
        create_dir(&dir)?;
        let path = dir.join("iteration-log.json");
        write_json(&path, "iteration log", log)?;
        Ok(path)
    }

    /// # Errors
    ///
    /// Returns an error when the summary cannot be encoded or written.
    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf, ArtifactError> {
        create_dir(&self.root)?;
        let path = self.root.join("summary.json");
        write_json(&path, "run summary", summary)?;
        Ok(path)
    }

    /// # Errors
    ///
    /// Returns an error when the checkpoint cannot be encoded or written.
    pub fn write_checkpoint(
        &self,
        after_iteration: u32,
        state: &CheckpointState,
    ) -> Result<PathBuf, ArtifactError> {
        create_dir(&self.root)?;
        let path = self
            .root
            .join(format!("checkpoint-{after_iteration:03}.json"));
        write_json(&path, "checkpoint", state)?;
        Ok(path)
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "frame".to_string()
    } else {
        cleaned
    }
}

fn create_dir(dir: &Path) -> Result<(), ArtifactError> {
    fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
        path: dir.display().to_string(),
        source,
    })
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    fs::write(path, bytes).map_err(|source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, what: &'static str, value: &T) -> Result<(), ArtifactError> {
    let payload =
        serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Encode { what, source })?;
    write_bytes(path, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{InitialState, Outcome, Recorder, RecordingMetadata};
    use serde_json::Value;

    #[test]
    fn layout_is_partitioned_by_iteration() {
        let store = ArtifactStore::new("recordings");
        assert_eq!(
            store.iteration_dir(7, TestType::BugRepro),
            PathBuf::from("recordings/iter-007-bug_repro")
        );
        assert_eq!(
            store.recording_path(7, TestType::BugRepro),
            PathBuf::from("recordings/iter-007-bug_repro.json")
        );
    }

    #[test]
    fn screenshots_and_recordings_land_on_disk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(tmp.path());
        let shot = store
            .write_screenshot(1, TestType::GeneralPlaytest, 2, "boss fight!", &[137, 80, 78, 71])
            .expect("screenshot");
        assert!(shot.ends_with("iter-001-general_playtest/002-boss-fight-.png"));
        assert!(shot.exists());

        let mut recorder = Recorder::new();
        recorder
            .start(
                RecordingMetadata {
                    game: "arena".into(),
                    framework: "sandbox".into(),
                    iteration: 1,
                    test_type: TestType::GeneralPlaytest,
                    started_at: "2026-01-01T00:00:00Z".into(),
                    duration_ms: 0,
                    agent_id: "a".into(),
                },
                InitialState::default(),
            )
            .expect("start");
        let recording = recorder.end(Outcome::default(), Value::Null).expect("end");
        let path = store.write_recording(&recording).expect("recording");
        let written: Recording =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("decode");
        assert_eq!(written, recording);
    }

    #[test]
    fn sanitize_keeps_names_filesystem_safe() {
        assert_eq!(sanitize("wave 3/boss"), "wave-3-boss");
        assert_eq!(sanitize(""), "frame");
    }
}
