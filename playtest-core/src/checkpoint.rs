use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vision::Position;

/// Minimal projection of game state that restores play without replaying
/// history. Only save/restore tooling reads it; the driver loop never does.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
    /// Game-specific remainder needed for an exact restore.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl CheckpointState {
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<f64> {
        self.resources.get(name).copied()
    }
}
