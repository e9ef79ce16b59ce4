use anyhow::{Context, Result};
use chrono::Utc;
use std::{fs, path::Path, path::PathBuf};
use thirtyfour::prelude::*;

use crate::browser::HARNESS_GLOBAL;

/// `<recordings>/failures/<browser>/<timestamp>` for driver-level failures.
pub fn failure_dir(recordings: &Path, browser: &str) -> PathBuf {
    let ts = Utc::now().format("%Y%m%dT%H%M%S");
    recordings.join("failures").join(browser).join(ts.to_string())
}

pub async fn capture_artifacts(driver: &WebDriver, dir: &Path, err: &anyhow::Error) -> Result<()> {
    let screenshot = driver.screenshot_as_png().await.ok();
    let source = driver.source().await.ok();
    let state = driver
        .execute(
            format!(
                "return {HARNESS_GLOBAL} && {HARNESS_GLOBAL}.getVision && {HARNESS_GLOBAL}.getVision()"
            ),
            vec![],
        )
        .await
        .ok()
        .map(|ret| ret.json().clone());
    let chain = format!("{err:#}");

    write_artifact_files(
        dir,
        screenshot.as_deref(),
        source.as_deref(),
        state.as_ref(),
        &chain,
    )
}

fn write_artifact_files(
    dir: &Path,
    screenshot: Option<&[u8]>,
    source: Option<&str>,
    state: Option<&serde_json::Value>,
    error_chain: &str,
) -> Result<()> {
    fs::create_dir_all(dir).context("creating failure artifacts dir")?;

    if let Some(png) = screenshot {
        let _ = fs::write(dir.join("screenshot.png"), png);
    }

    if let Some(src) = source {
        let _ = fs::write(dir.join("dom.html"), src);
    }

    if let Some(state_json) = state {
        let payload = serde_json::to_vec_pretty(state_json).unwrap_or_default();
        let _ = fs::write(dir.join("state.json"), payload);
    }

    fs::write(dir.join("error.txt"), error_chain).context("writing error.txt")?;

    Ok(())
}
