//! `GameHarness` over the page-side `window.__playtestHarness` object.
//!
//! Every call goes through one async wrapper script that resolves promises
//! and catches in-page exceptions, so a WebDriver error always means the
//! browser or session itself failed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use playtest_core::{
    Action, CheckpointState, GameHarness, GameInfo, HarnessError, Violation, VisionSnapshot,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thirtyfour::prelude::*;

pub const HARNESS_GLOBAL: &str = "window.__playtestHarness";

/// Methods the page must expose before a run can start.
pub const REQUIRED_METHODS: [&str; 4] = ["getGameInfo", "getVision", "execute", "checkInvariants"];

const CALL_SCRIPT: &str = r"
const done = arguments[arguments.length - 1];
const method = arguments[0];
const params = arguments[1] || [];
const harness = window.__playtestHarness;
if (!harness) { done({ ok: false, missing: true }); return; }
if (typeof harness[method] !== 'function') { done({ ok: false, unsupported: true }); return; }
Promise.resolve()
  .then(() => harness[method](...params))
  .then(
    (value) => done({ ok: true, value: value === undefined ? null : value }),
    (err) => done({ ok: false, error: String((err && err.message) || err) }),
  );
";

const PROBE_SCRIPT: &str = r"
const harness = window.__playtestHarness;
if (!harness) { return null; }
return arguments[0].filter((name) => typeof harness[name] !== 'function');
";

/// Envelope produced by [`CALL_SCRIPT`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Reply {
    ok: bool,
    value: Value,
    error: Option<String>,
    missing: bool,
    unsupported: bool,
}

/// What a harness call produced once the envelope is unpacked.
#[derive(Debug, PartialEq)]
enum CallResult {
    Value(Value),
    Unsupported,
}

fn unpack(operation: &'static str, raw: Value) -> Result<CallResult, HarnessError> {
    let reply: Reply = serde_json::from_value(raw).map_err(|err| HarnessError::Serialization {
        operation,
        message: err.to_string(),
    })?;
    if reply.missing {
        return Err(HarnessError::Host(format!(
            "{HARNESS_GLOBAL} disappeared during `{operation}`"
        )));
    }
    if reply.unsupported {
        return Ok(CallResult::Unsupported);
    }
    if !reply.ok {
        return Err(HarnessError::Adapter {
            operation,
            message: reply.error.unwrap_or_else(|| "unknown page error".to_string()),
        });
    }
    Ok(CallResult::Value(reply.value))
}

fn decode<T: DeserializeOwned>(operation: &'static str, value: Value) -> Result<T, HarnessError> {
    serde_json::from_value(value).map_err(|err| HarnessError::Serialization {
        operation,
        message: err.to_string(),
    })
}

fn host(err: &WebDriverError) -> HarnessError {
    HarnessError::Host(err.to_string())
}

#[derive(Debug, Clone)]
pub struct PageHarness {
    driver: WebDriver,
    base_url: String,
    attach_timeout: Duration,
}

impl PageHarness {
    /// Navigate to the game and verify the harness before anything runs.
    pub async fn attach(
        driver: WebDriver,
        base_url: &str,
        attach_timeout: Duration,
    ) -> Result<Self, HarnessError> {
        let page = Self {
            driver,
            base_url: base_url.to_string(),
            attach_timeout,
        };
        page.driver.goto(page.base_url.as_str()).await.map_err(|e| host(&e))?;
        page.verify().await?;
        Ok(page)
    }

    pub const fn driver(&self) -> &WebDriver {
        &self.driver
    }

    /// Wait for the global, then fail fast on any missing required method.
    async fn verify(&self) -> Result<(), HarnessError> {
        let deadline = Instant::now() + self.attach_timeout;
        loop {
            let ret = self
                .driver
                .execute(PROBE_SCRIPT, vec![json!(REQUIRED_METHODS)])
                .await
                .map_err(|e| host(&e))?;
            match ret.json() {
                Value::Array(missing) if missing.is_empty() => {
                    log::info!("attached to {HARNESS_GLOBAL} at {}", self.base_url);
                    return Ok(());
                }
                Value::Array(missing) => {
                    let names: Vec<String> = missing
                        .iter()
                        .map(|name| name.as_str().unwrap_or("?").to_string())
                        .collect();
                    return Err(HarnessError::Protocol(format!(
                        "{HARNESS_GLOBAL} is missing required method(s): {}",
                        names.join(", ")
                    )));
                }
                _ if Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                _ => {
                    return Err(HarnessError::Protocol(format!(
                        "{HARNESS_GLOBAL} not found at {} after {:?}",
                        self.base_url, self.attach_timeout
                    )));
                }
            }
        }
    }

    async fn call(&self, method: &'static str, params: Vec<Value>) -> Result<CallResult, HarnessError> {
        log::debug!("bridge call {method}");
        let ret = self
            .driver
            .execute_async(CALL_SCRIPT, vec![json!(method), Value::Array(params)])
            .await
            .map_err(|e| host(&e))?;
        unpack(method, ret.json().clone())
    }

    async fn required(&self, method: &'static str, params: Vec<Value>) -> Result<Value, HarnessError> {
        match self.call(method, params).await? {
            CallResult::Value(value) => Ok(value),
            CallResult::Unsupported => Err(HarnessError::Protocol(format!(
                "{HARNESS_GLOBAL}.{method} is no longer a function"
            ))),
        }
    }
}

#[async_trait]
impl GameHarness for PageHarness {
    async fn game_info(&mut self) -> Result<GameInfo, HarnessError> {
        let value = self.required("getGameInfo", Vec::new()).await?;
        decode("getGameInfo", value)
    }

    async fn vision(&mut self) -> Result<VisionSnapshot, HarnessError> {
        let value = self.required("getVision", Vec::new()).await?;
        decode("getVision", value)
    }

    async fn execute(&mut self, action: &Action, duration: Duration) -> Result<(), HarnessError> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.required("execute", vec![action.to_wire(), json!(millis)])
            .await
            .map(|_| ())
    }

    async fn check_invariants(&mut self) -> Result<Vec<Violation>, HarnessError> {
        let value = self
            .required("checkInvariants", Vec::new())
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode("checkInvariants", value)
    }

    async fn serialize_state(&mut self) -> Result<Option<CheckpointState>, HarnessError> {
        match self.call("serializeState", Vec::new()).await? {
            CallResult::Value(Value::Null) | CallResult::Unsupported => {
                log::debug!("serializeState unavailable; checkpoint skipped");
                Ok(None)
            }
            CallResult::Value(value) => decode("serializeState", value).map(Some),
        }
    }

    async fn deserialize_state(&mut self, state: &CheckpointState) -> Result<bool, HarnessError> {
        let payload = serde_json::to_value(state).map_err(|err| HarnessError::Serialization {
            operation: "deserializeState",
            message: err.to_string(),
        })?;
        match self
            .call("deserializeState", vec![payload])
            .await?
        {
            CallResult::Value(value) => Ok(value.as_bool().unwrap_or(true)),
            CallResult::Unsupported => Ok(false),
        }
    }

    async fn force_start(&mut self) -> Result<bool, HarnessError> {
        match self.call("forceStart", Vec::new()).await? {
            CallResult::Value(value) => Ok(value.as_bool().unwrap_or(true)),
            CallResult::Unsupported => Ok(false),
        }
    }

    async fn reload(&mut self) -> Result<(), HarnessError> {
        self.driver.refresh().await.map_err(|e| host(&e))?;
        self.verify().await
    }

    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, HarnessError> {
        self.driver
            .screenshot_as_png()
            .await
            .map(Some)
            .map_err(|err| HarnessError::Adapter {
                operation: "screenshot",
                message: err.to_string(),
            })
    }
}
