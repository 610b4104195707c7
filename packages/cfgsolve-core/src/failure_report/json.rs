//! JSON failure-report loader (current and legacy wire formats, §6).

use serde::Deserialize;
use serde_json::Value;

use super::{CrashStack, FailureReport, Group, StackFrame, YesVector};
use crate::errors::{Result, SolveError};

#[derive(Debug, Deserialize)]
struct RawObsYesEntry {
    reliable: bool,
    entries: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    crashstack: Option<Vec<StackFrame>>,
    #[serde(default)]
    stack: Option<Vec<StackFrame>>,
    #[serde(default)]
    crash: Option<Group>,
    #[serde(default, rename = "obsYes")]
    obs_yes: Vec<RawObsYesEntry>,
    #[serde(default, rename = "obsNo")]
    obs_no: Vec<Group>,
}

/// Parse a failure-report JSON document into a [`FailureReport`]. Accepts
/// both the current `"crashstack"` wire format and the legacy
/// `"stack"` + `"crash"` form, where the legacy crash group is appended to
/// the legacy call-only stack as the terminal crash frame.
pub fn load(text: &str) -> Result<FailureReport> {
    let value: Value = serde_json::from_str(text)?;
    let raw: RawReport = serde_json::from_value(value)?;

    let frames = match (raw.crashstack, raw.stack, raw.crash) {
        (Some(frames), _, _) => frames,
        (None, Some(mut call_frames), Some(crash)) => {
            call_frames.push(StackFrame::Crash { crash });
            call_frames
        }
        (None, Some(_), None) => {
            return Err(SolveError::invalid_input(
                "legacy failure report has 'stack' but no terminal 'crash' group",
            ))
        }
        (None, None, _) => {
            return Err(SolveError::invalid_input(
                "failure report has neither 'crashstack' nor legacy 'stack'/'crash'",
            ))
        }
    };

    let mut obs_yes = Vec::with_capacity(raw.obs_yes.len());
    for entry in raw.obs_yes {
        if entry.reliable {
            return Err(SolveError::invalid_input(
                "obsYes entries with reliable:true are rejected",
            ));
        }
        obs_yes.push(YesVector(entry.entries));
    }

    FailureReport::new(CrashStack(frames), obs_yes, raw.obs_no)
}
