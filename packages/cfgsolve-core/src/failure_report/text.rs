//! Legacy text failure-report loader: three separate strings for the
//! crash stack, `obsYes`, and `obsNo`.
//!
//! Crash-stack text format: frames separated by `;`, each frame either
//! `entry1,entry2|call1,call2` (a call frame) or a single group for the
//! terminal crash frame. `obsYes` text format: `;` separates vectors, `|`
//! separates a vector's ordered groups, `,` separates ambiguity members
//! within a group. `obsNo` text format: `;`-separated groups, `,`-separated
//! members within each.

use super::{CrashStack, FailureReport, Group, StackFrame, YesVector};
use crate::errors::{Result, SolveError};

fn split_group(s: &str) -> Group {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_crash_stack(s: &str) -> Result<CrashStack> {
    let frame_strs: Vec<&str> = s.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if frame_strs.is_empty() {
        return Err(SolveError::invalid_input("crash stack text is empty"));
    }
    let mut frames = Vec::with_capacity(frame_strs.len());
    let last_idx = frame_strs.len() - 1;
    for (i, f) in frame_strs.iter().enumerate() {
        if i == last_idx {
            frames.push(StackFrame::Crash {
                crash: split_group(f),
            });
        } else {
            let mut parts = f.splitn(2, '|');
            let entry = parts.next().map(split_group).unwrap_or_default();
            let call = parts.next().map(split_group).unwrap_or_default();
            frames.push(StackFrame::Call { entry, call });
        }
    }
    Ok(CrashStack(frames))
}

fn parse_obs_yes(s: &str) -> Vec<YesVector> {
    s.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|vector_str| {
            let groups = vector_str
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(split_group)
                .collect();
            YesVector(groups)
        })
        .collect()
}

fn parse_obs_no(s: &str) -> Vec<Group> {
    s.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(split_group)
        .collect()
}

pub fn load(crash_stack_text: &str, obs_yes_text: &str, obs_no_text: &str) -> Result<FailureReport> {
    let crash_stack = parse_crash_stack(crash_stack_text)?;
    let obs_yes = parse_obs_yes(obs_yes_text);
    let obs_no = parse_obs_no(obs_no_text);
    FailureReport::new(crash_stack, obs_yes, obs_no)
}
