//! Generic interpreter for ordered multi-step browser automation.
//!
//! Workflows are data: an ordered list of steps, each with an action kind, a
//! target selector and an interpolatable parameter bag. Step execution is an
//! explicit finite-state machine with per-step retries and best-effort
//! recovery hooks; the first step that exhausts its retries aborts the whole
//! run. The interpreter owns no persistence and no session lifecycle — it
//! drives whatever [`StepExecutor`] it is handed.

pub mod executor;
pub mod interpolate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::extract::rules::RevealPhoneRules;
use crate::utils::error::{AppError, Result};
use interpolate::interpolate;

pub use executor::ChromeExecutor;

pub const MAX_STEP_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Navigate,
    Click,
    Fill,
    Wait,
    Scroll,
    Extract,
    Screenshot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Scroll,
    DismissOverlay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Steps execute in ascending declared order, not array order.
    pub order: u32,
    pub action: StepAction,
    pub selector: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub recovery: Vec<RecoveryAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

/// A step with its selector and parameters already interpolated.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub order: u32,
    pub action: StepAction,
    pub selector: Option<String>,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub text: Option<String>,
    pub links: Vec<String>,
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StepExtract {
    pub step: u32,
    pub text: Option<String>,
    pub links: Vec<String>,
}

/// What a completed run hands back to the caller: extracted text/links per
/// step, screenshots taken, and a chronological text log.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub extracted: Vec<StepExtract>,
    pub screenshots: Vec<String>,
    pub log: Vec<String>,
}

#[derive(Debug)]
pub enum WorkflowOutcome {
    Completed(WorkflowReport),
    Failed {
        step: u32,
        error: String,
        report: WorkflowReport,
    },
}

impl WorkflowOutcome {
    /// Collapse the outcome into a Result, turning a failed step into a
    /// typed error for callers that do not care about partial reports.
    pub fn into_result(self, workflow: &str) -> Result<WorkflowReport> {
        match self {
            WorkflowOutcome::Completed(report) => Ok(report),
            WorkflowOutcome::Failed { step, error, .. } => Err(AppError::Workflow {
                workflow: workflow.to_string(),
                step,
                message: error,
            }),
        }
    }
}

/// Per-step execution states. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Attempting(u32),
    Recovering(u32),
    Succeeded,
    Failed,
}

/// Pure transition function for the step machine. An attempt either
/// succeeds, moves to recovery for another attempt, or exhausts the budget.
pub fn transition(state: StepState, attempt_succeeded: bool, max_attempts: u32) -> StepState {
    match state {
        StepState::Attempting(_) if attempt_succeeded => StepState::Succeeded,
        StepState::Attempting(n) if n < max_attempts => StepState::Recovering(n),
        StepState::Attempting(_) => StepState::Failed,
        StepState::Recovering(n) => StepState::Attempting(n + 1),
        terminal => terminal,
    }
}

/// Executes one resolved step against a live page. The real implementation
/// drives a pooled Chrome tab; tests inject fakes.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &ResolvedStep) -> Result<StepOutput>;
    async fn recover(&self, action: RecoveryAction) -> Result<()>;
    async fn failure_screenshot(&self, label: &str) -> Result<String>;
}

/// Run a workflow to completion or first failed step.
pub async fn run(
    workflow: &Workflow,
    vars: &HashMap<String, String>,
    executor: &dyn StepExecutor,
) -> WorkflowOutcome {
    let mut report = WorkflowReport::default();

    let mut steps: Vec<&WorkflowStep> = workflow.steps.iter().collect();
    steps.sort_by_key(|s| s.order);

    for step in steps {
        let resolved = resolve_step(step, vars);
        match run_step(&resolved, &step.recovery, executor, &mut report).await {
            Ok(output) => {
                if output.text.is_some() || !output.links.is_empty() {
                    report.extracted.push(StepExtract {
                        step: resolved.order,
                        text: output.text,
                        links: output.links,
                    });
                }
                if let Some(path) = output.screenshot {
                    report.screenshots.push(path);
                }
            }
            Err(error) => {
                // Best-effort failure screenshot; its own failure is non-fatal.
                let label = format!("{}-step{}-failed", workflow.name, resolved.order);
                match executor.failure_screenshot(&label).await {
                    Ok(path) => report.screenshots.push(path),
                    Err(e) => debug!(workflow = %workflow.name, error = %e, "Failure screenshot not captured"),
                }
                report
                    .log
                    .push(format!("step {} failed: {}", resolved.order, error));
                return WorkflowOutcome::Failed {
                    step: resolved.order,
                    error,
                    report,
                };
            }
        }
    }

    WorkflowOutcome::Completed(report)
}

fn resolve_step(step: &WorkflowStep, vars: &HashMap<String, String>) -> ResolvedStep {
    ResolvedStep {
        order: step.order,
        action: step.action,
        selector: step
            .selector
            .as_deref()
            .map(|s| interpolate(s, vars)),
        params: step
            .params
            .iter()
            .map(|(k, v)| (k.clone(), interpolate(v, vars)))
            .collect(),
    }
}

async fn run_step(
    resolved: &ResolvedStep,
    recovery: &[RecoveryAction],
    executor: &dyn StepExecutor,
    report: &mut WorkflowReport,
) -> std::result::Result<StepOutput, String> {
    let mut state = StepState::Attempting(1);
    let mut pending: Option<StepOutput> = None;
    let mut last_error = String::new();

    loop {
        state = match state {
            StepState::Attempting(attempt) => {
                report.log.push(format!(
                    "step {} attempt {}/{}: {:?}",
                    resolved.order, attempt, MAX_STEP_ATTEMPTS, resolved.action
                ));
                match executor.execute(resolved).await {
                    Ok(output) => {
                        pending = Some(output);
                        transition(StepState::Attempting(attempt), true, MAX_STEP_ATTEMPTS)
                    }
                    Err(e) => {
                        last_error = e.to_string();
                        report.log.push(format!(
                            "step {} attempt {} failed: {}",
                            resolved.order, attempt, last_error
                        ));
                        transition(StepState::Attempting(attempt), false, MAX_STEP_ATTEMPTS)
                    }
                }
            }
            StepState::Recovering(attempt) => {
                for action in recovery {
                    if let Err(e) = executor.recover(*action).await {
                        debug!(step = resolved.order, error = %e, "Recovery action failed");
                    }
                }
                // Linearly increasing backoff between attempts.
                tokio::time::sleep(Duration::from_millis(
                    RETRY_BACKOFF_BASE_MS * attempt as u64,
                ))
                .await;
                transition(StepState::Recovering(attempt), false, MAX_STEP_ATTEMPTS)
            }
            StepState::Succeeded => return Ok(pending.unwrap_or_default()),
            StepState::Failed => return Err(last_error),
        };
    }
}

/// Canned workflow revealing a hidden phone number on a listing detail page.
/// Built from rule data so it stays a per-source configuration concern.
pub fn reveal_phone_workflow(rules: &RevealPhoneRules) -> Workflow {
    Workflow {
        name: "reveal_phone".to_string(),
        steps: vec![
            WorkflowStep {
                order: 1,
                action: StepAction::Navigate,
                selector: None,
                params: HashMap::from([("url".to_string(), "{{listing_url}}".to_string())]),
                recovery: Vec::new(),
            },
            WorkflowStep {
                order: 2,
                action: StepAction::Click,
                selector: Some(rules.trigger_selector.to_string()),
                params: HashMap::new(),
                recovery: vec![RecoveryAction::DismissOverlay, RecoveryAction::Scroll],
            },
            WorkflowStep {
                order: 3,
                action: StepAction::Extract,
                selector: Some(rules.phone_selector.to_string()),
                params: HashMap::new(),
                recovery: Vec::new(),
            },
        ],
    }
}
