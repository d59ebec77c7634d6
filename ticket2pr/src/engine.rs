//! Sequential step execution with all-or-nothing context updates.
//!
//! Each step runs against a draft copy of the context. A successful step's
//! draft replaces the context; a failed step's draft is discarded, so a
//! failure never leaves half-written artifacts behind. Every step, including
//! skipped and failed ones, gets exactly one entry in the step history.

use std::time::Instant;

use tracing::{error, info, info_span, warn};

use crate::context::{RunContext, StepLog};
use crate::core::types::{StepResult, StepStatus};
use crate::error::PipelineError;
use crate::steps::{Precondition, Step, StepEnv, default_steps};

/// A step's failure, kept alongside the context it left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    pub error: PipelineError,
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub context: RunContext,
    /// The failure that halted the run, if any.
    pub failure: Option<StepFailure>,
}

impl EngineOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct WorkflowEngine {
    steps: Vec<Box<dyn Step>>,
    /// Called with the step name just before a step runs.
    progress: Option<Box<dyn Fn(&str)>>,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(default_steps())
    }
}

impl WorkflowEngine {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(&str) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Run every step in order until one fails fatally or the run is cancelled.
    pub fn run(&self, mut ctx: RunContext, env: &StepEnv<'_>) -> EngineOutcome {
        let mut failure = None;
        for step in &self.steps {
            let name = step.name();
            let _span = info_span!("step", step = name).entered();

            if env.cancel.is_cancelled() {
                warn!("cancelled before step started");
                ctx.record(failed(name, &PipelineError::Interrupted, StepLog::default(), 0));
                failure = Some(StepFailure {
                    step: name.to_string(),
                    error: PipelineError::Interrupted,
                });
                break;
            }

            if let Precondition::Skip(reason) = step.precondition(&ctx, env) {
                info!(reason = %reason, "skipped");
                ctx.record(StepResult::skipped(name, reason));
                continue;
            }

            if let Some(progress) = &self.progress {
                progress(name);
            }
            let started = Instant::now();
            let mut draft = ctx.clone();
            let mut log = StepLog::default();
            let result = step.run(&mut draft, env, &mut log);
            let duration_ms = elapsed_ms(started);

            match result {
                Ok(()) => {
                    let artifacts = draft.produced_since(&ctx);
                    info!(duration_ms, artifacts = ?artifacts, "step succeeded");
                    draft.record(StepResult {
                        step: name.to_string(),
                        status: StepStatus::Success,
                        error: None,
                        skip_reason: None,
                        artifacts,
                        agent_invocations: log.agent_invocations,
                        attempts: log.attempts,
                        duration_ms,
                    });
                    ctx = draft;
                }
                Err(err) => {
                    let err = if env.cancel.is_cancelled() {
                        PipelineError::Interrupted
                    } else {
                        err
                    };
                    error!(duration_ms, err = %err, "step failed");
                    ctx.record(failed(name, &err, log, duration_ms));
                    if step.fatal() || err == PipelineError::Interrupted {
                        failure = Some(StepFailure {
                            step: name.to_string(),
                            error: err,
                        });
                        break;
                    }
                }
            }
        }
        EngineOutcome {
            context: ctx,
            failure,
        }
    }
}

fn failed(step: &str, err: &PipelineError, log: StepLog, duration_ms: u64) -> StepResult {
    StepResult {
        step: step.to_string(),
        status: StepStatus::Failed,
        error: Some(err.detail()),
        skip_reason: None,
        artifacts: Default::default(),
        agent_invocations: log.agent_invocations,
        attempts: log.attempts,
        duration_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunFlags;
    use crate::core::types::{Artifact, WorkspaceKind};
    use crate::test_support::{StepHarness, TestRepo};

    struct SetsTitle;

    impl Step for SetsTitle {
        fn name(&self) -> &'static str {
            "sets_title"
        }

        fn run(
            &self,
            ctx: &mut RunContext,
            _env: &StepEnv<'_>,
            _log: &mut StepLog,
        ) -> Result<(), PipelineError> {
            ctx.set_pr_title("[PROJ-1] Title".to_string())
        }
    }

    /// Writes an artifact, then fails.
    struct HalfWrites;

    impl Step for HalfWrites {
        fn name(&self) -> &'static str {
            "half_writes"
        }

        fn run(
            &self,
            ctx: &mut RunContext,
            _env: &StepEnv<'_>,
            log: &mut StepLog,
        ) -> Result<(), PipelineError> {
            log.agent_invocations += 1;
            ctx.set_pr_body("partial".to_string())?;
            Err(PipelineError::Solve("gave up".to_string()))
        }
    }

    struct SoftFailure;

    impl Step for SoftFailure {
        fn name(&self) -> &'static str {
            "soft_failure"
        }

        fn run(
            &self,
            _ctx: &mut RunContext,
            _env: &StepEnv<'_>,
            _log: &mut StepLog,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::Publish("ticket comment failed".to_string()))
        }

        fn fatal(&self) -> bool {
            false
        }
    }

    struct AlwaysSkips;

    impl Step for AlwaysSkips {
        fn name(&self) -> &'static str {
            "always_skips"
        }

        fn precondition(&self, _ctx: &RunContext, _env: &StepEnv<'_>) -> Precondition {
            Precondition::Skip("nothing to do".to_string())
        }

        fn run(
            &self,
            _ctx: &mut RunContext,
            _env: &StepEnv<'_>,
            _log: &mut StepLog,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::Internal("skipped steps must not run".to_string()))
        }
    }

    fn ctx(repo: &TestRepo) -> RunContext {
        RunContext::new(
            "PROJ-1",
            repo.work(),
            WorkspaceKind::UserSupplied,
            "main",
            RunFlags::default(),
        )
    }

    /// Verifies a failed step leaves no trace in the context except its history entry.
    #[test]
    fn failed_step_changes_are_discarded() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, Vec::new());
        let engine = WorkflowEngine::new(vec![
            Box::new(SetsTitle),
            Box::new(HalfWrites),
            Box::new(SetsTitle),
        ]);

        let outcome = harness.with_env(|env| engine.run(ctx(&repo), env));

        let failure = outcome.failure.clone().expect("failure");
        assert_eq!(failure.step, "half_writes");
        assert_eq!(outcome.context.pr_body(), None);
        assert_eq!(outcome.context.pr_title(), Some("[PROJ-1] Title"));
        let history = outcome.context.step_history();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[0].artifacts.iter().copied().collect::<Vec<_>>(),
            vec![Artifact::PrTitle]
        );
        assert_eq!(history[1].status, StepStatus::Failed);
        assert_eq!(history[1].agent_invocations, 1);
        assert!(history[1].artifacts.is_empty());
    }

    #[test]
    fn skipped_steps_are_recorded_with_reason() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, Vec::new());
        let engine = WorkflowEngine::new(vec![Box::new(AlwaysSkips), Box::new(SetsTitle)]);

        let outcome = harness.with_env(|env| engine.run(ctx(&repo), env));

        assert!(outcome.succeeded());
        let history = outcome.context.step_history();
        assert_eq!(history[0].status, StepStatus::Skipped);
        assert_eq!(history[0].skip_reason.as_deref(), Some("nothing to do"));
        assert_eq!(history[1].status, StepStatus::Success);
    }

    #[test]
    fn non_fatal_failure_continues() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, Vec::new());
        let engine = WorkflowEngine::new(vec![Box::new(SoftFailure), Box::new(SetsTitle)]);

        let outcome = harness.with_env(|env| engine.run(ctx(&repo), env));

        assert!(outcome.succeeded());
        assert_eq!(outcome.context.step_history()[0].status, StepStatus::Failed);
        assert_eq!(outcome.context.pr_title(), Some("[PROJ-1] Title"));
    }

    /// Verifies cancellation is checked before each step and recorded as an interruption.
    #[test]
    fn cancellation_stops_before_next_step() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, Vec::new());
        harness.cancel.cancel();
        let engine = WorkflowEngine::new(vec![Box::new(SetsTitle)]);

        let outcome = harness.with_env(|env| engine.run(ctx(&repo), env));

        let failure = outcome.failure.expect("failure");
        assert_eq!(failure.error, PipelineError::Interrupted);
        assert_eq!(outcome.context.pr_title(), None);
        assert_eq!(outcome.context.step_history().len(), 1);
    }
}
