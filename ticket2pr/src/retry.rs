//! Bounded verify-and-repair loop.
//!
//! An attempt is one verifier run. Between failed attempts the caller's
//! `repair` closure runs once with feedback built from the latest failure
//! only; earlier attempts are summarized in a one-line history. Exhausting
//! the ceiling is a hard error carrying the last verifier output.

use tracing::{info, instrument, warn};

use crate::context::StepLog;
use crate::core::types::VerifierAttempt;
use crate::error::PipelineError;
use crate::io::prompt::VerifierFeedback;
use crate::io::signals::CancelToken;
use crate::io::verifier::{Verifier, VerifierOutcome, VerifyRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Verifier runs allowed, including the first. Always >= 1.
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `verifier` until it passes or the ceiling is hit, calling `repair` between failures.
    ///
    /// Every attempt is appended to `log.attempts`. A verifier that cannot be
    /// spawned counts as a failed attempt with the spawn error as its output.
    #[instrument(skip_all, fields(verifier = verifier.name(), max_attempts = self.max_attempts))]
    pub fn run<F>(
        &self,
        verifier: &dyn Verifier,
        request: &VerifyRequest,
        cancel: &CancelToken,
        log: &mut StepLog,
        mut repair: F,
    ) -> Result<(), PipelineError>
    where
        F: FnMut(&VerifierFeedback, &mut StepLog) -> Result<(), PipelineError>,
    {
        let mut history: Vec<String> = Vec::new();
        let mut previous: Option<String> = None;
        for number in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            let outcome = verifier.run(request).unwrap_or_else(|err| VerifierOutcome {
                passed: false,
                output: format!("{} could not run: {err:#}", verifier.name()),
            });
            let repeated = previous.as_deref() == Some(outcome.output.as_str());
            log.attempts.push(VerifierAttempt {
                number,
                passed: outcome.passed,
                repeated_output: repeated,
                output: outcome.output.clone(),
            });
            if outcome.passed {
                info!(attempt = number, "verifier passed");
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            warn!(attempt = number, repeated, "verifier failed");
            if number == self.max_attempts {
                return Err(PipelineError::VerifierUnresolved {
                    verifier: verifier.name().to_string(),
                    attempts: number,
                    last_output: outcome.output,
                });
            }

            let feedback = VerifierFeedback {
                verifier: verifier.name().to_string(),
                attempt: number,
                max_attempts: self.max_attempts,
                output: outcome.output.clone(),
                unchanged: repeated,
                history: history.clone(),
            };
            repair(&feedback, log)?;
            history.push(format!(
                "attempt {number}: failed ({} lines of output{})",
                outcome.output.lines().count(),
                if repeated { ", same as before" } else { "" }
            ));
            previous = Some(outcome.output);
        }
        // max_attempts >= 1, so the loop always returns.
        Err(PipelineError::Internal("retry loop ended without a verdict".to_string()))
    }
}
