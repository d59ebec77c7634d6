//! Stable exit codes for `ticket2pr` commands.
//!
//! Callers branch on these values, so they never change meaning. Code `2` is
//! left to clap for usage errors.

use crate::core::types::ErrorCategory;

/// Run finished and the change request was opened.
pub const OK: i32 = 0;
/// Invalid input (unparseable issue key, bad flags) or an unexpected internal error.
pub const INVALID: i32 = 1;
/// Missing or invalid configuration; the pipeline never started.
pub const CONFIG: i32 = 3;
/// The ticket could not be fetched.
pub const FETCH: i32 = 4;
/// A local or remote version-control operation failed.
pub const VERSION_CONTROL: i32 = 5;
/// An agent invocation failed, violated its file scope, or produced an unusable result.
pub const SOLVE: i32 = 6;
/// A verifier kept failing after the retry ceiling was reached.
pub const VERIFIER_UNRESOLVED: i32 = 7;
/// Branch or change-request creation failed on the source host.
pub const PUBLISH: i32 = 8;
/// The run was interrupted by a signal.
pub const INTERRUPTED: i32 = 130;

/// Map an error category to its documented exit code.
pub fn for_category(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::Config => CONFIG,
        ErrorCategory::InvalidInput | ErrorCategory::Internal => INVALID,
        ErrorCategory::TicketFetch => FETCH,
        ErrorCategory::VersionControl => VERSION_CONTROL,
        ErrorCategory::AgentInvocation | ErrorCategory::Solve => SOLVE,
        ErrorCategory::VerifierUnresolved => VERIFIER_UNRESOLVED,
        ErrorCategory::Publish => PUBLISH,
        ErrorCategory::Interrupted => INTERRUPTED,
    }
}
