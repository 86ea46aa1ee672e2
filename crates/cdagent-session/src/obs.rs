//! Structured observability hooks for build session lifecycle events.
//!
//! Events are emitted at `info!` level (failures at `warn!`). Labels passed
//! in here must already be masked.

use tracing::{info, warn};
use uuid::Uuid;

use crate::result::{JobResult, StepStatus};

/// Span tagged with the session id. Attach it with
/// [`tracing::Instrument::instrument`] so it follows the session across awaits.
pub fn session_span(session_id: &Uuid) -> tracing::Span {
    tracing::info_span!("cdagent.session", session_id = %session_id)
}

/// Emit event: session started executing the tree rooted at `root_label`.
pub fn emit_session_started(session_id: &Uuid, root_label: &str) {
    info!(event = "session.started", session_id = %session_id, root = %root_label);
}

/// Emit event: a builder finished.
pub fn emit_step_finished(session_id: &Uuid, label: &str, status: StepStatus) {
    match status {
        StepStatus::Failed => {
            warn!(event = "step.finished", session_id = %session_id, step = %label, status = ?status)
        }
        _ => info!(event = "step.finished", session_id = %session_id, step = %label, status = ?status),
    }
}

/// Emit event: session finished with its terminal result.
pub fn emit_session_finished(session_id: &Uuid, result: JobResult, duration_ms: u64) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        result = %result,
        duration_ms = duration_ms,
    );
}

/// Emit event: cancellation was observed (warning level).
pub fn emit_session_cancelled(session_id: &Uuid, step: &str) {
    warn!(event = "session.cancelled", session_id = %session_id, step = %step);
}
