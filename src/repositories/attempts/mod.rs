mod commands;
mod queries;
mod types;

pub(crate) use commands::{
    claim_for_evaluation, claim_sync, complete_evaluation, create_with_next_number, fail_evaluation,
    finalize_objective, lock_status, mark_free_form_submitted, mark_sync_failed,
    mark_sync_synced, set_stage,
};
pub(crate) use queries::{
    find_by_id, find_sync_target, list_pending_evaluations, list_stale_evaluations,
    list_sync_due,
};
pub(crate) use types::{EvaluationOutcome, FreeFormSubmission, ObjectiveFinalization, SyncTarget};
