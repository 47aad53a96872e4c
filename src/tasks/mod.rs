pub(crate) mod jobs;
pub(crate) mod pool;
pub(crate) mod reconciliation;
pub(crate) mod recovery;
pub(crate) mod scheduler;
