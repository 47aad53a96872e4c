pub(crate) mod attempts;
pub(crate) mod band_score;
pub(crate) mod downstream;
pub(crate) mod errors;
pub(crate) mod evaluation;
pub(crate) mod evaluator;
pub(crate) mod external;
pub(crate) mod grading;
pub(crate) mod notifications;
pub(crate) mod propagation;
pub(crate) mod retry;
pub(crate) mod transcription;
