use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "skilltype", rename_all = "lowercase")]
pub(crate) enum SkillType {
    Listening,
    Reading,
    Writing,
    Speaking,
}

impl SkillType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Reading => "reading",
            Self::Writing => "writing",
            Self::Speaking => "speaking",
        }
    }

    /// Listening and reading are graded against answer keys; writing and speaking are not.
    pub(crate) fn is_objective(self) -> bool {
        matches!(self, Self::Listening | Self::Reading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "testvariant", rename_all = "snake_case")]
pub(crate) enum TestVariant {
    Academic,
    GeneralTraining,
}

impl TestVariant {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Academic => "academic",
            Self::GeneralTraining => "general_training",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "questionkind", rename_all = "lowercase")]
pub(crate) enum QuestionKind {
    Choice,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub(crate) enum AttemptStatus {
    InProgress,
    Submitted,
    Completed,
    Failed,
    Abandoned,
}

impl AttemptStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "evaluationstatus", rename_all = "lowercase")]
pub(crate) enum EvaluationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "evaluationstage", rename_all = "lowercase")]
pub(crate) enum EvaluationStage {
    Transcribing,
    Evaluating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "syncstatus", rename_all = "snake_case")]
pub(crate) enum SyncStatus {
    NotRequired,
    Pending,
    Synced,
    Failed,
}
