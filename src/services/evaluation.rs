//! Asynchronous evaluation of writing and speaking attempts.
//!
//! `submit_free_form` runs in the request path and only records the payload. The
//! background job claims the attempt, calls transcription and the evaluator through
//! the retry policy, and persists the outcome with status-guarded writes.

use std::time::Instant;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use time::PrimitiveDateTime;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Attempt, CriterionScore, Exercise};
use crate::db::types::{AttemptStatus, EvaluationStage, SkillType, TestVariant};
use crate::repositories;
use crate::services::band_score::{self, Performance};
use crate::services::errors::PipelineError;
use crate::services::evaluator::SPEAKING_CRITERIA;
use crate::services::external::{
    EvaluationReport, Evaluator, ExternalError, SpeakingTask, Transcriber, Transcription,
    WritingTask,
};
use crate::services::propagation;
use crate::services::retry::{run_with_backoff, RetryPolicy};
use crate::tasks::pool::Job;

#[derive(Debug, Clone, Default)]
pub(crate) struct FreeFormPayload {
    pub(crate) essay_text: Option<String>,
    pub(crate) audio_url: Option<String>,
    pub(crate) audio_duration_seconds: Option<f64>,
    pub(crate) time_spent_seconds: Option<i32>,
}

#[derive(Debug, Clone)]
pub(crate) struct FreeFormAccepted {
    pub(crate) attempt: Attempt,
    pub(crate) duplicate: bool,
}

/// Result of one evaluation run, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assessment {
    pub(crate) transcript: Option<String>,
    pub(crate) audio_duration_seconds: Option<f64>,
    pub(crate) criteria: Vec<CriterionScore>,
    pub(crate) band_score: f64,
    pub(crate) feedback: String,
}

pub(crate) fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Stable fingerprint of a free-form payload, used to recognize resubmissions.
pub(crate) fn payload_hash(skill: SkillType, payload: &FreeFormPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(skill.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.essay_text.as_deref().map(str::trim).unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.audio_url.as_deref().map(str::trim).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

fn validate_payload(skill: SkillType, payload: &FreeFormPayload) -> Result<(), PipelineError> {
    match skill {
        SkillType::Writing => {
            let essay = payload.essay_text.as_deref().map(str::trim).unwrap_or_default();
            if essay.is_empty() {
                return Err(PipelineError::validation("Writing submissions require essay_text"));
            }
        }
        SkillType::Speaking => {
            let url = payload.audio_url.as_deref().map(str::trim).unwrap_or_default();
            if url.is_empty() {
                return Err(PipelineError::validation("Speaking submissions require audio_url"));
            }
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(PipelineError::validation("audio_url must be an http(s) URL"));
            }
            if payload.audio_duration_seconds.is_some_and(|seconds| seconds.is_nan() || seconds < 0.0) {
                return Err(PipelineError::validation(
                    "audio_duration_seconds must be non-negative",
                ));
            }
        }
        SkillType::Listening | SkillType::Reading => {
            return Err(PipelineError::validation(format!(
                "{} attempts are graded from answers",
                skill.as_str()
            )));
        }
    }

    Ok(())
}

/// Records a writing or speaking payload and queues its evaluation. An identical
/// resubmission is accepted without queueing a second evaluation.
pub(crate) async fn submit_free_form(
    state: &AppState,
    user_id: &str,
    attempt_id: &str,
    payload: FreeFormPayload,
) -> Result<FreeFormAccepted, PipelineError> {
    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await?
        .filter(|attempt| attempt.user_id == user_id)
        .ok_or(PipelineError::NotFound("Attempt not found"))?;

    let exercise = repositories::exercises::find_by_id(state.db(), &attempt.exercise_id)
        .await?
        .ok_or(PipelineError::NotFound("Exercise not found"))?;

    validate_payload(exercise.skill, &payload)?;
    let hash = payload_hash(exercise.skill, &payload);

    if attempt.status != AttemptStatus::InProgress {
        return duplicate_or_conflict(attempt, &hash);
    }

    let window = state.settings().api().submit_rate_limit_window_seconds;
    let guard_key = format!("free-form-submit:{attempt_id}");
    match state.redis().acquire_guard(&guard_key, window).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(PipelineError::conflict(
                "A submission for this attempt is already being processed",
            ));
        }
        Err(err) => {
            tracing::warn!(attempt_id, error = %err, "Submission guard unavailable; allowing request");
        }
    }

    let essay = payload.essay_text.as_deref().map(str::trim);
    let audio_url = payload.audio_url.as_deref().map(str::trim);
    let word_count = essay.map(|text| count_words(text).min(i32::MAX as usize) as i32);
    let now = primitive_now_utc();

    let submitted = repositories::attempts::mark_free_form_submitted(
        state.db(),
        attempt_id,
        repositories::attempts::FreeFormSubmission {
            essay_text: essay,
            word_count,
            audio_url,
            audio_duration_seconds: payload.audio_duration_seconds,
            payload_hash: &hash,
            time_spent_seconds: payload.time_spent_seconds.filter(|seconds| *seconds >= 0),
            submitted_at: now,
        },
    )
    .await;

    let submitted = match submitted {
        Ok(submitted) => submitted,
        Err(err) => {
            // Let the learner retry right away instead of waiting out the window.
            if let Err(redis_err) = state.redis().release_guard(&guard_key).await {
                tracing::warn!(attempt_id, error = %redis_err, "Failed to release submission guard");
            }
            return Err(err.into());
        }
    };

    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await?
        .ok_or(PipelineError::NotFound("Attempt not found"))?;

    if !submitted {
        return duplicate_or_conflict(attempt, &hash);
    }

    tracing::info!(
        attempt_id,
        exercise_id = %exercise.id,
        skill = exercise.skill.as_str(),
        word_count,
        "Free-form attempt submitted for evaluation"
    );
    state.jobs().submit(Job::Evaluate { attempt_id: attempt_id.to_string() });

    Ok(FreeFormAccepted { attempt, duplicate: false })
}

fn duplicate_or_conflict(attempt: Attempt, hash: &str) -> Result<FreeFormAccepted, PipelineError> {
    if attempt.payload_hash.as_deref() == Some(hash) {
        tracing::info!(attempt_id = %attempt.id, "Duplicate free-form submission ignored");
        return Ok(FreeFormAccepted { attempt, duplicate: true });
    }

    Err(PipelineError::conflict(format!(
        "Attempt is {} and cannot accept a new submission",
        attempt.status.as_str()
    )))
}

/// Band from evaluator criteria. The model's own overall band is only logged.
fn assessment_from_report(
    report: EvaluationReport,
    transcript: Option<String>,
    audio_duration_seconds: Option<f64>,
    skill: SkillType,
) -> Assessment {
    let scores: Vec<f64> = report.criteria.iter().map(|criterion| criterion.score).collect();
    let band = band_score::to_band(skill, Performance::Criteria(&scores), TestVariant::Academic);

    if let Some(model_band) = report.overall_band {
        if (band_score::round_to_band(model_band.clamp(0.0, band_score::MAX_BAND)) - band).abs()
            > f64::EPSILON
        {
            tracing::warn!(
                skill = skill.as_str(),
                model_band,
                computed_band = band,
                "Evaluator overall band disagrees with criteria; using computed band"
            );
        }
    }

    Assessment {
        transcript,
        audio_duration_seconds,
        criteria: report.criteria,
        band_score: band,
        feedback: report.feedback,
    }
}

pub(crate) async fn assess_writing(
    evaluator: &dyn Evaluator,
    policy: &RetryPolicy,
    task: WritingTask,
) -> Result<Assessment, ExternalError> {
    let report =
        run_with_backoff(policy, "evaluate_writing", |_| evaluator.evaluate_writing(&task)).await?;
    Ok(assessment_from_report(report, None, None, SkillType::Writing))
}

pub(crate) async fn transcribe(
    transcriber: &dyn Transcriber,
    policy: &RetryPolicy,
    audio_url: &str,
) -> Result<Transcription, ExternalError> {
    run_with_backoff(policy, "transcribe", |_| transcriber.transcribe(audio_url)).await
}

pub(crate) struct SpeakingContext {
    pub(crate) prompt: Option<String>,
    pub(crate) part: Option<i32>,
    pub(crate) reported_duration_seconds: Option<f64>,
    pub(crate) min_transcript_words: usize,
}

pub(crate) enum SpeakingInput {
    /// Too few words to score; the evaluator is not called.
    NoAnswer(Assessment),
    Evaluate(SpeakingTask),
}

pub(crate) fn speaking_task(transcription: Transcription, context: SpeakingContext) -> SpeakingInput {
    let transcript = transcription.text.trim().to_string();
    let duration = transcription.duration_seconds.or(context.reported_duration_seconds);
    let word_count = count_words(&transcript);

    if word_count < context.min_transcript_words.max(1) {
        tracing::info!(word_count, "Transcript below minimum length; scoring as no answer");
        return SpeakingInput::NoAnswer(no_answer(
            transcript,
            duration,
            context.min_transcript_words,
        ));
    }

    SpeakingInput::Evaluate(SpeakingTask {
        transcript,
        prompt: context.prompt,
        part: context.part,
        word_count,
        duration_seconds: duration,
    })
}

pub(crate) async fn assess_speaking(
    evaluator: &dyn Evaluator,
    policy: &RetryPolicy,
    task: SpeakingTask,
) -> Result<Assessment, ExternalError> {
    let report =
        run_with_backoff(policy, "evaluate_speaking", |_| evaluator.evaluate_speaking(&task))
            .await?;

    Ok(assessment_from_report(
        report,
        Some(task.transcript),
        task.duration_seconds,
        SkillType::Speaking,
    ))
}

/// Scores a transcript. Recordings with too few words get the "no answer" outcome
/// without calling the evaluator.
#[cfg(test)]
pub(crate) async fn assess_transcript(
    evaluator: &dyn Evaluator,
    policy: &RetryPolicy,
    transcription: Transcription,
    context: SpeakingContext,
) -> Result<Assessment, ExternalError> {
    match speaking_task(transcription, context) {
        SpeakingInput::NoAnswer(assessment) => Ok(assessment),
        SpeakingInput::Evaluate(task) => assess_speaking(evaluator, policy, task).await,
    }
}

fn no_answer(transcript: String, duration: Option<f64>, min_words: usize) -> Assessment {
    Assessment {
        transcript: Some(transcript),
        audio_duration_seconds: duration,
        criteria: SPEAKING_CRITERIA
            .iter()
            .map(|name| CriterionScore { name: (*name).to_string(), score: 0.0 })
            .collect(),
        band_score: 0.0,
        feedback: format!(
            "No answer was detected in the recording. Speak for longer (at least {min_words} \
             words) and make sure the microphone is working, then try again."
        ),
    }
}

/// Background job body. Only the caller that wins the `pending -> processing` claim
/// does any work.
pub(crate) async fn run_evaluation(state: &AppState, attempt_id: &str) -> Result<()> {
    let started = Instant::now();
    let Some(attempt) =
        repositories::attempts::claim_for_evaluation(state.db(), attempt_id, primitive_now_utc())
            .await
            .context("Failed to claim attempt for evaluation")?
    else {
        tracing::info!(attempt_id, "Evaluation already claimed or not pending; skipping");
        return Ok(());
    };

    let exercise = match repositories::exercises::find_by_id(state.db(), &attempt.exercise_id).await
    {
        Ok(Some(exercise)) => exercise,
        Ok(None) => return fail(state, attempt_id, "Exercise not found").await,
        Err(err) => {
            let err = anyhow::Error::new(err).context("Failed to load exercise");
            fail_best_effort(state, attempt_id, &err).await;
            return Err(err);
        }
    };

    let skill = exercise.skill;
    let outcome = evaluate_attempt(state, &attempt, &exercise).await;
    let elapsed = started.elapsed().as_secs_f64();

    let assessment = match outcome {
        Ok(assessment) => assessment,
        Err(err) => {
            metrics::counter!("evaluation_jobs_total", "skill" => skill.as_str(), "outcome" => "failed")
                .increment(1);
            tracing::error!(
                attempt_id,
                exercise_id = %exercise.id,
                skill = skill.as_str(),
                error = %err,
                "Evaluation failed"
            );
            return fail(state, attempt_id, &format!("{err:#}")).await;
        }
    };

    let band = assessment.band_score;
    if let Err(err) = persist(state, &attempt, &exercise, assessment, elapsed).await {
        metrics::counter!("evaluation_jobs_total", "skill" => skill.as_str(), "outcome" => "failed")
            .increment(1);
        fail_best_effort(state, attempt_id, &err).await;
        return Err(err);
    }

    metrics::counter!("evaluation_jobs_total", "skill" => skill.as_str(), "outcome" => "completed")
        .increment(1);
    metrics::histogram!("evaluation_duration_seconds", "skill" => skill.as_str()).record(elapsed);
    tracing::info!(
        attempt_id,
        exercise_id = %exercise.id,
        skill = skill.as_str(),
        band_score = band,
        duration_seconds = elapsed,
        "Evaluation completed"
    );

    propagation::propagate_attempt(state, attempt_id).await
}

async fn evaluate_attempt(
    state: &AppState,
    attempt: &Attempt,
    exercise: &Exercise,
) -> Result<Assessment> {
    let capabilities = state.capabilities();
    let policy = state.retry().evaluation;

    match exercise.skill {
        SkillType::Writing => {
            let essay = attempt.essay_text.clone().context("Attempt has no essay text")?;
            set_stage(state, &attempt.id, EvaluationStage::Evaluating).await;

            let task = WritingTask {
                essay,
                task_type: exercise.writing_task_type.clone(),
                prompt: exercise.prompt_text.clone(),
            };
            Ok(assess_writing(capabilities.evaluator.as_ref(), &policy, task).await?)
        }
        SkillType::Speaking => {
            let audio_url = attempt.audio_url.as_deref().context("Attempt has no audio URL")?;
            set_stage(state, &attempt.id, EvaluationStage::Transcribing).await;
            let transcription = transcribe(
                capabilities.transcriber.as_ref(),
                &state.retry().transcription,
                audio_url,
            )
            .await?;

            let context = SpeakingContext {
                prompt: exercise.prompt_text.clone(),
                part: exercise.speaking_part,
                reported_duration_seconds: attempt.audio_duration_seconds,
                min_transcript_words: state.settings().transcription().min_transcript_words,
            };
            let assessment = match speaking_task(transcription, context) {
                SpeakingInput::NoAnswer(assessment) => assessment,
                SpeakingInput::Evaluate(task) => {
                    set_stage(state, &attempt.id, EvaluationStage::Evaluating).await;
                    assess_speaking(capabilities.evaluator.as_ref(), &policy, task).await?
                }
            };
            Ok(assessment)
        }
        SkillType::Listening | SkillType::Reading => {
            anyhow::bail!("{} attempts are not evaluated asynchronously", exercise.skill.as_str())
        }
    }
}

async fn set_stage(state: &AppState, attempt_id: &str, stage: EvaluationStage) {
    if let Err(err) =
        repositories::attempts::set_stage(state.db(), attempt_id, stage, primitive_now_utc()).await
    {
        tracing::warn!(attempt_id, error = %err, "Failed to record evaluation stage");
    }
}

async fn persist(
    state: &AppState,
    attempt: &Attempt,
    exercise: &Exercise,
    assessment: Assessment,
    elapsed_seconds: f64,
) -> Result<()> {
    let now: PrimitiveDateTime = primitive_now_utc();
    let band = assessment.band_score;

    let mut tx = state.db().begin().await.context("Failed to begin evaluation transaction")?;
    let completed = repositories::attempts::complete_evaluation(
        &mut tx,
        &attempt.id,
        repositories::attempts::EvaluationOutcome {
            transcript: assessment.transcript,
            audio_duration_seconds: assessment.audio_duration_seconds,
            criteria: assessment.criteria,
            band_score: band,
            feedback: assessment.feedback,
            evaluated_at: now,
            duration_seconds: elapsed_seconds,
        },
    )
    .await
    .context("Failed to store evaluation result")?;

    if !completed {
        tx.rollback().await.context("Failed to roll back evaluation transaction")?;
        tracing::warn!(attempt_id = %attempt.id, "Attempt left processing before result was stored");
        return Ok(());
    }

    repositories::exercises::record_completion(&mut *tx, &exercise.id, Some(band), now)
        .await
        .context("Failed to update exercise aggregates")?;
    tx.commit().await.context("Failed to commit evaluation result")?;

    Ok(())
}

async fn fail(state: &AppState, attempt_id: &str, error: &str) -> Result<()> {
    repositories::attempts::fail_evaluation(state.db(), attempt_id, error, primitive_now_utc())
        .await
        .context("Failed to mark evaluation failed")?;
    Ok(())
}

/// Used when the original error is returned to the pool; a second database
/// failure here is only logged and stale recovery picks the attempt up later.
async fn fail_best_effort(state: &AppState, attempt_id: &str, err: &anyhow::Error) {
    tracing::error!(attempt_id, error = %format!("{err:#}"), "Evaluation aborted");
    if let Err(mark_err) = fail(state, attempt_id, &format!("{err:#}")).await {
        tracing::warn!(attempt_id, error = %format!("{mark_err:#}"), "Failed to mark evaluation failed");
    }
}
