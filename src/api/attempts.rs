use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentLearner;
use crate::core::state::AppState;
use crate::schemas::attempt::{
    AttemptResponse, AttemptResultResponse, FreeFormAcceptedResponse, SubmitAnswersRequest,
    SubmitFreeFormRequest,
};
use crate::services::{attempts, evaluation, grading};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/exercises/:exercise_id/attempts", post(start_attempt))
        .route("/attempts/:attempt_id/answers", post(submit_answers))
        .route("/attempts/:attempt_id/free-form", post(submit_free_form))
        .route("/attempts/:attempt_id/result", get(get_result))
}

async fn start_attempt(
    CurrentLearner(user_id): CurrentLearner,
    State(state): State<AppState>,
    Path(exercise_id): Path<String>,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    let attempt = attempts::start_attempt(&state, &user_id, &exercise_id).await?;
    Ok((StatusCode::CREATED, Json(attempt.into())))
}

async fn submit_answers(
    CurrentLearner(user_id): CurrentLearner,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    payload.validate()?;

    let attempt = grading::submit_answers(&state, &user_id, &attempt_id, payload.into()).await?;
    Ok(Json(attempt.into()))
}

async fn submit_free_form(
    CurrentLearner(user_id): CurrentLearner,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SubmitFreeFormRequest>,
) -> Result<(StatusCode, Json<FreeFormAcceptedResponse>), ApiError> {
    payload.validate()?;

    let accepted =
        evaluation::submit_free_form(&state, &user_id, &attempt_id, payload.into()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(FreeFormAcceptedResponse {
            attempt: accepted.attempt.into(),
            duplicate: accepted.duplicate,
        }),
    ))
}

async fn get_result(
    CurrentLearner(user_id): CurrentLearner,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResultResponse>, ApiError> {
    let result = attempts::get_result(&state, &user_id, &attempt_id).await?;

    Ok(Json(AttemptResultResponse {
        attempt: result.attempt.into(),
        exercise: result.exercise.into(),
        answers: result.answers.into_iter().map(Into::into).collect(),
        performance_stats: result.performance_stats,
    }))
}
