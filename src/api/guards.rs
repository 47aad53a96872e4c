use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderName};

use crate::api::errors::ApiError;
use crate::core::state::AppState;

/// Set by the gateway after it authenticates the learner.
pub(crate) static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

const MAX_USER_ID_LEN: usize = 128;

pub(crate) struct CurrentLearner(pub(crate) String);

#[async_trait]
impl FromRequestParts<AppState> for CurrentLearner {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(&USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= MAX_USER_ID_LEN)
            .ok_or(ApiError::Unauthorized("Missing learner identity"))?;

        Ok(CurrentLearner(user_id.to_string()))
    }
}
