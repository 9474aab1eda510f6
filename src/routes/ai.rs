use axum::{body::Bytes, extract::State, routing::post, Json, Router};

use crate::{
    error::AppError,
    services::ai::{AiReply, RawAiRequest},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/ai", post(dispatch))
}

async fn dispatch(State(state): State<AppState>, body: Bytes) -> Result<Json<AiReply>, AppError> {
    let request: RawAiRequest = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid request body: {err}")))?;
    let reply = state.ai.dispatch(request).await?;
    Ok(Json(reply))
}
