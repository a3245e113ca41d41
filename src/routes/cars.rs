// Car detail actions: like/unlike and "I'm interested" (start a chat with the seller)

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

use crate::{
    auth_middleware::AuthenticatedUser,
    error::{AppError, AppResult},
    models::ChatSession,
    AppState,
};

#[derive(Serialize)]
pub struct LikeResponse {
    success: bool,
    liked: bool,
}

pub async fn toggle_like(
    State(app_state): State<AppState>,
    authenticated_user: AuthenticatedUser,
    Path(car_id): Path<String>,
) -> AppResult<Json<LikeResponse>> {
    let user_id = &authenticated_user.user_id;
    tracing::info!(user_id = %user_id, email = ?authenticated_user.email, car_id = %car_id, "API call: toggle_like");

    match app_state.firestore.toggle_liked_car(user_id, &car_id).await {
        Ok(liked) => Ok(Json(LikeResponse { success: true, liked })),
        Err(e) => {
            tracing::error!("Failed to update liked cars: {}", e);
            Err(AppError::InternalServerError(e.context("Failed to update liked cars")))
        }
    }
}

pub async fn start_chat(
    State(app_state): State<AppState>,
    authenticated_user: AuthenticatedUser,
    Path(car_id): Path<String>,
) -> AppResult<Json<ChatSession>> {
    let user_id = &authenticated_user.user_id;
    tracing::info!(user_id = %user_id, email = ?authenticated_user.email, car_id = %car_id, "API call: start_chat");

    match app_state.firestore.start_chat(&car_id, user_id).await {
        Ok(Some(chat)) => Ok(Json(chat)),
        Ok(None) => Err(AppError::NotFound(format!("Car {} not found", car_id))),
        Err(e) => {
            tracing::error!("Failed to start chat: {}", e);
            Err(AppError::InternalServerError(e.context("Failed to start chat")))
        }
    }
}
