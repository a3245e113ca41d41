// Handlers driving a hosted listing controller: one per browsing session

use axum::{
    extract::{Json as JsonExtract, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    filters::FilterOption,
    listing::{FetchRequest, ListingController, ListingSnapshot},
    sessions::{drive, SharedController},
    AppState,
};

// --- Request / Response Structs ---

#[derive(Deserialize, Debug)]
pub struct SearchRequest {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
pub struct ToggleRequest {
    option: FilterOption,
}

#[derive(Deserialize, Debug)]
pub struct ConnectivityRequest {
    connected: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_id: Uuid,
    listing: ListingSnapshot,
}

// --- Helpers ---

async fn find_session(app_state: &AppState, id: Uuid) -> AppResult<SharedController> {
    app_state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Listing session {} not found", id)))
}

// Snapshot plus every notification queued since the last response
async fn render(controller: &Mutex<ListingController>) -> Json<ListingSnapshot> {
    let mut guard = controller.lock().await;
    let mut snapshot = guard.snapshot();
    snapshot.notifications = guard.take_notifications();
    Json(snapshot)
}

async fn run<F>(app_state: &AppState, id: Uuid, begin: F) -> AppResult<Json<ListingSnapshot>>
where
    F: FnOnce(&mut ListingController) -> Option<FetchRequest>,
{
    let controller = find_session(app_state, id).await?;
    drive(&controller, &app_state.fetcher, begin).await;
    Ok(render(&controller).await)
}

// --- Handlers ---

pub async fn create_session(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let (session_id, controller) = app_state.sessions.create().await;
    tracing::info!(%session_id, "Listing session created");

    drive(&controller, &app_state.fetcher, |c| c.begin_initial_load()).await;
    let Json(listing) = render(&controller).await;

    Ok((StatusCode::CREATED, Json(SessionCreated { session_id, listing })))
}

pub async fn get_session(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ListingSnapshot>> {
    let controller = find_session(&app_state, id).await?;
    Ok(render(&controller).await)
}

pub async fn delete_session(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if app_state.sessions.remove(&id).await {
        tracing::info!(session_id = %id, "Listing session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Listing session {} not found", id)))
    }
}

pub async fn search(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonExtract(request): JsonExtract<SearchRequest>,
) -> AppResult<Json<ListingSnapshot>> {
    tracing::debug!(session_id = %id, text = %request.text, "Search");
    run(&app_state, id, |c| c.begin_search(&request.text)).await
}

pub async fn toggle_filter(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonExtract(request): JsonExtract<ToggleRequest>,
) -> AppResult<Json<ListingSnapshot>> {
    let controller = find_session(&app_state, id).await?;
    controller.lock().await.toggle(request.option);
    Ok(render(&controller).await)
}

pub async fn apply_filters(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ListingSnapshot>> {
    run(&app_state, id, |c| c.begin_apply_filters()).await
}

pub async fn reset_filters(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ListingSnapshot>> {
    run(&app_state, id, |c| c.begin_reset_filters()).await
}

pub async fn load_more(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ListingSnapshot>> {
    run(&app_state, id, |c| c.begin_load_more()).await
}

pub async fn refresh(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ListingSnapshot>> {
    run(&app_state, id, |c| c.begin_refresh()).await
}

pub async fn report_connectivity(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonExtract(request): JsonExtract<ConnectivityRequest>,
) -> AppResult<Json<ListingSnapshot>> {
    let controller = find_session(&app_state, id).await?;
    controller.lock().await.set_connectivity(request.connected);
    Ok(render(&controller).await)
}
