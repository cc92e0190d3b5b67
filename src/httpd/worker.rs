use crate::app::AppState;
use axum::{extract::State, Json};

pub async fn get_worker(State(state): State<AppState>) -> Json<bode_json::WorkerStatus> {
    Json(state.read_status())
}
