use crate::app::AppState;
use axum::{extract::State, Json};

pub async fn get_signals(State(state): State<AppState>) -> Json<bode_json::Signals> {
    Json(
        state
            .read_signals()
            .map(|signals| signals.to_json())
            .unwrap_or_default(),
    )
}
