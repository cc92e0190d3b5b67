use crate::app::AppState;
use axum::{extract::State, Json};

fn api_json(state: &AppState) -> bode_json::Api {
    bode_json::Api {
        parameters: state.read_parameters().to_json(),
        worker: state.read_status(),
    }
}

pub async fn get_api(State(state): State<AppState>) -> Json<bode_json::Api> {
    Json(api_json(&state))
}
