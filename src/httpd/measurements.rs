use crate::{app::AppState, params::schema::Channel};
use axum::{extract::State, Json};

pub async fn get_measurements(State(state): State<AppState>) -> Json<bode_json::Measurements> {
    Json(bode_json::Measurements {
        ch1: state.read_measurement(Channel::Ch1).into(),
        ch2: state.read_measurement(Channel::Ch2).into(),
    })
}
