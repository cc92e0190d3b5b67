use super::json_error::JsonError;
use crate::app::AppState;
use axum::{extract::State, Json};
use bode_json::{Parameter, ParameterWrite};

pub async fn get_parameters(State(state): State<AppState>) -> Json<Vec<Parameter>> {
    Json(state.read_parameters().to_json())
}

pub async fn patch_parameters(
    State(state): State<AppState>,
    Json(writes): Json<Vec<ParameterWrite>>,
) -> Result<Json<Vec<Parameter>>, JsonError> {
    if let Err(err) = state.apply_parameters(&writes) {
        tracing::debug!(%err, "parameter update rejected");
        return Err(err.into());
    }
    Ok(Json(state.read_parameters().to_json()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{app, args::Args, fpga::sim::Simulator, params::schema::*};
    use clap::Parser;

    #[tokio::test]
    async fn patch() {
        let args = Args::parse_from(["bode-httpd", "--signal-length", "64"]);
        // the worker is not run, but it keeps the request channel open
        let (state, _worker) = app::init(&args, Box::new(Simulator::new(10e3))).unwrap();
        let Json(params) = patch_parameters(
            State(state.clone()),
            Json(vec![ParameterWrite {
                index: BODE_POINTS,
                value: 50.0,
            }]),
        )
        .await
        .unwrap();
        assert_eq!(params.len(), PARAMS_NUM);
        assert_eq!(params[BODE_POINTS].value, 50.0);
        assert_eq!(params[BODE_POINTS].name, "bode_points");

        let err = patch_parameters(
            State(state.clone()),
            Json(vec![
                ParameterWrite {
                    index: BODE_POINTS,
                    value: 20.0,
                },
                ParameterWrite {
                    index: PARAMS_NUM,
                    value: 0.0,
                },
            ]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
        let Json(params) = get_parameters(State(state)).await;
        assert_eq!(params[BODE_POINTS].value, 50.0);
    }
}
