//! HTTP server.
//!
//! This module contains the HTTP server of bode-httpd, which is a web server
//! implemented using [`axum`]. It is the transport adapter between the remote
//! UI and the [`AppState`].

use crate::app::AppState;
use anyhow::Result;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

mod api;
mod measurements;
mod parameters;
mod signals;
mod websocket;
mod worker;

/// HTTP server.
///
/// The server reads and updates the application state in response to HTTP
/// requests, and streams signal frames to websocket clients.
#[derive(Debug)]
pub struct Server {
    server: axum::serve::Serve<Router, Router>,
}

impl Server {
    /// Creates a new HTTP server.
    ///
    /// The `address` parameter gives the address in which the server will
    /// listen. The `state` gives the handlers shared access to the parameter
    /// table, the signal buffers and the worker status.
    ///
    /// After calling this function, the server needs to be run by calling
    /// [`Server::run`].
    pub async fn new(address: &std::net::SocketAddr, state: AppState) -> Result<Server> {
        let app = Router::new()
            .route("/api", get(api::get_api))
            .route(
                "/api/parameters",
                get(parameters::get_parameters).patch(parameters::patch_parameters),
            )
            .route("/api/signals", get(signals::get_signals))
            .route("/api/measurements", get(measurements::get_measurements))
            .route("/api/worker", get(worker::get_worker))
            .route("/signals", get(websocket::handler))
            .with_state(state);
        tracing::info!(%address, "starting HTTP server");
        let listener = tokio::net::TcpListener::bind(address).await?;
        let server = axum::serve(listener, app.layer(TraceLayer::new_for_http()));
        Ok(Server { server })
    }

    /// Runs the HTTP server.
    ///
    /// This only returns if there is a fatal error.
    pub async fn run(self) -> Result<()> {
        Ok(self.server.await?)
    }
}

mod json_error {
    use crate::error::{ConfigurationError, Error};
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde::Serialize;

    #[derive(Serialize, Debug, Clone, Eq, PartialEq)]
    pub struct JsonError {
        http_status_code: u16,
        error_description: String,
    }

    impl JsonError {
        pub fn from_error<E: std::fmt::Display>(status_code: StatusCode, error: E) -> JsonError {
            JsonError {
                http_status_code: status_code.as_u16(),
                error_description: format!("{error:#}"),
            }
        }

        pub fn status_code(&self) -> StatusCode {
            StatusCode::from_u16(self.http_status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }

    impl From<Error> for JsonError {
        fn from(error: Error) -> JsonError {
            let status_code = match &error {
                Error::Validation(_) => StatusCode::BAD_REQUEST,
                Error::Configuration(ConfigurationError::Hardware(_)) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                Error::Configuration(_) => StatusCode::CONFLICT,
                Error::Allocation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            JsonError::from_error(status_code, error)
        }
    }

    impl IntoResponse for JsonError {
        fn into_response(self) -> Response {
            (self.status_code(), Json(self)).into_response()
        }
    }

}
