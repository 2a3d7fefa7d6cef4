use std::{convert::Infallible, future::IntoFuture, net::Ipv4Addr, sync::Arc, time::Duration};

use axum::{
    Json, Router, extract,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{self, KeepAlive, Sse},
    },
    routing::{get, post},
    serve,
};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, select, signal};

use crate::{
    error::DeviceError,
    events::Event,
    hardware::{self, Device},
};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub async fn launch(config_path: &str, port: Option<u16>) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let port = port.unwrap_or(config.server.port);

    let device = hardware::connect(&config.device)?;
    tracing::info!("Device: {device}");

    device.start().await.wrap_err("Failed to start device")?;

    let (app, _) = create_router(device.clone(), config.device.simulator);
    let socket = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;

    tracing::info!("Listening on http://0.0.0.0:{port}");

    select! {
        result = serve(socket, app).into_future() => result?,
        _ = signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    device.stop().await?;

    Ok(())
}

/* === Router === */

pub struct AppState {
    pub device: Arc<dyn Device>,
    pub simulator: bool,
}

pub fn create_router(device: Arc<dyn Device>, simulator: bool) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState { device, simulator });

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/telemetry", get(telemetry))
        .route("/api/cmd", post(command))
        .route("/api/stream", get(stream))
        .with_state(state.clone());

    (router, state)
}

/* == Health == */

#[derive(Serialize)]
struct Health {
    status: &'static str,
    simulator: bool,
    running: bool,
    last_telemetry_at: Option<DateTime<Utc>>,
}

async fn health(extract::State(state): extract::State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "Healthy",
        simulator: state.simulator,
        running: state.device.is_running(),
        last_telemetry_at: state.device.last_telemetry().map(|t| t.captured_at),
    })
}

/* == Telemetry == */

async fn telemetry(extract::State(state): extract::State<Arc<AppState>>) -> Response {
    match state.device.last_telemetry() {
        Some(telemetry) => Json(telemetry).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn stream(
    extract::State(state): extract::State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let events = state.device.subscribe().into_stream().filter_map(|event| async move {
        let name = match &event {
            Event::Telemetry(_) => "telemetry",
            Event::Transition(_) => "transition",
        };

        match sse::Event::default().event(name).json_data(&event) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("Failed to encode {name} event: {e}");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}

/* == Commands == */

#[derive(Deserialize)]
struct CommandQuery {
    cmd: String,
}

async fn command(
    extract::State(state): extract::State<Arc<AppState>>,
    extract::Query(query): extract::Query<CommandQuery>,
) -> StandardResponse<String> {
    state.device.send(&query.cmd).await.into()
}

/* == Types == */

#[derive(Serialize)]
#[serde(tag = "status")]
enum StandardResponse<T = ()> {
    Success {
        data: T,
    },
    Error {
        message: String,
        #[serde(skip)]
        code: StatusCode,
    },
}

impl<T: Serialize> From<Result<T, DeviceError>> for StandardResponse<T> {
    fn from(result: Result<T, DeviceError>) -> Self {
        match result {
            Ok(data) => StandardResponse::Success { data },
            Err(error) => StandardResponse::Error {
                code: status_code(&error),
                message: error.to_string(),
            },
        }
    }
}

impl<T: Serialize> IntoResponse for StandardResponse<T> {
    fn into_response(self) -> Response {
        let code = match &self {
            StandardResponse::Success { .. } => StatusCode::OK,
            StandardResponse::Error { code, .. } => *code,
        };

        (code, Json(self)).into_response()
    }
}

fn status_code(error: &DeviceError) -> StatusCode {
    match error {
        DeviceError::NotRunning => StatusCode::CONFLICT,
        DeviceError::WriteTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DeviceError::UnknownCommand(_) | DeviceError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        DeviceError::ConnectionFailed { .. } | DeviceError::WriteFailed(_) => StatusCode::BAD_GATEWAY,
    }
}
