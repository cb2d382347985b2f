//! Observer API
//!
//! HTTP endpoints for layer status and selection, plus a WebSocket that
//! streams every published event and accepts a few commands.
//! Default port: 8000 (the next free port is taken if it is busy)

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::events::BridgeEvent;
use crate::mapping::MappingError;
use crate::osc::{NetworkMessage, NetworkOutput, OscArg, OscClient};
use crate::router::LayerStatus;
use crate::xtouch::XTouchDriver;

/// How many ports past the configured one are tried
const PORT_SEARCH_SPAN: u16 = 20;

/// Shared state for API handlers
pub struct ApiState {
    pub router: Arc<crate::Router>,
    /// Concrete client, needed for retargeting
    pub osc_client: Arc<OscClient>,
    pub osc_input_port: u16,
    /// Observers subscribe here
    pub events: broadcast::Sender<BridgeEvent>,
}

/// API error response
#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<MappingError> for ApiError {
    fn from(e: MappingError) -> Self {
        let status = match e {
            MappingError::UnknownLayer(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OscDefaults {
    osc_output_ip: String,
    osc_output_port: u16,
    osc_input_port: u16,
}

#[derive(Debug, Serialize)]
struct MidiPorts {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

/// Partial update of the network output target
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct SettingsPatch {
    pub osc_output_ip: Option<String>,
    pub osc_output_port: Option<u16>,
}

/// Commands accepted on the observer WebSocket
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverCommand {
    OscSend {
        address: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    UpdateSettings {
        #[serde(default)]
        settings: SettingsPatch,
    },
}

/// Direct replies to the issuing observer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandReply {
    OscAck { address: String },
    Error { message: String },
}

impl CommandReply {
    fn error(message: impl Into<String>) -> Self {
        CommandReply::Error {
            message: message.into(),
        }
    }
}

/// Parse a text frame into a command
pub fn parse_command(text: &str) -> Result<ObserverCommand, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid command: {}", e))
}

/// Convert a JSON argument to an OSC argument
pub fn json_to_arg(value: &Value) -> Option<OscArg> {
    match value {
        Value::Bool(b) => Some(OscArg::Bool(*b)),
        Value::String(s) => Some(OscArg::Str(s.clone())),
        Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Some(OscArg::Int(i)),
            None => n.as_f64().map(|f| OscArg::Float(f as f32)),
        },
        _ => None,
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/layer-status", get(layer_status))
        .route("/api/layer/:key", post(select_layer))
        .route("/api/osc-defaults", get(osc_defaults))
        .route("/api/midi-ports", get(midi_ports))
        .route("/api/ws", get(observer_ws))
        .layer(cors)
        .with_state(state)
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// GET /api/layer-status
async fn layer_status(State(state): State<Arc<ApiState>>) -> Json<LayerStatus> {
    Json(state.router.layer_status())
}

/// POST /api/layer/:key - Activate a layer by key (`layer_3`)
async fn select_layer(
    Path(key): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<LayerStatus>, ApiError> {
    state.router.select_layer(&key).await?;
    info!("Layer '{}' selected via API", key);
    Ok(Json(state.router.layer_status()))
}

/// GET /api/osc-defaults - Current network settings
async fn osc_defaults(State(state): State<Arc<ApiState>>) -> Json<OscDefaults> {
    let (ip, port) = state.osc_client.target().await;
    Json(OscDefaults {
        osc_output_ip: ip,
        osc_output_port: port,
        osc_input_port: state.osc_input_port,
    })
}

/// GET /api/midi-ports - MIDI port names
async fn midi_ports() -> Result<Json<MidiPorts>, ApiError> {
    let (inputs, outputs) = tokio::task::spawn_blocking(XTouchDriver::list_ports)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;
    Ok(Json(MidiPorts { inputs, outputs }))
}

/// GET /api/ws - Event stream and command channel
async fn observer_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_websocket(socket, state, rx))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize observer message: {}", e);
            true
        }
    }
}

async fn handle_websocket(
    mut socket: WebSocket,
    state: Arc<ApiState>,
    mut rx: broadcast::Receiver<BridgeEvent>,
) {
    debug!("Observer connected");

    // New observers start from the current layer
    let status = state.router.layer_status();
    let initial = BridgeEvent::LayerChange {
        active_layer: status.active_layer,
        layer_names: status.layer_names,
        mapping_keys: status.mapping_keys,
    };
    if !send_json(&mut socket, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_json(&mut socket, &event).await {
                            debug!("Observer disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Observer lagged by {} events", n);
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&state, &text).await {
                            if !send_json(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Observer closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Execute one observer command. `settings_updated` goes out through the
/// event stream, so it has no direct reply.
pub async fn handle_command(state: &ApiState, text: &str) -> Option<CommandReply> {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(message) => return Some(CommandReply::error(message)),
    };

    match command {
        ObserverCommand::OscSend { address, args } => {
            let mut osc_args = Vec::with_capacity(args.len());
            for arg in &args {
                match json_to_arg(arg) {
                    Some(a) => osc_args.push(a),
                    None => {
                        return Some(CommandReply::error(format!(
                            "Unsupported OSC argument: {}",
                            arg
                        )))
                    }
                }
            }

            let msg = NetworkMessage::new(address.clone(), osc_args);
            match state.osc_client.send(&msg).await {
                Ok(()) => {
                    debug!("Observer sent {}", msg);
                    Some(CommandReply::OscAck { address })
                }
                Err(e) => Some(CommandReply::error(format!("OSC send failed: {:#}", e))),
            }
        }
        ObserverCommand::UpdateSettings { settings } => {
            let (current_ip, current_port) = state.osc_client.target().await;
            let ip = settings.osc_output_ip.unwrap_or(current_ip);
            let port = settings.osc_output_port.unwrap_or(current_port);

            if ip.trim().is_empty() || port == 0 {
                return Some(CommandReply::error("Invalid OSC output settings"));
            }

            match state.osc_client.retarget(&ip, port).await {
                Ok(_) => {
                    info!("🎯 OSC output set to {}:{}", ip, port);
                    state.router.context().publish(BridgeEvent::SettingsUpdated {
                        osc_output_ip: ip,
                        osc_output_port: port,
                    });
                    None
                }
                Err(e) => Some(CommandReply::error(format!(
                    "Failed to update OSC output: {:#}",
                    e
                ))),
            }
        }
    }
}

/// Bind the first free port in `start..start + PORT_SEARCH_SPAN`
pub async fn bind_free_port(host: &str, start: u16) -> Result<TcpListener> {
    let end = start.saturating_add(PORT_SEARCH_SPAN);
    for port in start..end {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("API port {} unavailable: {}", port, e),
        }
    }
    anyhow::bail!("No free API port in {}..{}", start, end)
}

/// Bind the API listener, falling back to the next free port
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let listener = bind_free_port(host, port).await?;
    let addr = listener.local_addr().context("Failed to read API address")?;
    if addr.port() != port {
        warn!("API port {} busy, using {}", port, addr.port());
    }
    Ok(listener)
}

/// Serve the API on `listener`; returns when `shutdown` flips to true
pub async fn start_server(
    state: Arc<ApiState>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let router = build_router(state);

    let addr = listener.local_addr().context("Failed to read API address")?;
    info!("🌐 Observer API on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("API server error")?;

    Ok(())
}
