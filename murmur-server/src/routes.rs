use crate::relay::{RelayStream, StreamingRelay};
use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::BytesRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use murmur_shared::{encode_event, ClientMessage, ConversationRequest, ErrorKind, StreamEvent};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub const NDJSON: &str = "application/x-ndjson";

#[derive(Clone)]
pub struct AppState {
    relay: StreamingRelay,
}

pub fn router(relay: StreamingRelay) -> Router {
    router_with_body_limit(relay, crate::config::DEFAULT_MAX_BODY_BYTES)
}

/// Same routes, rejecting chat bodies over `max_body_bytes`.
pub fn router_with_body_limit(relay: StreamingRelay, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/ws/chat", get(ws_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { relay })
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            error!("Failed to read request body: {}", rejection);
            return rejected_with(
                rejection.status(),
                StreamEvent::error(
                    ErrorKind::InvalidRequest,
                    format!("Request body rejected: {}", rejection.body_text()),
                    false,
                ),
            );
        }
    };
    let request = match serde_json::from_slice::<ConversationRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            error!("Failed to parse request: {}", e);
            return rejected(StreamEvent::error(
                ErrorKind::InvalidRequest,
                format!("Invalid request format: {}", e),
                false,
            ));
        }
    };
    if let Err(event) = request.validate() {
        return rejected(event);
    }

    info!(
        "Chat request with {} messages via {}",
        request.len(),
        state.relay.provider_name()
    );

    // The body owns the relay stream; a client disconnect drops it and
    // cancels the provider call.
    let events = state.relay.relay(request, &CancellationToken::new());
    let body = Body::from_stream(events.map(|event| encode_event(&event)));
    ([(header::CONTENT_TYPE, NDJSON)], body).into_response()
}

fn rejected(event: StreamEvent) -> Response {
    rejected_with(StatusCode::BAD_REQUEST, event)
}

fn rejected_with(status: StatusCode, event: StreamEvent) -> Response {
    let line = encode_event(&event).unwrap_or_default();
    (status, [(header::CONTENT_TYPE, NDJSON)], line).into_response()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

async fn handle_socket(socket: WebSocket, relay: StreamingRelay) {
    info!("WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();
    let mut active: Option<RelayStream> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Chat(request)) if active.is_none() => {
                        info!("WebSocket chat request with {} messages", request.len());
                        active = Some(relay.relay(request, &CancellationToken::new()));
                        None
                    }
                    Ok(ClientMessage::Chat(_)) => Some(StreamEvent::error(
                        ErrorKind::InvalidRequest,
                        "a response is already streaming on this connection",
                        false,
                    )),
                    Ok(ClientMessage::Cancel) => {
                        if let Some(stream) = &active {
                            debug!("Client cancelled the in-flight relay");
                            stream.cancel();
                        }
                        None
                    }
                    Err(e) => {
                        error!("Failed to parse request: {}", e);
                        Some(StreamEvent::error(
                            ErrorKind::InvalidRequest,
                            format!("Invalid request format: {}", e),
                            false,
                        ))
                    }
                };

                if let Some(event) = reply {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
            }
            event = next_event(&mut active) => {
                let Some(event) = event else {
                    active = None;
                    continue;
                };
                if event.is_terminal() {
                    active = None;
                }
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    // Dropping an in-flight relay cancels it.
    drop(active);
    info!("WebSocket connection closed");
}

async fn next_event(active: &mut Option<RelayStream>) -> Option<StreamEvent> {
    match active {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn send_event<S>(sender: &mut S, event: &StreamEvent) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = encode_event(event).map_err(|e| error!("Failed to serialize event: {}", e))?;
    sender
        .send(Message::Text(json.trim_end().to_string()))
        .await
        .map_err(|e| error!("Failed to send event: {}", e))
}
