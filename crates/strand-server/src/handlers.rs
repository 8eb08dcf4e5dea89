//! Connection handlers and server assembly.
//!
//! The socket is downstream-only for data: a connection manages its room
//! subscriptions and receives event pushes, while all mutations arrive over
//! the HTTP routes. Each connection runs one task that owns the socket;
//! per-room forwarder tasks drain broadcast receivers into the connection's
//! mpsc so a slow socket never blocks a publisher.

use crate::config::Config;
use crate::gateway::Gateway;
use crate::metrics::{self, ConnectionGuard};
use crate::routes::{self, AppState};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use strand_core::{
    role_topic, user_topic, Broadcaster, Event, RegistryConfig, RoomRegistry, SalonDefaults,
    ServiceCatalog, StateStore,
};
use strand_protocol::{codec, error_codes, Frame, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(config: Config) -> Result<()> {
    let registry = Arc::new(RoomRegistry::with_config(RegistryConfig {
        max_rooms: config.limits.max_rooms,
        max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
        ..RegistryConfig::default()
    }));
    let broadcaster = Broadcaster::new(Arc::clone(&registry));

    let mut catalog = ServiceCatalog::new(config.salon.default_service_minutes);
    for service in &config.services {
        catalog.register(service.clone());
    }
    let store = StateStore::new(SalonDefaults {
        avg_service_minutes: config.salon.avg_service_minutes,
    });
    let gateway = Arc::new(Gateway::new(
        store,
        catalog,
        broadcaster,
        config.salon.queue_retention_minutes,
    ));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let ws_path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState {
        gateway,
        registry,
        config,
    });

    let app = Router::new()
        .merge(routes::api_router())
        .route(&ws_path, get(ws_handler))
        .with_state(Arc::clone(&state));

    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Strand server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Identity query parameters appended by the authenticating proxy.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    user: Option<String>,
    role: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, params: ConnectParams) {
    let _guard = ConnectionGuard::new();

    let connection_id = format!(
        "conn_{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let connected = Frame::connected(
        &connection_id,
        PROTOCOL_VERSION.major,
        state.config.heartbeat.interval_ms as u32,
    );
    if let Ok(data) = codec::encode(&connected) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            error!(connection = %connection_id, "Failed to send Connected frame");
            return;
        }
    }

    // Events from subscribed rooms funnel through one mpsc so the socket
    // writes stay in this task.
    let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<(String, Arc<Event>)>();
    let mut subscription_tasks: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    // The caller's own rooms are assigned from identity, not requested.
    if let Some(user) = params.user.as_deref() {
        join_room(&state, &connection_id, &user_topic(user), &mut subscription_tasks, &sub_tx);
    }
    if let Some(role) = params.role.as_deref() {
        join_room(&state, &connection_id, &role_topic(role), &mut subscription_tasks, &sub_tx);
    }

    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some((topic, event)) = sub_rx.recv() => {
                let payload = match serde_json::to_vec(&event.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Failed to serialize event payload");
                        continue;
                    }
                };
                let frame = Frame::event(topic, event.kind.as_str(), event.seq, payload);
                match codec::encode(&frame) {
                    Ok(data) => {
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Failed to encode event frame");
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    if let Err(e) = handle_frame(
                                        &frame,
                                        &connection_id,
                                        &state,
                                        &mut sender,
                                        &mut subscription_tasks,
                                        &sub_tx,
                                    )
                                    .await
                                    {
                                        warn!(connection = %connection_id, error = %e, "Frame handling error");
                                        break;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Protocol error, dropping buffer");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }

                        metrics::record_frame_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(_))) => {
                        warn!(connection = %connection_id, "Ignoring text frame on binary protocol");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Keepalive only.
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    for (_, handle) in subscription_tasks {
        handle.abort();
    }
    state.registry.drop_connection(&connection_id);
    metrics::set_active_rooms(state.registry.room_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: &Frame,
    connection_id: &str,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    subscription_tasks: &mut HashMap<String, tokio::task::JoinHandle<()>>,
    sub_tx: &mpsc::UnboundedSender<(String, Arc<Event>)>,
) -> Result<()> {
    match frame {
        Frame::Subscribe { id, topic } => {
            debug!(connection = %connection_id, topic = %topic, "Subscribe request");

            // Clients join salon rooms themselves; user and role rooms come
            // from the authenticated identity at connect time.
            let response = if !topic.starts_with("salon:") {
                Frame::error(
                    *id,
                    error_codes::BAD_TOPIC,
                    "only salon:{id} topics can be subscribed",
                )
            } else if subscription_tasks.contains_key(topic.as_str()) {
                Frame::ack(*id)
            } else {
                match state.registry.subscribe(connection_id, topic) {
                    Ok(rx) => {
                        subscription_tasks.insert(
                            topic.clone(),
                            spawn_forwarder(topic.clone(), rx, sub_tx.clone()),
                        );
                        metrics::record_subscription();
                        metrics::set_active_rooms(state.registry.room_count());
                        Frame::ack(*id)
                    }
                    Err(e) => {
                        warn!(connection = %connection_id, topic = %topic, error = %e, "Subscribe failed");
                        Frame::error(*id, error_codes::SUBSCRIBE_FAILED, e.to_string())
                    }
                }
            };

            send_frame(sender, &response).await?;
        }

        Frame::Unsubscribe { id, topic } => {
            debug!(connection = %connection_id, topic = %topic, "Unsubscribe request");

            if let Some(handle) = subscription_tasks.remove(topic.as_str()) {
                handle.abort();
            }
            state.registry.unsubscribe(connection_id, topic);
            metrics::set_active_rooms(state.registry.room_count());
            send_frame(sender, &Frame::ack(*id)).await?;
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(*timestamp)).await?;
        }

        Frame::Pong { .. } => {
            // Keepalive only.
        }

        Frame::Connect { version, .. } => {
            debug!(
                connection = %connection_id,
                version = version,
                "Connect frame (already connected)"
            );
        }

        _ => {
            warn!(connection = %connection_id, frame_type = ?frame.frame_type(), "Unexpected frame type");
        }
    }

    Ok(())
}

/// Join a room and start forwarding its events to the connection.
fn join_room(
    state: &Arc<AppState>,
    connection_id: &str,
    topic: &str,
    subscription_tasks: &mut HashMap<String, tokio::task::JoinHandle<()>>,
    sub_tx: &mpsc::UnboundedSender<(String, Arc<Event>)>,
) {
    match state.registry.subscribe(connection_id, topic) {
        Ok(rx) => {
            subscription_tasks.insert(
                topic.to_string(),
                spawn_forwarder(topic.to_string(), rx, sub_tx.clone()),
            );
            metrics::record_subscription();
            metrics::set_active_rooms(state.registry.room_count());
        }
        Err(e) => {
            warn!(connection = %connection_id, topic = %topic, error = %e, "Room join failed");
        }
    }
}

/// Drain a room's broadcast receiver into the connection's mpsc.
fn spawn_forwarder(
    topic: String,
    mut rx: broadcast::Receiver<Arc<Event>>,
    tx: mpsc::UnboundedSender<(String, Arc<Event>)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send((topic.clone(), event)).is_err() {
                        break; // Connection task gone
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                // At-most-once delivery: a lagged viewer skips ahead.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    })
}

/// Send a frame on the socket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
