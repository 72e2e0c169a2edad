//! WebSocket live channel.
//!
//! Each connection is one hub subscription. The first frame is the
//! `initial-data` snapshot, followed by a `sensor-data` frame per stored
//! reading. Clients may ask for one sensor's latest reading with
//! `{"type":"request-sensor","farm_id":..,"device_id":..}` or by its combined
//! id, `{"type":"request-sensor","sensor_id":"F1_D1"}` (`sensorId` also works).

use crate::hub::{DistributionHub, SubscriberId, Subscription};
use crate::AppState;
use agripal_types::{ClientRequest, LiveEvent, SensorKey, SensorRef};
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};

/// Handler for `GET /ws`.
///
/// The session runs on the server's session tracker so shutdown can wait for
/// it to close.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::debug!(remote_addr = %addr, "live client upgrading");
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track_future(handle_socket(socket, state, addr)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let subscription = state.hub.subscribe();
    let subscriber = subscription.id();
    tracing::info!(subscriber, remote_addr = %addr, "live client connected");

    let (sender, mut receiver) = socket.split();

    // Forward hub events to the socket. Ends when the hub lets go of this
    // subscriber (shutdown or eviction) or the socket fails.
    let mut send_task = tokio::spawn(forward_events(subscription, sender));

    let hub = state.hub.clone();
    let receive = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                AxumMessage::Text(text) => handle_client_frame(&hub, subscriber, text.as_str()),
                AxumMessage::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        () = receive => send_task.abort(),
    }

    state.hub.unsubscribe(subscriber);
    tracing::info!(subscriber, remote_addr = %addr, "live client disconnected");
}

async fn forward_events(
    mut subscription: Subscription,
    mut sender: SplitSink<WebSocket, AxumMessage>,
) {
    while let Some(event) = subscription.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(event = event.name(), "failed to serialize live event: {}", e);
                continue;
            }
        };
        if sender.send(AxumMessage::Text(json.into())).await.is_err() {
            return;
        }
    }
    let _ = sender.send(AxumMessage::Close(None)).await;
}

fn handle_client_frame(hub: &DistributionHub, subscriber: SubscriberId, text: &str) {
    match serde_json::from_str::<ClientRequest>(text) {
        Ok(ClientRequest::RequestSensor(sensor)) => {
            let key = match sensor {
                SensorRef::Key { farm_id, device_id } => SensorKey::new(farm_id, device_id),
                SensorRef::Id { sensor_id } => match hub.store().resolve_id(&sensor_id) {
                    Some(key) => key,
                    None => {
                        tracing::debug!(subscriber, sensor = %sensor_id, "requested sensor has no readings");
                        return;
                    }
                },
            };
            if !hub.request_one(subscriber, &key) {
                tracing::debug!(subscriber, sensor = %key, "requested sensor has no readings");
            }
        }
        Err(e) => {
            tracing::debug!(subscriber, "unrecognised client frame: {}", e);
            hub.notify(
                subscriber,
                LiveEvent::Error {
                    message: format!("unrecognised request: {e}"),
                },
            );
        }
    }
}
