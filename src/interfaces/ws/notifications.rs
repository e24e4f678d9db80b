//! `/events` WebSocket
//!
//! Streams event-bus messages to operator dashboards. Clients may narrow the
//! stream with `?charge_point_id=`, `?group_id=` and a comma separated
//! `?event_types=` list.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::application::events::{Event, EventMessage, SharedEventBus};

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub charge_point_id: Option<String>,
    pub group_id: Option<String>,
    pub event_types: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, message: &EventMessage) -> bool {
        let event = &message.event;

        if let Some(ref cp_id) = self.charge_point_id {
            if event.charge_point_id() != Some(cp_id.as_str()) {
                return false;
            }
        }

        if let Some(ref group_id) = self.group_id {
            if group_of(event) != Some(group_id.as_str()) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.split(',').map(str::trim).any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

fn group_of(event: &Event) -> Option<&str> {
    match event {
        Event::ChargePointConnected(e) => Some(&e.group_id),
        Event::TargetChanged(e) => Some(&e.group_id),
        Event::DlmAlarmRaised(e) | Event::DlmAlarmCleared(e) => Some(&e.group_id),
        _ => None,
    }
}

pub async fn ws_events_handler(
    ws: WebSocketUpgrade,
    State(event_bus): State<SharedEventBus>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    info!(
        charge_point_id = ?filter.charge_point_id,
        group_id = ?filter.group_id,
        event_types = ?filter.event_types,
        "New event stream connection"
    );
    ws.on_upgrade(move |socket| stream_events(socket, event_bus, filter))
}

async fn stream_events(socket: WebSocket, event_bus: SharedEventBus, filter: EventFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriber = event_bus.subscribe();

    let welcome = serde_json::json!({
        "type": "connected",
        "filter": {
            "charge_point_id": filter.charge_point_id,
            "group_id": filter.group_id,
            "event_types": filter.event_types,
        }
    });
    if let Err(e) = sender.send(Message::Text(welcome.to_string().into())).await {
        error!("Failed to send welcome message: {}", e);
        return;
    }

    loop {
        select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("Event stream socket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            event = subscriber.recv() => {
                let Some(message) = event else {
                    warn!("Event bus closed");
                    break;
                };
                if !filter.matches(&message) {
                    continue;
                }
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                        debug!(event_type = message.event.event_type(), "Event streamed");
                    }
                    Err(e) => error!("Failed to serialize event: {}", e),
                }
            }
        }
    }

    info!("Event stream client disconnected");
}
