//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{charge_point_id}`
//! or `ws://<host>:<port>/{charge_point_id}`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::commands::SharedCommandSender;
use crate::application::dlm::DlmHandle;
use crate::application::handlers::OcppHandlerV16;
use crate::application::identity::SharedIdentityService;
use crate::application::services::Provisioner;
use crate::application::session::SharedSessionRegistry;
use crate::support::shutdown::ShutdownSignal;

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Everything a connection task needs
#[derive(Clone)]
pub struct OcppServerContext {
    pub session_registry: SharedSessionRegistry,
    pub command_sender: SharedCommandSender,
    pub dlm: DlmHandle,
    pub identity: SharedIdentityService,
    pub provisioner: Provisioner,
    pub heartbeat_interval: u32,
}

/// OCPP WebSocket Server
pub struct OcppServer {
    address: String,
    context: Arc<OcppServerContext>,
    shutdown: ShutdownSignal,
}

impl OcppServer {
    pub fn new(address: impl Into<String>, context: OcppServerContext, shutdown: ShutdownSignal) -> Self {
        Self {
            address: address.into(),
            context: Arc::new(context),
            shutdown,
        }
    }

    /// Accept stations until shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.address).await?;

        info!("🔌 OCPP 1.6 Central System started on ws://{}", self.address);
        info!(
            "   Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
            self.address
        );

        let stop = self.shutdown.notified().wait();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = &mut stop => {
                    info!("🛑 WebSocket server received shutdown signal");
                    break;
                }
            }
        }

        let open = self.context.session_registry.count();
        if open > 0 {
            info!(open, "Closing charge point sessions");
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let context = self.context.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, context, shutdown).await {
                warn!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Extract charge point ID from WebSocket request path.
/// Expected format: /ocpp/{charge_point_id} or /{charge_point_id}
fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

fn offers_ocpp16(request: &Request) -> bool {
    request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .map(|protocols| protocols.split(',').any(|p| p.trim() == OCPP_SUBPROTOCOL))
        .unwrap_or(false)
}

fn reject(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<OcppServerContext>,
    shutdown: ShutdownSignal,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut charge_point_id: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, mut response: Response| {
        let path = req.uri().path();
        debug!("WebSocket handshake from: {}, path: {}", addr, path);

        let Some(id) = extract_charge_point_id(path) else {
            warn!("Rejecting {}: no charge point id in path {}", addr, path);
            return Err(reject("expected /ocpp/{chargePointId}"));
        };

        if offers_ocpp16(req) {
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(OCPP_SUBPROTOCOL));
        } else {
            warn!(charge_point_id = id.as_str(), "Client did not offer ocpp1.6, continuing without subprotocol");
        }
        charge_point_id = Some(id);
        Ok(response)
    })
    .await?;

    let Some(charge_point_id) = charge_point_id else {
        return Ok(());
    };
    info!(charge_point_id = charge_point_id.as_str(), remote_addr = %addr, "Connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = context
        .session_registry
        .register(&charge_point_id, tx, Some(addr.to_string()));
    metrics::gauge!("ocpp_connected_charge_points").set(context.session_registry.count() as f64);

    match context.dlm.connect(&charge_point_id, Some(addr.to_string())).await {
        Ok(_) => {
            context.provisioner.spawn(&charge_point_id);
        }
        Err(e) => error!(charge_point_id = charge_point_id.as_str(), error = %e, "Engine refused connection"),
    }

    let handler = OcppHandlerV16::new(
        charge_point_id.clone(),
        context.dlm.clone(),
        context.identity.clone(),
        context.command_sender.clone(),
        context.heartbeat_interval,
    );

    // Outgoing message sender task
    let cp_id_send = charge_point_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            debug!("[{}] -> {}", cp_id_send, msg);
            if let Err(e) = ws_sender.send(Message::Text(msg)).await {
                error!("[{}] Send error: {}", cp_id_send, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Incoming message receiver task
    let cp_id_recv = charge_point_id.clone();
    let session_reg = context.session_registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!("[{}] <- {}", cp_id_recv, text);
                    session_reg.touch(&cp_id_recv);

                    if let Some(response) = handler.handle(&text).await {
                        if let Err(e) = session_reg.send_to(&cp_id_recv, response) {
                            error!("[{}] Failed to send response: {}", cp_id_recv, e);
                            break;
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!("[{}] Close frame received: {:?}", cp_id_recv, frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    warn!("[{}] Binary message received ({} bytes), ignoring", cp_id_recv, data.len());
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    warn!("[{}] WebSocket error: {}", cp_id_recv, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = shutdown.notified().wait() => {
            info!("[{}] Connection closing due to server shutdown", charge_point_id);
        }
    }
    send_task.abort();
    recv_task.abort();

    // A newer connection may already own this id; only the current one reports offline.
    if context.session_registry.unregister(&charge_point_id, connection_id) {
        context.command_sender.cleanup_charge_point(&charge_point_id);
        if let Err(e) = context.dlm.disconnect(&charge_point_id).await {
            warn!(charge_point_id = charge_point_id.as_str(), error = %e, "Disconnect not delivered");
        }
        info!(charge_point_id = charge_point_id.as_str(), "Disconnected");
    } else {
        debug!(charge_point_id = charge_point_id.as_str(), connection_id, "Superseded connection closed");
    }
    metrics::gauge!("ocpp_connected_charge_points").set(context.session_registry.count() as f64);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_point_id_from_path() {
        assert_eq!(extract_charge_point_id("/ocpp/A001"), Some("A001".into()));
        assert_eq!(extract_charge_point_id("/ocpp/A001/"), Some("A001".into()));
        assert_eq!(extract_charge_point_id("/B17"), Some("B17".into()));
        assert_eq!(extract_charge_point_id("/"), None);
        assert_eq!(extract_charge_point_id("/ocpp/"), None);
        assert_eq!(extract_charge_point_id("/a/b"), None);
    }
}
