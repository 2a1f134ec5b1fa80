//! WebSocket transport binding
//!
//! OCPP-J runs over WebSocket with the `ocpp2.0.1` subprotocol. A charging
//! station connects to `<csms-url>/<station-id>`; the CSMS uses the last
//! path segment as the connection id. Each accepted or dialed socket becomes
//! one link: a writer task draining an outbound channel, and a read loop
//! feeding text frames into the engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_hdr_async_with_config, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::WsConfig;
use crate::engine::Engine;
use crate::error::TransportError;
use crate::transport::Transport;

/// OCPP 2.0.1 WebSocket subprotocol
pub const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

/// Transport over a set of WebSocket links
#[derive(Debug)]
pub struct WsTransport {
    config: WsConfig,
    links: RwLock<HashMap<String, mpsc::Sender<Message>>>,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            links: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    fn attach(&self, connection_id: &str, tx: mpsc::Sender<Message>) {
        self.links.write().insert(connection_id.to_string(), tx);
    }

    /// Whether `tx` is the live link for the id
    fn is_current(&self, connection_id: &str, tx: &mpsc::Sender<Message>) -> bool {
        self.links
            .read()
            .get(connection_id)
            .map_or(false, |current| current.same_channel(tx))
    }

    /// Remove the link if `tx` is still the current one for the id
    fn detach(&self, connection_id: &str, tx: &mpsc::Sender<Message>) -> bool {
        let mut links = self.links.write();
        match links.get(connection_id) {
            Some(current) if current.same_channel(tx) => {
                links.remove(connection_id);
                true
            }
            _ => false,
        }
    }

    fn ws_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.config.max_message_size),
            max_frame_size: Some(self.config.max_frame_size),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_frame(&self, connection_id: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self
            .links
            .read()
            .get(connection_id)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(connection_id.to_string()))?;

        let text = String::from_utf8(frame).map_err(|e| TransportError::WebSocket(e.to_string()))?;
        tx.send(Message::Text(text.into()))
            .await
            .map_err(|_| TransportError::Closed(connection_id.to_string()))
    }
}

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(base_url: &str, station_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), station_id)
}

/// Connection id from a request path: its last non-empty segment
pub fn station_id_from_path(path: &str) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty()).last()
}

/// Accept charging stations until the listener fails
pub async fn serve(listener: TcpListener, engine: Engine, transport: Arc<WsTransport>) -> Result<(), TransportError> {
    info!("Accepting OCPP connections on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        let transport = transport.clone();

        tokio::spawn(async move {
            let station_id = Arc::new(Mutex::new(None::<String>));
            let subprotocol = transport.config.subprotocol.clone();
            let callback = {
                let station_id = station_id.clone();
                move |request: &Request, mut response: Response| {
                    let Some(id) = station_id_from_path(request.uri().path()) else {
                        let mut reject = ErrorResponse::new(Some("missing station id".to_string()));
                        *reject.status_mut() = StatusCode::BAD_REQUEST;
                        return Err(reject);
                    };
                    *station_id.lock() = Some(id.to_string());

                    let offered = request
                        .headers()
                        .get(header::SEC_WEBSOCKET_PROTOCOL)
                        .and_then(|v| v.to_str().ok())
                        .map_or(false, |v| v.split(',').any(|p| p.trim() == subprotocol));
                    if offered {
                        if let Ok(value) = HeaderValue::from_str(&subprotocol) {
                            response.headers_mut().insert(header::SEC_WEBSOCKET_PROTOCOL, value);
                        }
                    }
                    Ok(response)
                }
            };

            let ws_stream = match accept_hdr_async_with_config(stream, callback, Some(transport.ws_config())).await {
                Ok(ws_stream) => ws_stream,
                Err(e) => {
                    warn!("Handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            let Some(id) = station_id.lock().take() else {
                return;
            };
            info!(connection_id = %id, "Station connected from {}", peer);
            let (tx, rx) = open_link(&id, &engine, &transport);
            run_link(ws_stream, id, engine, transport, tx, rx).await;
        });
    }
}

/// Dial the CSMS as `station_id` and run the link in the background.
///
/// Returns after the handshake; the handle completes when the link drops.
pub async fn connect(
    csms_url: &str,
    station_id: &str,
    engine: Engine,
    transport: Arc<WsTransport>,
) -> Result<JoinHandle<()>, TransportError> {
    let url = build_ocpp_url(csms_url, station_id);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
    let protocol = HeaderValue::from_str(&transport.config.subprotocol)
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
    request.headers_mut().insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);

    let (ws_stream, response) = connect_async_with_config(request, Some(transport.ws_config()), false)
        .await
        .map_err(|e| {
            error!("WebSocket connection failed: {}", e);
            TransportError::WebSocket(e.to_string())
        })?;

    let accepted_protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());
    if accepted_protocol != Some(transport.config.subprotocol.as_str()) {
        warn!(
            "CSMS did not accept the {} subprotocol, got: {:?}",
            transport.config.subprotocol, accepted_protocol
        );
    }

    info!("WebSocket connected to {}", url);
    let (tx, rx) = open_link(station_id, &engine, &transport);
    Ok(tokio::spawn(run_link(ws_stream, station_id.to_string(), engine, transport, tx, rx)))
}

/// Register a link with the transport and the engine
fn open_link(
    connection_id: &str,
    engine: &Engine,
    transport: &WsTransport,
) -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel::<Message>(transport.config.outbound_buffer.max(1));
    transport.attach(connection_id, tx.clone());
    engine.on_connected(connection_id);
    (tx, rx)
}

/// Pump one socket until it closes
async fn run_link<S>(
    ws_stream: WebSocketStream<S>,
    connection_id: String,
    engine: Engine,
    transport: Arc<WsTransport>,
    tx: mpsc::Sender<Message>,
    mut rx: mpsc::Receiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let writer = {
        let connection_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_tx.send(msg).await {
                    error!(connection_id = %connection_id, "Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        })
    };

    while let Some(msg) = ws_rx.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "WebSocket closed by peer");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(connection_id = %connection_id, "WebSocket error: {}", e);
                break;
            }
        };

        if !transport.is_current(&connection_id, &tx) {
            info!(connection_id = %connection_id, "Link replaced by a newer one, closing");
            break;
        }
        if let Err(e) = engine.on_frame_received(&connection_id, frame).await {
            debug!(connection_id = %connection_id, "Frame not delivered: {}", e);
            break;
        }
    }

    if transport.detach(&connection_id, &tx) {
        engine.on_disconnected(&connection_id);
    }
    writer.abort();
    info!(connection_id = %connection_id, "Link closed");
}
