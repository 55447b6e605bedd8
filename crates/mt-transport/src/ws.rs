use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use mt_session::{SessionId, SessionManager, Transport};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Opaque per-connection handle a [`WsTransport`] hands to [`SessionManager`]
/// in place of a socket reference (spec §4.8: the session layer never holds
/// a raw connection).
pub type ConnHandle = u64;

/// Receives decoded inbound frames, one envelope per WebSocket message, with
/// the session id already resolved (spec §4.2: every inbound message is
/// scoped to its session before it reaches role-specific logic).
pub trait EventSink: Send + Sync {
    fn on_message(&self, session_id: SessionId, bytes: Vec<u8>);
}

/// Routes outbound bytes to the `mpsc` channel feeding a connection's write
/// task. `send` never blocks: the channel is unbounded, so a slow reader
/// backs up in memory rather than stalling the caller, matching the
/// original's fire-and-forget `ws::stream::async_write`.
pub struct WsTransport {
    senders: RwLock<HashMap<ConnHandle, mpsc::UnboundedSender<Message>>>,
}

impl WsTransport {
    fn new() -> Self {
        Self { senders: RwLock::new(HashMap::new()) }
    }

    fn register(&self, handle: ConnHandle) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.write().expect("poisoned").insert(handle, tx);
        rx
    }

    fn unregister(&self, handle: &ConnHandle) {
        self.senders.write().expect("poisoned").remove(handle);
    }

    fn send_bytes(&self, handle: &ConnHandle, bytes: Vec<u8>) -> bool {
        match self.senders.read().expect("poisoned").get(handle) {
            Some(tx) => tx.send(Message::Binary(bytes.into())).is_ok(),
            None => false,
        }
    }

    /// Queues a WebSocket close frame ahead of the outbox; `handle_socket`
    /// sends it and then tears the connection down, same as a client-
    /// initiated close (spec §4.8: "the core produces... `close(handle,
    /// reason)`").
    fn close_conn(&self, handle: &ConnHandle, reason: &str) -> bool {
        match self.senders.read().expect("poisoned").get(handle) {
            Some(tx) => tx
                .send(Message::Close(Some(CloseFrame {
                    code: 1002,
                    reason: reason.to_owned().into(),
                })))
                .is_ok(),
            None => false,
        }
    }
}

impl Transport<ConnHandle> for Arc<WsTransport> {
    fn send(&self, handle: &ConnHandle, bytes: Vec<u8>) -> bool {
        self.as_ref().send_bytes(handle, bytes)
    }

    fn close(&self, handle: &ConnHandle, reason: &str) -> bool {
        self.as_ref().close_conn(handle, reason)
    }
}

/// A running WebSocket listener wired to one [`EventSink`]. Owns the
/// [`SessionManager`] the rest of a service's control plane schedules work
/// against.
pub struct WsServer<S> {
    pub sessions: Arc<SessionManager<ConnHandle, Arc<WsTransport>>>,
    transport: Arc<WsTransport>,
    sink: Arc<S>,
    next_handle: AtomicU64,
}

impl<S> WsServer<S>
where
    S: EventSink + 'static,
{
    pub fn new(
        sink: Arc<S>,
        on_open: impl Fn(SessionId) + Send + Sync + 'static,
        on_close: impl Fn(SessionId) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let transport = Arc::new(WsTransport::new());
        let sessions = Arc::new(SessionManager::new(Arc::clone(&transport), on_open, on_close));
        Arc::new(Self { sessions, transport, sink, next_handle: AtomicU64::new(1) })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().route("/", get(ws_handler::<S>)).with_state(Arc::clone(self))
    }

    pub async fn serve_plain(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await
    }

    pub async fn serve_tls(self: Arc<Self>, addr: SocketAddr, tls: RustlsConfig) -> std::io::Result<()> {
        axum_server::bind_rustls(addr, tls)
            .serve(self.router().into_make_service())
            .await
    }
}

async fn ws_handler<S>(State(server): State<Arc<WsServer<S>>>, ws: WebSocketUpgrade) -> impl IntoResponse
where
    S: EventSink + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

async fn handle_socket<S>(server: Arc<WsServer<S>>, mut socket: WebSocket)
where
    S: EventSink + 'static,
{
    let handle = server.next_handle.fetch_add(1, Ordering::SeqCst);
    let mut outbox = server.transport.register(handle);
    let session_id = server.sessions.on_open(handle);
    debug!(session_id, handle, "websocket session opened");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Binary(data))) => server.sink.on_message(session_id, data.to_vec()),
                    Some(Ok(Message::Text(text))) => server.sink.on_message(session_id, text.as_bytes().to_vec()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(err)) => { warn!(session_id, %err, "websocket read error"); break; }
                }
            }
            sent = outbox.recv() => {
                match sent {
                    Some(msg) => {
                        let is_close = matches!(msg, Message::Close(_));
                        if socket.send(msg).await.is_err() || is_close {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    server.transport.unregister(&handle);
    server.sessions.on_close(&handle);
    debug!(session_id, handle, "websocket session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        received: Mutex<Vec<(SessionId, Vec<u8>)>>,
    }

    impl EventSink for RecordingSink {
        fn on_message(&self, session_id: SessionId, bytes: Vec<u8>) {
            self.received.lock().unwrap().push((session_id, bytes));
        }
    }

    #[test]
    fn transport_send_fails_after_unregister() {
        let transport = Arc::new(WsTransport::new());
        let handle: ConnHandle = 1;
        let _rx = transport.register(handle);
        assert!(transport.send_bytes(&handle, b"hi".to_vec()));
        transport.unregister(&handle);
        assert!(!transport.send_bytes(&handle, b"late".to_vec()));
    }

    #[test]
    fn close_queues_a_close_frame_on_the_outbox() {
        let transport = Arc::new(WsTransport::new());
        let handle: ConnHandle = 1;
        let mut rx = transport.register(handle);
        assert!(transport.close_conn(&handle, "protocol violation"));
        assert!(matches!(rx.try_recv(), Ok(Message::Close(_))));
    }

    #[test]
    fn close_fails_once_unregistered() {
        let transport = Arc::new(WsTransport::new());
        let handle: ConnHandle = 1;
        let _rx = transport.register(handle);
        transport.unregister(&handle);
        assert!(!transport.close_conn(&handle, "gone"));
    }

    #[tokio::test]
    async fn server_opens_a_session_per_handle_and_routes_sends_through_transport() {
        let sink = Arc::new(RecordingSink { received: Mutex::new(Vec::new()) });
        let server = WsServer::new(sink, |_| {}, |_| {});
        let rx = server.transport.register(99);
        let id = server.sessions.on_open(99);
        assert!(server.sessions.send(id, b"payload".to_vec()));
        drop(rx);
    }
}
