//! Transport adapter (spec §4.8): WebSocket framing over `axum`, with
//! optional TLS termination picked from Mozilla's Old/Intermediate/Modern
//! server profiles. Everything above this crate talks to [`mt_session`]'s
//! `SessionId`/`SessionManager` and never sees a socket.

mod tls;
mod ws;

pub use tls::{into_axum_rustls_config, ServerTlsConfig, TlsConfigError, TlsProfile};
pub use ws::{ConnHandle, EventSink, WsServer, WsTransport};
