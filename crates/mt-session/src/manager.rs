use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::SessionId;

/// Delivers bytes to whatever sits on the other end of a connection handle.
/// Implemented by the transport adapter; kept generic here so the session
/// manager has no knowledge of WebSockets, TLS, or framing.
pub trait Transport<H>: Send + Sync {
    /// Returns `true` if the bytes were handed off for delivery. A `false`
    /// return means the handle is already gone; the caller should treat the
    /// session as closed.
    fn send(&self, handle: &H, bytes: Vec<u8>) -> bool;

    /// Tears down the connection behind `handle`, e.g. after a protocol
    /// violation with no recoverable job id to answer. Returns `true` if the
    /// handle was still live. `reason` is informational (logging only); it
    /// is not guaranteed to reach the peer.
    fn close(&self, handle: &H, reason: &str) -> bool;
}

/// Tracks the bidirectional mapping between a transport's connection
/// handles and the session ids the rest of the control plane works with,
/// and routes outbound replies through the registered [`Transport`].
///
/// `on_open`/`on_close` fire the caller-supplied hooks synchronously on the
/// calling thread, mirroring the original's direct virtual-call dispatch —
/// a hook that wants to run elsewhere (e.g. cancelling a session's jobs on
/// a pool) must hand off its own work.
pub struct SessionManager<H, T> {
    transport: T,
    next_id: AtomicU64,
    by_handle: RwLock<HashMap<H, SessionId>>,
    by_session: RwLock<HashMap<SessionId, H>>,
    on_open: Box<dyn Fn(SessionId) + Send + Sync>,
    on_close: Box<dyn Fn(SessionId) + Send + Sync>,
}

impl<H, T> SessionManager<H, T>
where
    H: Eq + Hash + Clone + Send + Sync,
    T: Transport<H>,
{
    pub fn new(
        transport: T,
        on_open: impl Fn(SessionId) + Send + Sync + 'static,
        on_close: impl Fn(SessionId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            by_handle: RwLock::new(HashMap::new()),
            by_session: RwLock::new(HashMap::new()),
            on_open: Box::new(on_open),
            on_close: Box::new(on_close),
        }
    }

    /// Registers a newly-opened connection and returns its session id.
    pub fn on_open(&self, handle: H) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.by_handle
            .write()
            .expect("session manager poisoned")
            .insert(handle.clone(), id);
        self.by_session
            .write()
            .expect("session manager poisoned")
            .insert(id, handle);
        (self.on_open)(id);
        id
    }

    /// Tears down a connection's session mapping and fires the close hook.
    /// Returns the session id that was closed, if the handle was known.
    pub fn on_close(&self, handle: &H) -> Option<SessionId> {
        let id = self
            .by_handle
            .write()
            .expect("session manager poisoned")
            .remove(handle)?;
        self.by_session
            .write()
            .expect("session manager poisoned")
            .remove(&id);
        (self.on_close)(id);
        Some(id)
    }

    /// Looks up the session id for a still-open connection handle.
    pub fn session_of(&self, handle: &H) -> Option<SessionId> {
        self.by_handle
            .read()
            .expect("session manager poisoned")
            .get(handle)
            .copied()
    }

    /// Sends `bytes` to the connection behind `session_id`. Returns `false`
    /// if the session is already closed or the transport rejected the send.
    pub fn send(&self, session_id: SessionId, bytes: Vec<u8>) -> bool {
        let handle = self
            .by_session
            .read()
            .expect("session manager poisoned")
            .get(&session_id)
            .cloned();
        match handle {
            Some(handle) => self.transport.send(&handle, bytes),
            None => false,
        }
    }

    /// Closes the connection behind `session_id`. Returns `false` if the
    /// session is already closed or the transport couldn't reach it; the
    /// session's own mapping is torn down separately, by `on_close`, once
    /// the transport observes the connection actually drop.
    pub fn close(&self, session_id: SessionId, reason: &str) -> bool {
        let handle = self
            .by_session
            .read()
            .expect("session manager poisoned")
            .get(&session_id)
            .cloned();
        match handle {
            Some(handle) => self.transport.close(&handle, reason),
            None => false,
        }
    }

    /// Number of currently-open sessions.
    pub fn open_count(&self) -> usize {
        self.by_session.read().expect("poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<(u32, Vec<u8>)>>,
        closed: Mutex<Vec<u32>>,
    }

    impl Transport<u32> for RecordingTransport {
        fn send(&self, handle: &u32, bytes: Vec<u8>) -> bool {
            self.sent.lock().unwrap().push((*handle, bytes));
            true
        }

        fn close(&self, handle: &u32, _reason: &str) -> bool {
            self.closed.lock().unwrap().push(*handle);
            true
        }
    }

    #[test]
    fn open_then_close_round_trips_through_both_maps() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&opened);
        let c = Arc::clone(&closed);
        let mgr = SessionManager::new(
            RecordingTransport { sent: Mutex::new(Vec::new()), closed: Mutex::new(Vec::new()) },
            move |id| o.lock().unwrap().push(id),
            move |id| c.lock().unwrap().push(id),
        );

        let id = mgr.on_open(42u32);
        assert_eq!(mgr.session_of(&42u32), Some(id));
        assert_eq!(mgr.open_count(), 1);
        assert_eq!(*opened.lock().unwrap(), vec![id]);

        let closed_id = mgr.on_close(&42u32);
        assert_eq!(closed_id, Some(id));
        assert_eq!(mgr.session_of(&42u32), None);
        assert_eq!(mgr.open_count(), 0);
        assert_eq!(*closed.lock().unwrap(), vec![id]);
    }

    #[test]
    fn send_routes_to_the_transport_and_fails_once_closed() {
        let mgr = SessionManager::new(
            RecordingTransport { sent: Mutex::new(Vec::new()), closed: Mutex::new(Vec::new()) },
            |_| {},
            |_| {},
        );
        let id = mgr.on_open(7u32);
        assert!(mgr.send(id, b"hello".to_vec()));
        assert_eq!(mgr.transport.sent.lock().unwrap().len(), 1);

        mgr.on_close(&7u32);
        assert!(!mgr.send(id, b"late".to_vec()));
    }

    #[test]
    fn closing_an_unknown_handle_is_a_no_op() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&closed);
        let mgr = SessionManager::new(
            RecordingTransport { sent: Mutex::new(Vec::new()), closed: Mutex::new(Vec::new()) },
            |_| {},
            move |id| c.lock().unwrap().push(id),
        );
        assert_eq!(mgr.on_close(&99u32), None);
        assert!(closed.lock().unwrap().is_empty());
    }
}
