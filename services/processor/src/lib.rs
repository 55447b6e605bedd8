//! Pre/post-processor service (spec §4.5): receives chunked processor
//! requests over a WebSocket session, aggregates them into a
//! [`ProcessorJob`], and runs completed jobs on a worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use mt_processor::{LanguageConfig, ProcessorJob, ResponseSender, Variant};
use mt_session::{JobPoolError, SessionId, SessionJobPool};
use mt_transport::{ConnHandle, EventSink, WsTransport};
use mt_workerpool::WorkerPool;
use tracing::{debug, warn};

type Sessions = mt_session::SessionManager<ConnHandle, Arc<WsTransport>>;

/// Wires an incoming WebSocket message stream to the processor job pool and
/// worker pool (spec §2 data flow: transport → envelope → job pool →
/// worker pool → chunked replies back out).
pub struct ProcessorSink {
    variant: Variant,
    lang_config: Arc<LanguageConfig>,
    pool: Arc<SessionJobPool<ProcessorJob>>,
    pending: Mutex<HashMap<(SessionId, String), Arc<ProcessorJob>>>,
    sessions: OnceLock<Arc<Sessions>>,
}

impl ProcessorSink {
    pub fn new(variant: Variant, lang_config: Arc<LanguageConfig>, worker_pool: Arc<WorkerPool>) -> Arc<Self> {
        let pool = SessionJobPool::new(
            |job| debug!(job_token = job_id_of(&job), "processor job reaped"),
            move |job| -> Result<(), JobPoolError> {
                worker_pool.submit(move || job.run());
                Ok(())
            },
        );
        Arc::new(Self {
            variant,
            lang_config,
            pool,
            pending: Mutex::new(HashMap::new()),
            sessions: OnceLock::new(),
        })
    }

    /// Must be called once, after the transport has created its
    /// [`SessionManager`](mt_session::SessionManager) and before `serve`
    /// starts accepting connections.
    pub fn bind_sessions(&self, sessions: Arc<Sessions>) {
        self.sessions.set(sessions).ok().expect("bind_sessions must only be called once");
    }

    /// Cancels and drops any chunk assembly in progress for a closed
    /// session (spec §3: "closing broadcasts a cancellation to every job
    /// belonging to the session").
    pub fn cancel_session(&self, session_id: SessionId) {
        self.pool.cancel_session(session_id);
        self.pending.lock().expect("poisoned").retain(|(sid, _), _| *sid != session_id);
    }

    fn sender(&self) -> ResponseSender {
        let sessions = Arc::clone(self.sessions.get().expect("bind_sessions not called"));
        Arc::new(move |session_id, envelope: mt_protocol::Envelope| sessions.send(session_id, envelope.serialize()))
    }

    fn close(&self, session_id: SessionId, reason: &str) {
        if let Some(sessions) = self.sessions.get() {
            sessions.close(session_id, reason);
        }
    }
}

fn job_id_of(job: &Arc<ProcessorJob>) -> &str {
    use mt_session::PoolJob;
    job.job_id()
}

impl EventSink for ProcessorSink {
    fn on_message(&self, session_id: SessionId, bytes: Vec<u8>) {
        let envelope = match mt_protocol::Envelope::parse(&bytes) {
            Ok(env) => env,
            Err(err) => {
                warn!(session_id, %err, "closing session on malformed frame");
                self.close(session_id, "malformed frame");
                return;
            }
        };
        if !matches!(envelope.msg_type(), Ok(mt_protocol::MsgType::ProcRequest)) {
            warn!(session_id, "discarding non-proc_request frame");
            return;
        }
        let payload = match envelope.proc_request_payload() {
            Ok(p) => p,
            Err(err) => {
                warn!(session_id, %err, "closing session on malformed proc_request payload");
                self.close(session_id, "malformed proc_request payload");
                return;
            }
        };

        let key = (session_id, payload.job_token.clone());
        let mut pending = self.pending.lock().expect("poisoned");
        let job = pending
            .entry(key.clone())
            .or_insert_with(|| {
                ProcessorJob::new(
                    session_id,
                    payload.job_token.clone(),
                    self.variant,
                    Arc::clone(&self.lang_config),
                    payload.num_chunks,
                    self.sender(),
                )
            })
            .clone();
        drop(pending);

        if let Err(err) = job.add_chunk(payload.chunk_idx, &payload.language, payload.chunk) {
            warn!(session_id, job_token = %payload.job_token, %err, "closing session on chunk invariant violation");
            self.pending.lock().expect("poisoned").remove(&key);
            self.close(session_id, "chunk invariant violation");
            return;
        }

        if job.is_complete() {
            self.pending.lock().expect("poisoned").remove(&key);
            if let Err(err) = self.pool.schedule(job) {
                warn!(session_id, job_token = %key.1, %err, "failed to schedule completed processor job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_protocol::{Envelope, ProcessorRequest};

    fn single_chunk_request(job_token: &str) -> Vec<u8> {
        Envelope::proc_request(&ProcessorRequest {
            job_token: job_token.to_owned(),
            chunk_idx: 0,
            num_chunks: 1,
            priority: 0,
            language: "auto".to_owned(),
            chunk: "Hello World.".to_owned(),
        })
        .serialize()
    }

    #[test]
    fn assembly_waits_for_every_chunk_before_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let lang_config = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let worker_pool = Arc::new(WorkerPool::new(1));
        let sink = ProcessorSink::new(Variant::Pre, lang_config, worker_pool);

        let env = Envelope::proc_request(&ProcessorRequest {
            job_token: "T1".to_owned(),
            chunk_idx: 0,
            num_chunks: 2,
            priority: 0,
            language: "auto".to_owned(),
            chunk: "part one ".to_owned(),
        })
        .serialize();

        // No sessions bound yet; sending a single chunk of a 2-chunk job
        // must not try to build a response sender.
        sink.on_message(1, env);
        assert_eq!(sink.pending.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_frame_is_ignored_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let lang_config = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let worker_pool = Arc::new(WorkerPool::new(1));
        let sink = ProcessorSink::new(Variant::Pre, lang_config, worker_pool);
        sink.on_message(1, b"not json".to_vec());
    }

    #[test]
    fn complete_single_chunk_job_is_removed_from_pending_before_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let lang_config = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let worker_pool = Arc::new(WorkerPool::new(1));
        let sink = ProcessorSink::new(Variant::Pre, lang_config, worker_pool);

        let transport = mt_transport::WsServer::new(Arc::clone(&sink), |_| {}, |_| {});
        sink.bind_sessions(Arc::clone(&transport.sessions));

        sink.on_message(1, single_chunk_request("T2"));
        assert!(sink.pending.lock().unwrap().is_empty());
    }
}
