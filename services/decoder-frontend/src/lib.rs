//! The decoder front-end service (spec §D "only the task boundary"):
//! receives one sentence per `trans_job_request` frame — a balancer's
//! per-sentence task, not a whole client job — translates it against a
//! [`DecodeBackend`], and runs it on a worker pool exactly like the
//! processor and balancer roles.

mod backend;
mod job;

pub use backend::{DecodeBackend, DecodeError, StubBackend, Translated};
pub use job::{ResponseSender, SentenceJob};

use std::sync::{Arc, OnceLock};

use mt_langreg::LanguageRegistry;
use mt_session::{JobPoolError, SessionId, SessionJobPool};
use mt_transport::{ConnHandle, EventSink, WsTransport};
use mt_util::CircularQueue;
use mt_workerpool::WorkerPool;
use tracing::warn;

const HISTORY_CAPACITY: usize = 4;

type Sessions = mt_session::SessionManager<ConnHandle, Arc<WsTransport>>;

/// Wires incoming single-sentence translation requests to a
/// [`DecodeBackend`] through a [`SessionJobPool`], the same control-plane
/// shape `processor::ProcessorSink` uses.
pub struct DecoderFrontendSink {
    backend: Arc<dyn DecodeBackend>,
    lang_registry: Arc<LanguageRegistry>,
    pool: Arc<SessionJobPool<SentenceJob>>,
    sessions: OnceLock<Arc<Sessions>>,
}

impl DecoderFrontendSink {
    pub fn new(backend: Arc<dyn DecodeBackend>, lang_registry: Arc<LanguageRegistry>, worker_pool: Arc<WorkerPool>) -> Arc<Self> {
        let pool = SessionJobPool::new(
            |_job| {},
            move |job: Arc<SentenceJob>| -> Result<(), JobPoolError> {
                worker_pool.submit(move || job.run());
                Ok(())
            },
        );
        Arc::new(Self {
            backend,
            lang_registry,
            pool,
            sessions: OnceLock::new(),
        })
    }

    /// Must be called once, after the transport has created its
    /// `SessionManager` and before `serve` starts accepting connections.
    pub fn bind_sessions(&self, sessions: Arc<Sessions>) {
        self.sessions.set(sessions).ok().expect("bind_sessions must only be called once");
    }

    pub fn cancel_session(&self, session_id: SessionId) {
        self.pool.cancel_session(session_id);
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

impl EventSink for DecoderFrontendSink {
    fn on_message(&self, session_id: SessionId, bytes: Vec<u8>) {
        let envelope = match mt_protocol::Envelope::parse(&bytes) {
            Ok(env) => env,
            Err(err) => {
                warn!(session_id, %err, "closing session on malformed frame");
                self.close(session_id, "malformed frame");
                return;
            }
        };
        if !matches!(envelope.msg_type(), Ok(mt_protocol::MsgType::TransJobRequest)) {
            warn!(session_id, "discarding non-trans_job_request frame");
            return;
        }
        let payload = match envelope.trans_job_request_payload() {
            Ok(p) => p,
            Err(err) => {
                warn!(session_id, %err, "closing session on malformed trans_job_request payload");
                self.close(session_id, "malformed trans_job_request payload");
                return;
            }
        };
        if payload.source_sent.len() != 1 {
            warn!(
                session_id,
                job_id = payload.job_id,
                sentences = payload.source_sent.len(),
                "a decoder front-end task carries exactly one sentence; discarding"
            );
            return;
        }

        let source_lang = self.lang_registry.register_uid(&payload.source_lang);
        let target_lang = self.lang_registry.register_uid(&payload.target_lang);
        let mut history = CircularQueue::new(HISTORY_CAPACITY);
        history.push(payload.source_sent[0].clone());

        let job = SentenceJob::new(
            session_id,
            payload.job_id,
            payload.source_sent.into_iter().next().expect("checked len == 1"),
            source_lang,
            target_lang,
            payload.trans_info,
            history,
            Arc::clone(&self.backend),
            self.sender(),
        );

        if let Err(err) = self.pool.schedule(job) {
            warn!(session_id, job_id = payload.job_id, %err, "failed to schedule sentence job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_protocol::{Envelope, TranslationJobRequest};

    fn single_sentence_request(job_id: u64) -> Vec<u8> {
        Envelope::trans_job_request(&TranslationJobRequest {
            job_id,
            source_lang: "en".to_owned(),
            target_lang: "fr".to_owned(),
            trans_info: false,
            source_sent: vec!["Hello.".to_owned()],
        })
        .serialize()
    }

    #[test]
    fn multi_sentence_request_is_rejected() {
        let sink = DecoderFrontendSink::new(
            Arc::new(StubBackend),
            Arc::new(LanguageRegistry::new()),
            Arc::new(WorkerPool::new(1)),
        );
        let env = Envelope::trans_job_request(&TranslationJobRequest {
            job_id: 1,
            source_lang: "en".to_owned(),
            target_lang: "fr".to_owned(),
            trans_info: false,
            source_sent: vec!["a".to_owned(), "b".to_owned()],
        })
        .serialize();
        sink.on_message(1, env);
        assert_eq!(sink.pool.job_count(), 0);
    }

    #[test]
    fn malformed_frame_is_ignored_without_panicking() {
        let sink = DecoderFrontendSink::new(
            Arc::new(StubBackend),
            Arc::new(LanguageRegistry::new()),
            Arc::new(WorkerPool::new(1)),
        );
        sink.on_message(1, b"not json".to_vec());
    }

    #[test]
    fn single_sentence_request_is_scheduled() {
        let sink = DecoderFrontendSink::new(
            Arc::new(StubBackend),
            Arc::new(LanguageRegistry::new()),
            Arc::new(WorkerPool::new(1)),
        );
        let transport = mt_transport::WsServer::new(Arc::clone(&sink), |_| {}, |_| {});
        sink.bind_sessions(Arc::clone(&transport.sessions));

        sink.on_message(1, single_sentence_request(5));
        for _ in 0..200 {
            if sink.pool.job_count() == 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(sink.pool.job_count(), 0);
    }
}
