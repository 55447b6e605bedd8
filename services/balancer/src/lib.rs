//! The balancer service (spec §E): the client-facing front door. Answers
//! supported-language queries from its static registry, and decomposes each
//! translation job into one task per sentence, fanning them out to a
//! [`DecoderClient`] and aggregating the results back into a single
//! `trans_job_response`.

mod decoder_client;
mod job;

pub use decoder_client::{DecodeError, DecoderClient, StubDecoderClient, Translated};
pub use job::TranslationJob;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use mt_langreg::LanguageRegistry;
use mt_session::{JobPoolError, SessionId, SessionJobPool};
use mt_transport::{ConnHandle, EventSink, WsTransport};
use mt_workerpool::WorkerPool;
use tracing::warn;

type Sessions = mt_session::SessionManager<ConnHandle, Arc<WsTransport>>;

/// Wires incoming `supp_lang_request`/`trans_job_request` frames to the
/// balancer's static language list and its translation job pool.
pub struct BalancerSink {
    languages: Vec<String>,
    lang_registry: Arc<LanguageRegistry>,
    decoder_client: Arc<dyn DecoderClient>,
    worker_pool: Arc<WorkerPool>,
    pool: Arc<SessionJobPool<TranslationJob>>,
    sessions: OnceLock<Arc<Sessions>>,
}

impl BalancerSink {
    pub fn new(languages: Vec<String>, decoder_client: Arc<dyn DecoderClient>, worker_pool: Arc<WorkerPool>) -> Arc<Self> {
        let pool = SessionJobPool::new(|_job| {}, |_job| -> Result<(), JobPoolError> { Ok(()) });
        Arc::new(Self {
            languages,
            lang_registry: Arc::new(LanguageRegistry::new()),
            decoder_client,
            worker_pool,
            pool,
            sessions: OnceLock::new(),
        })
    }

    pub fn bind_sessions(&self, sessions: Arc<Sessions>) {
        self.sessions.set(sessions).ok().expect("bind_sessions must only be called once");
    }

    pub fn cancel_session(&self, session_id: SessionId) {
        self.pool.cancel_session(session_id);
    }

    fn send(&self, session_id: SessionId, envelope: mt_protocol::Envelope) {
        if let Some(sessions) = self.sessions.get() {
            sessions.send(session_id, envelope.serialize());
        }
    }

    fn close(&self, session_id: SessionId, reason: &str) {
        if let Some(sessions) = self.sessions.get() {
            sessions.close(session_id, reason);
        }
    }

    /// Every configured language is reported as a valid target for every
    /// other (spec §C.6: no decoder to introspect for real per-pair support).
    fn supp_lang_response(&self) -> mt_protocol::SuppLangResponse {
        let mut langs = HashMap::new();
        for source in &self.languages {
            let targets: Vec<String> = self.languages.iter().filter(|t| *t != source).cloned().collect();
            langs.insert(source.clone(), targets);
        }
        mt_protocol::SuppLangResponse { langs }
    }
}

impl EventSink for BalancerSink {
    fn on_message(&self, session_id: SessionId, bytes: Vec<u8>) {
        let envelope = match mt_protocol::Envelope::parse(&bytes) {
            Ok(env) => env,
            Err(err) => {
                warn!(session_id, %err, "closing session on malformed frame");
                self.close(session_id, "malformed frame");
                return;
            }
        };

        match envelope.msg_type() {
            Ok(mt_protocol::MsgType::SuppLangRequest) => {
                let env = mt_protocol::Envelope::supp_lang_response(&self.supp_lang_response(), mt_protocol::StatCode::Ok, "");
                self.send(session_id, env);
            }
            Ok(mt_protocol::MsgType::TransJobRequest) => {
                let payload = match envelope.trans_job_request_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(session_id, %err, "closing session on malformed trans_job_request payload");
                        self.close(session_id, "malformed trans_job_request payload");
                        return;
                    }
                };
                if payload.source_sent.is_empty() {
                    warn!(session_id, job_id = payload.job_id, "a translation job with no sentences is rejected");
                    return;
                }

                let source_lang = self.lang_registry.register_uid(&payload.source_lang);
                let target_lang = self.lang_registry.register_uid(&payload.target_lang);
                let job_id = payload.job_id;

                let sessions_for_job = Arc::clone(self.sessions.get().expect("bind_sessions not called"));
                let job = TranslationJob::new(
                    session_id,
                    job_id,
                    source_lang,
                    target_lang,
                    payload.trans_info,
                    payload.source_sent,
                    Arc::clone(&self.worker_pool),
                    Arc::new(move |session_id, envelope: mt_protocol::Envelope| sessions_for_job.send(session_id, envelope.serialize())),
                );

                let decoder_client = Arc::clone(&self.decoder_client);
                if let Err(err) = self.pool.schedule(Arc::clone(&job)) {
                    warn!(session_id, job_id, %err, "failed to schedule translation job");
                    return;
                }
                job.dispatch(decoder_client);
            }
            Ok(other) => {
                warn!(session_id, ?other, "discarding frame of unexpected type");
            }
            Err(err) => {
                warn!(session_id, %err, "closing session on unrecognised msg_type");
                self.close(session_id, "unrecognised msg_type");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_protocol::{Envelope, MsgType, TranslationJobRequest};

    fn sink() -> Arc<BalancerSink> {
        let sink = BalancerSink::new(
            vec!["en".to_owned(), "fr".to_owned(), "de".to_owned()],
            Arc::new(StubDecoderClient),
            Arc::new(WorkerPool::new(2)),
        );
        let transport = mt_transport::WsServer::new(Arc::clone(&sink), |_| {}, |_| {});
        sink.bind_sessions(Arc::clone(&transport.sessions));
        sink
    }

    #[test]
    fn supp_lang_request_answers_with_full_mesh() {
        let sink = sink();
        let env = Envelope::build(MsgType::SuppLangRequest);
        sink.on_message(1, env.serialize());

        let resp = sink.supp_lang_response();
        assert_eq!(resp.langs.get("en").unwrap().len(), 2);
        assert!(!resp.langs["en"].contains(&"en".to_owned()));
    }

    #[test]
    fn empty_sentence_list_is_rejected_without_scheduling() {
        let sink = sink();
        let env = Envelope::trans_job_request(&TranslationJobRequest {
            job_id: 1,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            trans_info: false,
            source_sent: vec![],
        });
        sink.on_message(1, env.serialize());
        assert_eq!(sink.pool.job_count(), 0);
    }

    #[test]
    fn translation_job_request_is_scheduled_and_completes() {
        let sink = sink();
        let env = Envelope::trans_job_request(&TranslationJobRequest {
            job_id: 2,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            trans_info: false,
            source_sent: vec!["a.".into(), "b.".into()],
        });
        sink.on_message(1, env.serialize());

        for _ in 0..200 {
            if sink.pool.job_count() == 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(sink.pool.job_count(), 0);
    }
}
