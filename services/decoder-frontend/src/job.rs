use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mt_langreg::LangId;
use mt_protocol::{Envelope, StatCode, TargetSentData, TranslationJobResponse};
use mt_session::{DoneCallback, PoolJob, SessionId};
use mt_util::CircularQueue;

use crate::backend::DecodeBackend;

/// Delivers a response envelope to the session that owns a job (mirrors
/// `mt_processor::ResponseSender`).
pub type ResponseSender = Arc<dyn Fn(SessionId, Envelope) -> bool + Send + Sync>;

/// A decoder front-end job is exactly one sentence (spec §D: the front-end
/// has no notion of a multi-sentence job — that aggregation is the
/// balancer's job). Grounded on `mt-processor`'s `ProcessorJob`: a
/// `finalize_lock` held across `run()` so the reaper can never drop the
/// job's last `Arc` while a response is still being sent, and `cancel()`
/// deliberately does not take it.
pub struct SentenceJob {
    session_id: SessionId,
    job_id: u64,
    job_id_str: String,
    source_sentence: String,
    source_lang: LangId,
    target_lang: LangId,
    trans_info: bool,
    history: CircularQueue<String>,
    backend: Arc<dyn DecodeBackend>,
    is_canceled: AtomicBool,
    finalize_lock: Mutex<()>,
    done_cb: Mutex<Option<DoneCallback>>,
    sender: ResponseSender,
}

impl SentenceJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        job_id: u64,
        source_sentence: String,
        source_lang: LangId,
        target_lang: LangId,
        trans_info: bool,
        history: CircularQueue<String>,
        backend: Arc<dyn DecodeBackend>,
        sender: ResponseSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            job_id,
            job_id_str: job_id.to_string(),
            source_sentence,
            source_lang,
            target_lang,
            trans_info,
            history,
            backend,
            is_canceled: AtomicBool::new(false),
            finalize_lock: Mutex::new(()),
            done_cb: Mutex::new(None),
            sender,
        })
    }

    /// Translates the sentence and replies with a single-element
    /// `trans_job_response`, unless cancelled before or during the call.
    /// Always notifies the job pool exactly once before returning.
    pub fn run(self: &Arc<Self>) {
        let _finalize_guard = self.finalize_lock.lock().expect("poisoned");

        if !self.is_canceled.load(Ordering::SeqCst) {
            let result = self.backend.translate(
                &self.source_sentence,
                self.source_lang,
                self.target_lang,
                &self.history,
            );
            let env = match result {
                Ok(translated) => Envelope::trans_job_response(
                    &TranslationJobResponse {
                        job_id: self.job_id,
                        target_data: vec![TargetSentData {
                            trans_text: translated.text,
                            stack_load: if self.trans_info { translated.stack_load } else { None },
                        }],
                    },
                    StatCode::Ok,
                    "",
                ),
                Err(err) => Envelope::trans_job_response(
                    &TranslationJobResponse {
                        job_id: self.job_id,
                        target_data: Vec::new(),
                    },
                    StatCode::Error,
                    err.to_string(),
                ),
            };
            if !self.is_canceled.load(Ordering::SeqCst) {
                let _ = (self.sender)(self.session_id, env);
            }
        }

        let cb = self.done_cb.lock().expect("poisoned").clone();
        if let Some(cb) = cb {
            cb();
        }
    }
}

impl PoolJob for SentenceJob {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn job_id(&self) -> &str {
        &self.job_id_str
    }

    fn cancel(&self) {
        self.is_canceled.store(true, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.is_canceled.load(Ordering::SeqCst)
    }

    fn set_done_callback(&self, callback: DoneCallback) {
        *self.done_cb.lock().expect("poisoned") = Some(callback);
    }

    fn finalize_sync(&self) {
        drop(self.finalize_lock.lock().expect("poisoned"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use std::sync::Mutex as StdMutex;

    fn noop_sender() -> (ResponseSender, Arc<StdMutex<Vec<(SessionId, Envelope)>>>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let sender: ResponseSender = Arc::new(move |sid, env| {
            log2.lock().unwrap().push((sid, env));
            true
        });
        (sender, log)
    }

    #[test]
    fn happy_path_replies_with_one_target_sentence() {
        let (sender, log) = noop_sender();
        let job = SentenceJob::new(
            1,
            42,
            "Hello.".to_owned(),
            1,
            2,
            false,
            CircularQueue::new(4),
            Arc::new(StubBackend),
            sender,
        );
        job.set_done_callback(Arc::new(|| {}));
        job.run();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let env = &log[0].1;
        assert_eq!(env.stat_code().unwrap(), StatCode::Ok);
        let payload = env.trans_job_response_payload().unwrap();
        assert_eq!(payload.job_id, 42);
        assert_eq!(payload.target_data.len(), 1);
        assert_eq!(payload.target_data[0].trans_text, "[2] Hello.");
    }

    #[test]
    fn cancellation_before_run_suppresses_the_response() {
        let (sender, log) = noop_sender();
        let job = SentenceJob::new(
            1,
            7,
            "Hi.".to_owned(),
            1,
            2,
            false,
            CircularQueue::new(4),
            Arc::new(StubBackend),
            sender,
        );
        job.set_done_callback(Arc::new(|| {}));
        job.cancel();
        job.run();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn backend_error_is_reported_with_no_target_data() {
        let (sender, log) = noop_sender();
        let job = SentenceJob::new(
            1,
            9,
            "   ".to_owned(),
            1,
            2,
            false,
            CircularQueue::new(4),
            Arc::new(StubBackend),
            sender,
        );
        job.set_done_callback(Arc::new(|| {}));
        job.run();

        let log = log.lock().unwrap();
        let env = &log[0].1;
        assert_eq!(env.stat_code().unwrap(), StatCode::Error);
        let payload = env.trans_job_response_payload().unwrap();
        assert!(payload.target_data.is_empty());
    }
}
