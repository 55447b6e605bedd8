use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mt_langreg::LangId;
use mt_protocol::{Envelope, StatCode, TargetSentData, TranslationJobResponse};
use mt_session::{DoneCallback, PoolJob, SessionId};
use mt_util::CircularQueue;
use mt_workerpool::{TaskHandle, WorkerPool};

use crate::decoder_client::DecoderClient;

/// How many preceding source sentences of the same job are fed to the
/// decoder as context (spec §3 translation history).
const HISTORY_CAPACITY: usize = 4;

pub type ResponseSender = Arc<dyn Fn(SessionId, Envelope) -> bool + Send + Sync>;

/// A translation job, decomposed into one task per `source_sent` entry
/// (spec §E). Grounded on `mt-processor`'s `ProcessorJob` for the overall
/// job shape (finalize lock, done-callback, cancellation flag) but fans out
/// to N concurrently-running tasks instead of running once: each task
/// unconditionally decrements `remaining`, and whichever task observes the
/// pre-decrement value was `1` is the one that finalizes and replies.
pub struct TranslationJob {
    session_id: SessionId,
    job_id: u64,
    job_id_str: String,
    source_lang: LangId,
    target_lang: LangId,
    trans_info: bool,
    sentences: Vec<String>,
    results: Mutex<Vec<Option<TargetSentData>>>,
    remaining: AtomicUsize,
    any_error: AtomicBool,
    is_canceled: AtomicBool,
    finalize_lock: Mutex<()>,
    task_handles: Mutex<Vec<TaskHandle>>,
    worker_pool: Arc<WorkerPool>,
    done_cb: Mutex<Option<DoneCallback>>,
    sender: ResponseSender,
}

impl TranslationJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        job_id: u64,
        source_lang: LangId,
        target_lang: LangId,
        trans_info: bool,
        sentences: Vec<String>,
        worker_pool: Arc<WorkerPool>,
        sender: ResponseSender,
    ) -> Arc<Self> {
        let n = sentences.len();
        Arc::new(Self {
            session_id,
            job_id,
            job_id_str: job_id.to_string(),
            source_lang,
            target_lang,
            trans_info,
            sentences,
            results: Mutex::new((0..n).map(|_| None).collect()),
            remaining: AtomicUsize::new(n),
            any_error: AtomicBool::new(false),
            is_canceled: AtomicBool::new(false),
            finalize_lock: Mutex::new(()),
            task_handles: Mutex::new(Vec::new()),
            worker_pool,
            done_cb: Mutex::new(None),
            sender,
        })
    }

    pub fn num_sentences(&self) -> usize {
        self.sentences.len()
    }

    /// Submits one worker-pool task per sentence and records the resulting
    /// handles, so a later cancellation can pull still-queued tasks back
    /// out before they run.
    pub fn dispatch(self: &Arc<Self>, client: Arc<dyn DecoderClient>) {
        let mut handles = Vec::with_capacity(self.sentences.len());
        for idx in 0..self.sentences.len() {
            let job = Arc::clone(self);
            let client = Arc::clone(&client);
            handles.push(self.worker_pool.submit(move || job.execute_sentence(idx, &*client)));
        }
        *self.task_handles.lock().expect("poisoned") = handles;
        // A cancellation that arrived between construction and this point
        // would have found an empty handle list and cancelled nothing; run
        // the same sweep again now that handles exist.
        if self.is_canceled.load(Ordering::SeqCst) {
            self.cancel_queued_tasks();
        }
    }

    fn history_for(&self, idx: usize) -> CircularQueue<String> {
        let mut history = CircularQueue::new(HISTORY_CAPACITY);
        history.push_range(self.sentences[..idx].iter().cloned());
        history
    }

    fn execute_sentence(self: &Arc<Self>, idx: usize, client: &dyn DecoderClient) {
        if self.is_canceled.load(Ordering::SeqCst) {
            self.finish_one();
            return;
        }
        let history = self.history_for(idx);
        let data = match client.translate(&self.sentences[idx], self.source_lang, self.target_lang, &history) {
            Ok(translated) => TargetSentData {
                trans_text: translated.text,
                stack_load: if self.trans_info { translated.stack_load } else { None },
            },
            Err(err) => {
                self.any_error.store(true, Ordering::SeqCst);
                tracing::warn!(job_id = self.job_id, sentence_idx = idx, %err, "sentence translation failed");
                TargetSentData {
                    trans_text: String::new(),
                    stack_load: None,
                }
            }
        };
        self.results.lock().expect("poisoned")[idx] = Some(data);
        self.finish_one();
    }

    /// Unconditionally decrements the remaining-task count; the task that
    /// observes the pre-decrement value was 1 finalizes exactly once.
    fn finish_one(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.finalize();
        }
    }

    fn finalize(self: &Arc<Self>) {
        let _finalize_guard = self.finalize_lock.lock().expect("poisoned");

        if !self.is_canceled.load(Ordering::SeqCst) {
            let results = self.results.lock().expect("poisoned");
            let all_present = results.iter().all(Option::is_some);
            let target_data: Vec<TargetSentData> = results
                .iter()
                .cloned()
                .map(|slot| {
                    slot.unwrap_or(TargetSentData {
                        trans_text: String::new(),
                        stack_load: None,
                    })
                })
                .collect();
            drop(results);

            let code = if !all_present || self.any_error.load(Ordering::SeqCst) {
                StatCode::Partial
            } else {
                StatCode::Ok
            };
            let env = Envelope::trans_job_response(
                &TranslationJobResponse {
                    job_id: self.job_id,
                    target_data,
                },
                code,
                "",
            );
            let _ = (self.sender)(self.session_id, env);
        }

        let cb = self.done_cb.lock().expect("poisoned").clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    fn cancel_queued_tasks(&self) {
        let handles: Vec<TaskHandle> = std::mem::take(&mut *self.task_handles.lock().expect("poisoned"));
        for handle in handles {
            if !self.worker_pool.cancel(handle) {
                // Already running or already finished: its own
                // `execute_sentence`/`finish_one` call accounts for it.
                continue;
            }
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                // `finalize` needs `Arc<Self>`; this path only fires from
                // `cancel()`, which only has `&self`, so send a suppressed
                // reply directly instead of re-deriving an `Arc`.
                let cb = self.done_cb.lock().expect("poisoned").clone();
                if let Some(cb) = cb {
                    cb();
                }
            }
        }
    }
}

impl PoolJob for TranslationJob {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn job_id(&self) -> &str {
        &self.job_id_str
    }

    fn cancel(&self) {
        if self.is_canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_queued_tasks();
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
