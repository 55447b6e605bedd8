use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use mt_protocol::{Envelope, ProcessorResponse, StatCode};
use mt_session::{DoneCallback, PoolJob, SessionId};
use mt_util::chunk_utf8;

/// The maximum length, in bytes, of a single read of the processor
/// script's stdout (`processor_consts.hpp::MAX_PROCESSOR_OUTPUT_BYTES`).
/// Reading continues across many reads of this size until EOF; this only
/// bounds one read call, not the script's total output.
const MAX_PROCESSOR_OUTPUT_BYTES: usize = 1024;

/// Maximum characters per outbound chunk (spec §4.5/§4.6, §9 standardises
/// on characters, not bytes).
pub const MESSAGE_MAX_CHAR_LEN: usize = 10 * 1024;

/// Bounded retry policy for starting the child process or running `rm -f`
/// (`processor_consts.hpp::MAX_NUM_CONSOLE_ATTEMPTS` /
/// `CONSOLE_RE_TRY_TIME_OUT_MILLISEC`).
const MAX_CONSOLE_ATTEMPTS: usize = 10;
const CONSOLE_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Whether a processor job materialized its input for the pre-processor
/// (language detection) or post-processor (detokenization/recasing) role.
/// Only the file-name suffix (`pre`/`post`) and the request/response
/// vocabulary differ between the two; the execution algorithm is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Pre,
    Post,
}

impl Variant {
    fn file_tag(self) -> &'static str {
        match self {
            Variant::Pre => "pre",
            Variant::Post => "post",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("chunk index {chunk_idx} is out of range [0, {expected})")]
    ChunkIndexOutOfRange { chunk_idx: usize, expected: usize },
    #[error("chunk index {0} was already received for this job")]
    DuplicateChunkIndex(usize),
    #[error("language '{0}' is not supported: no processor is configured for it")]
    LanguageNotSupported(String),
    #[error("job is not complete: received {received} of {expected} chunks")]
    Incomplete { received: usize, expected: usize },
    #[error("failed to materialize input file {0}: {1}")]
    InputFileWrite(PathBuf, String),
    #[error("processor script could not be started after {0} attempts: {1}")]
    ServiceUnavailable(String, usize),
    #[error("processor script exited with an error: {0}")]
    ResultError(String),
    #[error("processor script terminated abnormally")]
    AbnormalTermination,
    #[error("failed to open result file {0}: {1}")]
    OutputFileOpen(PathBuf, String),
}

use crate::config::LanguageConfig;

/// Delivers a response envelope to the session that owns a job. Installed
/// by whatever wires up `mt-session`'s session manager (normally
/// `SessionManager::send`, serializing the envelope at the boundary).
pub type ResponseSender = Arc<dyn Fn(SessionId, Envelope) -> bool + Send + Sync>;

struct ChunkSlot {
    text: String,
}

/// Specialisation of a job for the pre/post-processor role (spec §4.5):
/// materializes an aggregated input file, invokes an external script over
/// it, and streams the script's output back as chunked replies.
///
/// Grounded on `examples/original_source/inc/processor/processor_job.hpp`:
/// a per-job recursive file lock serializing materialize/invoke/cleanup, a
/// separate finalization lock held across the whole `execute()` so the
/// reaper can never destroy the job mid-notification, and a plain
/// received/expected counter (not an atomic) guarded by the same lock that
/// guards chunk insertion.
pub struct ProcessorJob {
    session_id: SessionId,
    job_token: String,
    variant: Variant,
    lang_config: Arc<LanguageConfig>,
    expected_chunks: usize,
    chunks: Mutex<Vec<Option<ChunkSlot>>>,
    received: AtomicUsize,
    language: Mutex<String>,
    is_canceled: AtomicBool,
    is_file_generated: AtomicBool,
    file_lock: Mutex<()>,
    finalize_lock: Mutex<()>,
    done_cb: Mutex<Option<DoneCallback>>,
    sender: ResponseSender,
}

impl ProcessorJob {
    pub fn new(
        session_id: SessionId,
        job_token: String,
        variant: Variant,
        lang_config: Arc<LanguageConfig>,
        expected_chunks: usize,
        sender: ResponseSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            job_token,
            variant,
            lang_config,
            expected_chunks,
            chunks: Mutex::new((0..expected_chunks).map(|_| None).collect()),
            received: AtomicUsize::new(0),
            language: Mutex::new(String::new()),
            is_canceled: AtomicBool::new(false),
            is_file_generated: AtomicBool::new(false),
            file_lock: Mutex::new(()),
            finalize_lock: Mutex::new(()),
            done_cb: Mutex::new(None),
            sender,
        })
    }

    /// Stores one chunk of the request. Storing the same index twice is a
    /// fatal invariant violation (spec §3, §8).
    pub fn add_chunk(&self, chunk_idx: usize, language: &str, text: String) -> Result<(), ProcessorError> {
        if chunk_idx >= self.expected_chunks {
            return Err(ProcessorError::ChunkIndexOutOfRange {
                chunk_idx,
                expected: self.expected_chunks,
            });
        }
        let mut chunks = self.chunks.lock().expect("poisoned");
        if chunks[chunk_idx].is_some() {
            return Err(ProcessorError::DuplicateChunkIndex(chunk_idx));
        }
        chunks[chunk_idx] = Some(ChunkSlot { text });
        drop(chunks);
        if chunk_idx == 0 {
            *self.language.lock().expect("poisoned") = language.to_owned();
        }
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received.load(Ordering::SeqCst) == self.expected_chunks
    }

    fn input_file(&self) -> PathBuf {
        self.lang_config
            .work_dir()
            .join(format!("{}.{}.in.txt", self.job_token, self.variant.file_tag()))
    }

    fn output_file(&self) -> PathBuf {
        self.lang_config
            .work_dir()
            .join(format!("{}.{}.out.txt", self.job_token, self.variant.file_tag()))
    }

    fn language(&self) -> String {
        self.language.lock().expect("poisoned").clone()
    }

    fn send(&self, envelope: Envelope) {
        if !self.is_canceled.load(Ordering::SeqCst) {
            let _ = (self.sender)(self.session_id, envelope);
        }
    }

    fn send_error(&self, message: impl Into<String>) {
        let env = Envelope::proc_response(&self.job_token, StatCode::Error, message, None);
        self.send(env);
    }

    /// Runs the job to completion: validates the language config and the
    /// chunk set, materializes the input file, invokes the script, and
    /// streams either the chunked success reply or a single error reply.
    /// Always notifies the job pool exactly once before returning,
    /// regardless of outcome (spec §4.5 step 8).
    pub fn run(self: &Arc<Self>) {
        let _finalize_guard = self.finalize_lock.lock().expect("poisoned");

        if !self.is_canceled.load(Ordering::SeqCst) {
            if !self.lang_config.is_defined() {
                self.send_error(format!(
                    "the language '{}' is not supported, and there is no default processor",
                    self.language()
                ));
            } else if let Err(err) = self.execute() {
                match err {
                    ProcessorError::Incomplete { .. } => {
                        tracing::error!(job_token = %self.job_token, %err, "invariant violation executing processor job");
                        self.send_error("internal error");
                    }
                    err => self.send_error(err.to_string()),
                }
            }
        }

        let cb = self.done_cb.lock().expect("poisoned").clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    fn execute(self: &Arc<Self>) -> Result<(), ProcessorError> {
        let _file_guard = self.file_lock.lock().expect("poisoned");

        if self.is_canceled.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.is_complete() {
            return Err(ProcessorError::Incomplete {
                received: self.received.load(Ordering::SeqCst),
                expected: self.expected_chunks,
            });
        }

        let input_path = self.input_file();
        self.materialize_input(&input_path)?;

        if self.is_canceled.load(Ordering::SeqCst) {
            return Ok(());
        }

        let call_str = self.lang_config.call_string(&self.job_token, &self.language());
        tracing::debug!(job_token = %self.job_token, call = %call_str, "invoking processor script");

        let mut output = String::new();
        let success = call_processor_script(&call_str, &mut output)?;

        if self.is_canceled.load(Ordering::SeqCst) {
            return Ok(());
        }

        if success {
            self.send_success(&output)
        } else {
            let message = if output.is_empty() {
                format!(
                    "failed to execute '{call_str}': an internal script error or a missing script"
                )
            } else {
                output
            };
            Err(ProcessorError::ResultError(message))
        }
    }

    fn materialize_input(&self, path: &PathBuf) -> Result<(), ProcessorError> {
        let chunks = self.chunks.lock().expect("poisoned");
        let mut contents = String::new();
        for slot in chunks.iter() {
            let slot = slot.as_ref().expect("is_complete() guarantees every slot is filled");
            contents.push_str(&slot.text);
        }
        drop(chunks);
        std::fs::write(path, contents)
            .map_err(|e| ProcessorError::InputFileWrite(path.clone(), e.to_string()))?;
        self.is_file_generated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_success(self: &Arc<Self>, detected_language: &str) -> Result<(), ProcessorError> {
        let output_path = self.output_file();
        let contents = std::fs::read_to_string(&output_path)
            .map_err(|e| ProcessorError::OutputFileOpen(output_path.clone(), e.to_string()))?;

        let job = Arc::clone(self);
        let language = detected_language.to_owned();
        chunk_utf8(&contents, MESSAGE_MAX_CHAR_LEN, move |chunk| {
            if job.is_canceled.load(Ordering::SeqCst) {
                return;
            }
            let text = String::from_utf8(chunk.bytes).expect("chunk_utf8 preserves codepoint boundaries");
            let env = Envelope::proc_response(
                &job.job_token,
                StatCode::Ok,
                "",
                Some(ProcessorResponse {
                    job_token: job.job_token.clone(),
                    language: Some(language.clone()),
                    chunk: Some(text),
                    chunk_idx: Some(chunk.chunk_idx),
                    num_chunks: Some(chunk.num_chunks),
                }),
            );
            job.send(env);
        });
        Ok(())
    }
}

impl PoolJob for ProcessorJob {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn job_id(&self) -> &str {
        &self.job_token
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

impl Drop for ProcessorJob {
    fn drop(&mut self) {
        if self.is_file_generated.load(Ordering::SeqCst) {
            let input = self.input_file();
            let output = self.output_file();
            if let Err(err) = remove_files_with_retry(&[input, output]) {
                tracing::error!(job_token = %self.job_token, error = %err, "failed to clean up processor job files");
            }
        }
    }
}

/// Starts `call_str` as `sh -c "<call_str>"` with bounded retries, mirroring
/// `processor_job.hpp::call_processor_script` / `process_script_results`.
/// Returns `Ok(true)` on a clean (exit-0) run, `Ok(false)` on a normal
/// non-zero exit (in which case `output` is the script's own error
/// message), and an error if the child could never be started or
/// terminated abnormally.
fn call_processor_script(call_str: &str, output: &mut String) -> Result<bool, ProcessorError> {
    let mut attempts = 0;
    let mut child = loop {
        match Command::new("sh")
            .arg("-c")
            .arg(call_str)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => break child,
            Err(_) if attempts < MAX_CONSOLE_ATTEMPTS => {
                attempts += 1;
                thread::sleep(CONSOLE_RETRY_DELAY);
            }
            Err(_) => return Err(ProcessorError::ServiceUnavailable(call_str.to_owned(), attempts)),
        }
    };

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut buf = [0u8; MAX_PROCESSOR_OUTPUT_BYTES];
    let mut raw = Vec::new();
    loop {
        let n = stdout.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    drop(stdout);

    *output = reduce_whitespace(&String::from_utf8_lossy(&raw));

    let status = child.wait().map_err(|_| ProcessorError::AbnormalTermination)?;
    match status.code() {
        Some(0) => Ok(true),
        Some(_) => Ok(false),
        None => Err(ProcessorError::AbnormalTermination),
    }
}

/// `string_utils.hpp::reduce`: trim, then collapse internal whitespace runs
/// to a single space.
fn reduce_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn remove_files_with_retry(paths: &[PathBuf]) -> Result<(), std::io::Error> {
    for path in paths {
        let mut attempts = 0;
        loop {
            match std::fs::remove_file(path) {
                Ok(()) | Err(_) if path_missing(path) => break,
                Err(e) if attempts < MAX_CONSOLE_ATTEMPTS => {
                    attempts += 1;
                    thread::sleep(CONSOLE_RETRY_DELAY);
                    let _ = e;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

fn path_missing(path: &PathBuf) -> bool {
    !path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

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
    fn duplicate_chunk_index_is_rejected() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let (sender, _log) = noop_sender();
        let job = ProcessorJob::new(1, "T1".into(), Variant::Pre, cfg, 2, sender);
        job.add_chunk(0, "en", "a".into()).unwrap();
        let err = job.add_chunk(0, "en", "b".into()).unwrap_err();
        assert!(matches!(err, ProcessorError::DuplicateChunkIndex(0)));
    }

    #[test]
    fn out_of_range_chunk_index_is_rejected() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let (sender, _log) = noop_sender();
        let job = ProcessorJob::new(1, "T1".into(), Variant::Pre, cfg, 1, sender);
        let err = job.add_chunk(5, "en", "a".into()).unwrap_err();
        assert!(matches!(err, ProcessorError::ChunkIndexOutOfRange { .. }));
    }

    #[test]
    fn is_complete_tracks_received_against_expected() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let (sender, _log) = noop_sender();
        let job = ProcessorJob::new(1, "T1".into(), Variant::Pre, cfg, 2, sender);
        assert!(!job.is_complete());
        job.add_chunk(1, "en", "b".into()).unwrap();
        assert!(!job.is_complete());
        job.add_chunk(0, "en", "a".into()).unwrap();
        assert!(job.is_complete());
    }

    #[test]
    fn undefined_language_config_sends_one_error_response() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let (sender, log) = noop_sender();
        let job = ProcessorJob::new(1, "T1".into(), Variant::Pre, cfg, 1, sender);
        job.add_chunk(0, "xx", "hello".into()).unwrap();
        job.set_done_callback(Arc::new(|| {}));
        job.run();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].1.stat_code().unwrap(), StatCode::Error);
    }

    #[test]
    fn happy_path_runs_script_and_streams_output() {
        let dir = tempdir().unwrap();
        let work_dir = dir.path().to_path_buf();
        let cfg = Arc::new(
            LanguageConfig::new(
                work_dir.clone(),
                Some("printf '' > <WORK_DIR>/<JOB_UID>.pre.out.txt; printf '%s' 'hello <LANGUAGE>' >> <WORK_DIR>/<JOB_UID>.pre.out.txt".to_owned()),
            )
            .unwrap(),
        );
        let (sender, log) = noop_sender();
        let job = ProcessorJob::new(1, "T2".into(), Variant::Pre, cfg, 1, sender);
        job.add_chunk(0, "auto", "Hello World.".into()).unwrap();
        job.set_done_callback(Arc::new(|| {}));
        job.run();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let env = &log[0].1;
        assert_eq!(env.stat_code().unwrap(), StatCode::Ok);
        assert_eq!(env.field::<String>("chunk").unwrap(), "hello auto");
        assert_eq!(env.field::<usize>("chunk_idx").unwrap(), 0);
        assert_eq!(env.field::<usize>("num_chunks").unwrap(), 1);
    }

    #[test]
    fn script_nonzero_exit_reports_result_error() {
        let dir = tempdir().unwrap();
        let work_dir = dir.path().to_path_buf();
        let cfg = Arc::new(
            LanguageConfig::new(
                work_dir,
                Some("printf 'bad input' >&2; printf 'bad input'; exit 2".to_owned()),
            )
            .unwrap(),
        );
        let (sender, log) = noop_sender();
        let job = ProcessorJob::new(1, "T3".into(), Variant::Pre, cfg, 1, sender);
        job.add_chunk(0, "auto", "x".into()).unwrap();
        job.set_done_callback(Arc::new(|| {}));
        job.run();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let env = &log[0].1;
        assert_eq!(env.stat_code().unwrap(), StatCode::Error);
        assert!(env.stat_msg().unwrap().contains("bad input"));
        assert!(env.field::<String>("chunk").is_err());
    }

    #[test]
    fn cancellation_before_run_suppresses_all_responses() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(LanguageConfig::undefined(dir.path().to_path_buf()));
        let (sender, log) = noop_sender();
        let job = ProcessorJob::new(1, "T4".into(), Variant::Pre, cfg, 1, sender);
        job.add_chunk(0, "en", "x".into()).unwrap();
        job.set_done_callback(Arc::new(|| {}));
        job.cancel();
        job.run();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn reduce_whitespace_trims_and_collapses() {
        assert_eq!(reduce_whitespace("  hello   world  \n"), "hello world");
    }
}
