use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::SessionId;

const REAPER_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Callback a job invokes on itself exactly once, when it finishes running
/// or is torn down before running — never both. The pool installs this at
/// [`SessionJobPool::schedule`] time so the job need not know anything
/// about the pool that owns it beyond "call this when done".
pub type DoneCallback = Arc<dyn Fn() + Send + Sync>;

/// Capability set the job pool needs from anything it schedules (spec
/// §3's job state machine, expressed as a trait rather than the original's
/// virtual base class).
pub trait PoolJob: Send + Sync {
    /// The session that owns this job; jobs are indexed by
    /// `(session_id, job_id)` and a cancelled session cancels every job
    /// under it.
    fn session_id(&self) -> SessionId;

    /// Unique within `session_id`. Stringly typed because callers key jobs
    /// by things as different as a numeric translation job id and an
    /// opaque processor chunk token.
    fn job_id(&self) -> &str;

    /// Requests cancellation. Must be safe to call from any thread at any
    /// point in the job's lifetime, including before it has started and
    /// after it has already finished.
    fn cancel(&self);

    fn is_canceled(&self) -> bool;

    /// Installed by [`SessionJobPool::schedule`]; the job must invoke this
    /// exactly once, after it has stopped touching its own state, to
    /// signal the pool it is safe to reap.
    fn set_done_callback(&self, callback: DoneCallback);

    /// Blocks until any done-notification already in flight for this job
    /// has finished being delivered. The default is a no-op; a job whose
    /// `cancel()` can race with its own completion should back this with
    /// a real lock (as `mt-processor`'s processor job does) so the reaper
    /// never drops the last `Arc` out from under a callback still running.
    fn finalize_sync(&self) {}
}

#[derive(Debug, Error)]
pub enum JobPoolError {
    #[error("job pool is stopping; new jobs are rejected")]
    ServiceStopping,
    #[error("a job with id {job_id:?} already exists for session {session_id}")]
    DuplicateJobId { session_id: SessionId, job_id: String },
    #[error("on_new_job hook failed: {0}")]
    Dispatch(String),
}

/// Owner of every in-flight job for every open session, for one role
/// (processor, balancer, or decoder frontend). Jobs are inserted by
/// [`schedule`](Self::schedule), removed only by the reaper thread once
/// the job reports itself done, and cancelled in bulk by
/// [`cancel_session`](Self::cancel_session) / [`cancel_all`](Self::cancel_all).
///
/// Generic over `J` so each role can plug in its own job type (translation
/// job, processor chunk job, ...) while sharing this lifecycle exactly.
pub struct SessionJobPool<J: PoolJob> {
    sessions: Mutex<HashMap<SessionId, HashMap<String, Arc<J>>>>,
    stopping: AtomicBool,
    job_count: AtomicUsize,
    done_list: Mutex<VecDeque<Arc<J>>>,
    reaper_cv: Condvar,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
    done_notifier: Box<dyn Fn(Arc<J>) + Send + Sync>,
    on_new_job: Box<dyn Fn(Arc<J>) -> Result<(), JobPoolError> + Send + Sync>,
}

impl<J: PoolJob + 'static> SessionJobPool<J> {
    /// `done_notifier` runs on the reaper thread for every job right
    /// before it is removed from the index — typically this is where a
    /// result gets sent back to the session. `on_new_job` runs on the
    /// scheduling thread right after a job is indexed — typically this
    /// hands the job to a worker pool; returning `Err` un-schedules the
    /// job and propagates the error to the caller of `schedule`.
    pub fn new(
        done_notifier: impl Fn(Arc<J>) + Send + Sync + 'static,
        on_new_job: impl Fn(Arc<J>) -> Result<(), JobPoolError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            job_count: AtomicUsize::new(0),
            done_list: Mutex::new(VecDeque::new()),
            reaper_cv: Condvar::new(),
            reaper_handle: Mutex::new(None),
            done_notifier: Box::new(done_notifier),
            on_new_job: Box::new(on_new_job),
        });
        let reaper_pool = Arc::clone(&pool);
        let handle = thread::spawn(move || reaper_loop(reaper_pool));
        *pool.reaper_handle.lock().expect("poisoned") = Some(handle);
        pool
    }

    /// Indexes `job` under its session, installs its done-callback, and
    /// hands it to `on_new_job`. Rejects with [`JobPoolError::ServiceStopping`]
    /// once [`stop`](Self::stop) has been called.
    pub fn schedule(self: &Arc<Self>, job: Arc<J>) -> Result<(), JobPoolError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(JobPoolError::ServiceStopping);
        }

        {
            let mut sessions = self.sessions.lock().expect("poisoned");
            let session_jobs = sessions.entry(job.session_id()).or_default();
            if session_jobs.contains_key(job.job_id()) {
                return Err(JobPoolError::DuplicateJobId {
                    session_id: job.session_id(),
                    job_id: job.job_id().to_owned(),
                });
            }
            session_jobs.insert(job.job_id().to_owned(), Arc::clone(&job));
        }
        self.job_count.fetch_add(1, Ordering::SeqCst);

        let pool_weak: Weak<Self> = Arc::downgrade(self);
        let job_weak: Weak<J> = Arc::downgrade(&job);
        job.set_done_callback(Arc::new(move || {
            if let (Some(pool), Some(job)) = (pool_weak.upgrade(), job_weak.upgrade()) {
                pool.job_done(job);
            }
        }));

        if let Err(err) = (self.on_new_job)(Arc::clone(&job)) {
            self.remove_job(&job);
            return Err(err);
        }
        Ok(())
    }

    /// Called by a job (via its done-callback) once it has finished
    /// running or been torn down unrun. Queues it for the reaper thread;
    /// never blocks on the job itself.
    fn job_done(&self, job: Arc<J>) {
        self.done_list.lock().expect("poisoned").push_back(job);
        self.reaper_cv.notify_all();
    }

    fn remove_job(&self, job: &Arc<J>) {
        let mut sessions = self.sessions.lock().expect("poisoned");
        if let Some(session_jobs) = sessions.get_mut(&job.session_id()) {
            session_jobs.remove(job.job_id());
            if session_jobs.is_empty() {
                sessions.remove(&job.session_id());
            }
        }
        drop(sessions);
        self.job_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Requests cancellation of every job belonging to `session_id`.
    /// Jobs still remove themselves through the normal done-callback path;
    /// this only flips their cancellation flag.
    pub fn cancel_session(&self, session_id: SessionId) {
        let sessions = self.sessions.lock().expect("poisoned");
        if let Some(session_jobs) = sessions.get(&session_id) {
            for job in session_jobs.values() {
                job.cancel();
            }
        }
    }

    /// Requests cancellation of every job in every session.
    pub fn cancel_all(&self) {
        let sessions = self.sessions.lock().expect("poisoned");
        for session_jobs in sessions.values() {
            for job in session_jobs.values() {
                job.cancel();
            }
        }
    }

    /// Total number of jobs currently indexed (not yet reaped).
    pub fn job_count(&self) -> usize {
        self.job_count.load(Ordering::SeqCst)
    }

    /// Idempotent, blocking shutdown: cancels every job, wakes the reaper,
    /// and waits for it to drain the index and exit. Does not hold any
    /// lock across `cancel_all` — the reaper needs the same locks to make
    /// progress.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_all();
        self.reaper_cv.notify_all();
        if let Some(handle) = self.reaper_handle.lock().expect("poisoned").take() {
            handle.join().expect("reaper thread panicked");
        }
    }
}

impl<J: PoolJob> Drop for SessionJobPool<J> {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper_handle.lock().expect("poisoned").take() {
            self.stopping.store(true, Ordering::SeqCst);
            self.reaper_cv.notify_all();
            let _ = handle.join();
        }
    }
}

fn reaper_loop<J: PoolJob + 'static>(pool: Arc<SessionJobPool<J>>) {
    loop {
        let mut done_list = pool.done_list.lock().expect("poisoned");
        loop {
            let stopping = pool.stopping.load(Ordering::SeqCst);
            let remaining = pool.job_count.load(Ordering::SeqCst);
            if stopping && remaining == 0 {
                return;
            }
            if !done_list.is_empty() {
                break;
            }
            let (guard, _timeout) = pool
                .reaper_cv
                .wait_timeout(done_list, REAPER_WAIT_TIMEOUT)
                .expect("poisoned");
            done_list = guard;
        }
        let drained: Vec<Arc<J>> = done_list.drain(..).collect();
        drop(done_list);

        for job in drained {
            (pool.done_notifier)(Arc::clone(&job));
            pool.remove_job(&job);
            job.finalize_sync();
        }
    }
}
