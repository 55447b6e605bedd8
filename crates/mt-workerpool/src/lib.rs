//! The worker task pool (spec §4.3): a bounded-capacity* deque of tasks
//! executed by a configurable number of OS threads, with dynamic resize,
//! cooperative per-worker shutdown, and a best-effort cancel hook for
//! queued-but-not-started tasks.
//!
//! (*"Bounded-capacity" in the spec's budget table describes the original's
//! fixed-size worker count, not a capacity limit on the queue itself — the
//! queue, like the original's `deque<pool_task_ptr>`, is unbounded.)
//!
//! Grounded on `examples/original_source/inc/common/utils/threads/task_pool.hpp`
//! and `task_pool_worker.hpp`: one mutex + one condvar guarding a deque,
//! each worker carrying its own "on duty" and "busy" flags, downsize
//! rotating through workers looking for an idle one. No direct teacher
//! analog exists (the teacher's concurrency is entirely tokio-async); this
//! crate uses `std::thread`/`std::sync::{Mutex, Condvar}` directly because
//! the spec's invariants (condvar wait loops, worker on-duty flags, thread
//! joins) are stated in those exact terms.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a worker or the resize loop waits before rechecking its wake
/// condition (spec §5 "bounded timeout... to avoid missed-notification
/// liveness bugs").
const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    id: u64,
    job: Job,
}

/// A handle to a submitted task, usable with [`WorkerPool::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(u64);

struct WorkerRecord {
    on_duty: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct Inner {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    stopping: AtomicBool,
    next_task_id: AtomicU64,
}

/// A pool of OS threads executing submitted tasks in submission order.
pub struct WorkerPool {
    inner: Arc<Inner>,
    workers: Mutex<Vec<WorkerRecord>>,
}

impl WorkerPool {
    /// Creates a pool with `num_threads` worker threads running immediately.
    pub fn new(num_threads: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stopping: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
        });
        let workers = (0..num_threads).map(|_| spawn_worker(Arc::clone(&inner))).collect();
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Submits a task to run on the next available worker, in submission
    /// order relative to other submissions. Returns a handle usable with
    /// [`cancel`](Self::cancel).
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> TaskHandle {
        let id = self.inner.next_task_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self.inner.queue.lock().expect("worker pool queue poisoned");
            queue.push_back(Task {
                id,
                job: Box::new(job),
            });
        }
        self.inner.condvar.notify_one();
        TaskHandle(id)
    }

    /// Best-effort removal of a queued-but-not-started task. Returns `true`
    /// if the task was found and removed; `false` if it was already
    /// dequeued (running or finished) or never existed. A no-op on a
    /// running task — its own cancellation flag governs in-flight
    /// behaviour, not this pool.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let mut queue = self.inner.queue.lock().expect("worker pool queue poisoned");
        if let Some(pos) = queue.iter().position(|t| t.id == handle.0) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Reports `(pending_count, active_count)`.
    pub fn report(&self) -> (usize, usize) {
        let pending = self.inner.queue.lock().expect("poisoned").len();
        let active = self
            .workers
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|w| w.busy.load(Ordering::SeqCst))
            .count();
        (pending, active)
    }

    /// Resizes the pool to `new_count` worker threads. Upsizing appends new
    /// worker threads immediately. Downsizing rotates through workers
    /// looking for one that is not busy, takes it off duty, wakes every
    /// worker (a targeted wake is impossible with one shared condvar), and
    /// joins it; it can therefore block until enough workers go idle.
    pub fn resize(&self, new_count: usize) {
        let mut workers = self.workers.lock().expect("poisoned");
        let current = workers.len();
        match new_count.cmp(&current) {
            std::cmp::Ordering::Greater => {
                for _ in current..new_count {
                    workers.push(spawn_worker(Arc::clone(&self.inner)));
                }
            }
            std::cmp::Ordering::Less => {
                let to_remove = current - new_count;
                let mut removed = 0;
                let mut idx = 0;
                while removed < to_remove {
                    if !workers[idx].busy.load(Ordering::SeqCst) {
                        workers[idx].on_duty.store(false, Ordering::SeqCst);
                        self.inner.condvar.notify_all();
                        let worker = workers.remove(idx);
                        worker.thread.join().expect("worker thread panicked");
                        removed += 1;
                        if !workers.is_empty() {
                            idx %= workers.len();
                        }
                    } else {
                        idx = (idx + 1) % workers.len();
                        // Avoid pegging a CPU core while every worker is busy.
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
            std::cmp::Ordering::Equal => {}
        }
    }

    /// Signals every worker to stop, wakes them, and joins them all.
    /// Idempotent: a second call is a cheap no-op.
    pub fn shutdown(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.condvar.notify_all();
        let mut workers = self.workers.lock().expect("poisoned");
        for worker in workers.drain(..) {
            worker.on_duty.store(false, Ordering::SeqCst);
            self.inner.condvar.notify_all();
            let _ = worker.thread.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(inner: Arc<Inner>) -> WorkerRecord {
    let on_duty = Arc::new(AtomicBool::new(true));
    let busy = Arc::new(AtomicBool::new(false));
    let thread_on_duty = Arc::clone(&on_duty);
    let thread_busy = Arc::clone(&busy);
    let thread = thread::spawn(move || worker_loop(inner, thread_on_duty, thread_busy));
    WorkerRecord { on_duty, busy, thread }
}

fn worker_loop(inner: Arc<Inner>, on_duty: Arc<AtomicBool>, busy: Arc<AtomicBool>) {
    loop {
        let task = {
            let mut queue = inner.queue.lock().expect("worker pool queue poisoned");
            loop {
                if inner.stopping.load(Ordering::SeqCst) || !on_duty.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                let (guard, _timeout) = inner
                    .condvar
                    .wait_timeout(queue, WAIT_TIMEOUT)
                    .expect("worker pool queue poisoned");
                queue = guard;
            }
        };

        busy.store(true, Ordering::SeqCst);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (task.job)()));
        if let Err(payload) = outcome {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            tracing::error!(task_id = task.id, error = %message, "task panicked; worker continues");
        }
        busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        // Give the pool time to drain; report() until empty.
        for _ in 0..200 {
            let (pending, active) = pool.report();
            if pending == 0 && active == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        pool.shutdown();
    }

    #[test]
    fn a_panicking_task_does_not_kill_the_worker() {
        let pool = WorkerPool::new(1);
        pool.submit(|| panic!("boom"));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        pool.submit(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn cancel_removes_a_queued_task_but_not_a_running_one() {
        let pool = WorkerPool::new(1);
        let barrier = Arc::new(Barrier::new(2));
        let b1 = Arc::clone(&barrier);
        // Occupy the single worker so the next submission stays queued.
        let running = pool.submit(move || {
            b1.wait();
            thread::sleep(Duration::from_millis(50));
        });
        barrier.wait();

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let queued = pool.submit(move || {
            ran2.store(true, Ordering::SeqCst);
        });

        assert!(pool.cancel(queued));
        // Cancelling the running task is a no-op from the pool's side.
        assert!(!pool.cancel(running));

        thread::sleep(Duration::from_millis(150));
        assert!(!ran.load(Ordering::SeqCst));
        pool.shutdown();
    }

    #[test]
    fn resize_up_and_down_changes_the_effective_thread_count() {
        let pool = WorkerPool::new(2);
        pool.resize(5);
        {
            let workers = pool.workers.lock().unwrap();
            assert_eq!(workers.len(), 5);
        }
        pool.resize(1);
        {
            let workers = pool.workers.lock().unwrap();
            assert_eq!(workers.len(), 1);
        }
        pool.shutdown();
    }

    #[test]
    fn resize_down_blocks_until_a_busy_worker_goes_idle() {
        let pool = Arc::new(WorkerPool::new(1));
        let barrier = Arc::new(Barrier::new(2));
        let b1 = Arc::clone(&barrier);
        pool.submit(move || {
            b1.wait();
            thread::sleep(Duration::from_millis(80));
        });
        barrier.wait();

        let start = std::time::Instant::now();
        pool.resize(0);
        assert!(start.elapsed() >= Duration::from_millis(40));
        {
            let workers = pool.workers.lock().unwrap();
            assert_eq!(workers.len(), 0);
        }
    }

    #[test]
    fn shutdown_is_idempotent_and_joins_every_thread() {
        let pool = WorkerPool::new(3);
        pool.shutdown();
        pool.shutdown();
        let workers = pool.workers.lock().unwrap();
        assert_eq!(workers.len(), 0);
    }
}
