//! Job queues, the control worker and repeating jobs.
//!
//! A [`JobQueue`] is an ordered list behind a short-held mutex. Producers
//! lock, append, unlock and signal; the consumer swaps the whole list out and
//! processes it without holding the lock. The audio engine drains its command
//! queue with [`JobQueue::try_take_all`], which never blocks.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// Whether jobs run on their own thread or inline with [`JobWorker::pump`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadingMode {
    #[default]
    Threaded,
    SingleThreaded,
}

struct Pending<T> {
    jobs: Vec<T>,
    exit: bool,
}

/// An unbounded, ordered, mutex-protected job list with a wake-up signal.
pub struct JobQueue<T> {
    pending: Mutex<Pending<T>>,
    signal: Condvar,
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Pending {
                jobs: Vec::with_capacity(capacity),
                exit: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Append a job and wake the consumer.
    pub fn push(&self, job: T) {
        self.pending.lock().jobs.push(job);
        self.signal.notify_one();
    }

    /// Swap every pending job into `batch`.
    ///
    /// `batch` should be empty; its allocation is handed to the queue so
    /// steady-state draining never allocates.
    pub fn take_all(&self, batch: &mut Vec<T>) {
        let mut pending = self.pending.lock();
        mem::swap(&mut pending.jobs, batch);
    }

    /// Like [`take_all`](Self::take_all), but gives up instead of waiting for the lock.
    ///
    /// Returns `false` if the lock was contended; the jobs stay queued for the
    /// next attempt.
    pub fn try_take_all(&self, batch: &mut Vec<T>) -> bool {
        match self.pending.try_lock() {
            Some(mut pending) => {
                mem::swap(&mut pending.jobs, batch);
                true
            }
            None => false,
        }
    }

    /// Park until there is work or an exit was requested.
    ///
    /// Returns `false` once the queue should shut down.
    pub fn wait_for_jobs(&self) -> bool {
        let mut pending = self.pending.lock();
        while pending.jobs.is_empty() && !pending.exit {
            self.signal.wait(&mut pending);
        }
        !pending.exit
    }

    pub fn request_exit(&self) {
        self.pending.lock().exit = true;
        self.signal.notify_all();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Passed to every job run.
#[derive(Clone, Copy, Debug)]
pub struct JobContext {
    pub threading: ThreadingMode,
}

/// What a job wants after a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Put me back in the queue for the next cycle.
    Continue,
    /// Drop me.
    Done,
}

/// A unit of work for a [`JobWorker`].
pub trait Job: Send {
    fn run(&mut self, ctx: &JobContext) -> Step;
}

impl<F> Job for F
where
    F: FnMut(&JobContext) -> Step + Send,
{
    fn run(&mut self, ctx: &JobContext) -> Step {
        self(ctx)
    }
}

type BoxedJob = Box<dyn Job>;

/// The control worker.
///
/// Threaded, it owns a thread that parks on the queue. Single-threaded, every
/// [`pump`](Self::pump) runs one cycle inline.
pub struct JobWorker {
    queue: Arc<JobQueue<BoxedJob>>,
    mode: ThreadingMode,
    thread: Option<JoinHandle<()>>,
    batch: Vec<BoxedJob>,
}

impl JobWorker {
    pub fn new(mode: ThreadingMode) -> Self {
        let queue = Arc::new(JobQueue::new());

        let thread = match mode {
            ThreadingMode::Threaded => {
                let queue = queue.clone();
                let spawned = thread::Builder::new()
                    .name("klangraum-jobs".into())
                    .spawn(move || {
                        let ctx = JobContext { threading: mode };
                        let mut batch = Vec::new();
                        while queue.wait_for_jobs() {
                            run_cycle(&queue, &mut batch, &ctx);
                        }
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        warn!("failed to spawn job thread, running jobs inline: {e}");
                        None
                    }
                }
            }
            ThreadingMode::SingleThreaded => None,
        };

        let mode = if thread.is_some() {
            mode
        } else {
            ThreadingMode::SingleThreaded
        };
        debug!(?mode, "job worker started");

        Self {
            queue,
            mode,
            thread,
            batch: Vec::new(),
        }
    }

    pub fn mode(&self) -> ThreadingMode {
        self.mode
    }

    pub fn submit(&self, job: impl Job + 'static) {
        self.queue.push(Box::new(job));
    }

    /// Run one cycle inline. Does nothing when the worker has its own thread.
    pub fn pump(&mut self) {
        if self.thread.is_none() {
            let ctx = JobContext {
                threading: self.mode,
            };
            run_cycle(&self.queue, &mut self.batch, &ctx);
        }
    }

    /// Start a repeating job and return its handle.
    ///
    /// With `keep_running` the job repeats until terminated; otherwise it
    /// repeats only while [`Repeat::should_run`] holds.
    pub fn spawn_repeating<R: Repeat + 'static>(
        &self,
        task: R,
        keep_running: bool,
    ) -> RepeatHandle {
        let job = RepeatingJob::new(task);
        let handle = job.handle();
        self.restart(&handle, keep_running);
        handle
    }

    /// Start a repeating job again, whatever state it is in.
    ///
    /// Queues a fresh copy of the job. A copy still queued from the previous
    /// run notices it is stale and drops out without running.
    pub fn restart(&self, handle: &RepeatHandle, keep_running: bool) {
        handle.start(keep_running);
        self.queue.push((handle.respawn)());
    }

    /// Stop the worker thread, dropping any jobs still queued.
    pub fn shutdown(&mut self) {
        self.queue.request_exit();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("job thread panicked");
            }
        }
    }
}

impl Drop for JobWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_cycle(queue: &JobQueue<BoxedJob>, batch: &mut Vec<BoxedJob>, ctx: &JobContext) {
    queue.take_all(batch);
    for mut job in batch.drain(..) {
        if job.run(ctx) == Step::Continue {
            queue.push(job);
        }
    }
}

/// Work for a [`RepeatingJob`].
pub trait Repeat: Send {
    /// One cycle of work.
    fn execute(&mut self, ctx: &JobContext);

    /// Whether the task wants another cycle on its own account.
    fn should_run(&self) -> bool {
        false
    }
}

/// Delay between cycles of a repeating job on a threaded worker.
pub const REPEAT_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Default)]
struct Counters {
    start_count: u64,
    end_count: u64,
    keep_running: bool,
    force_terminate: bool,
}

/// Lifecycle of a repeating job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Running,
    /// Asked to stop but has not finished its last cycle yet
    Terminating,
    Stopped,
}

/// Owner-side control of a repeating job.
///
/// Termination is cooperative: the job notices at the start of its next cycle.
/// Starting again goes through [`JobWorker::restart`], which queues the job
/// along with the new start.
#[derive(Clone)]
pub struct RepeatHandle {
    counters: Arc<Mutex<Counters>>,
    respawn: Arc<dyn Fn() -> BoxedJob + Send + Sync>,
}

impl RepeatHandle {
    fn start(&self, keep_running: bool) {
        let mut c = self.counters.lock();
        c.keep_running = keep_running;
        c.force_terminate = false;
        c.start_count += 1;
    }

    /// Stop repeating unconditionally; the task may still run while `should_run` holds.
    pub fn terminate(&self) {
        self.counters.lock().keep_running = false;
    }

    /// Stop at the next cycle, whatever the task wants.
    pub fn force_terminate(&self) {
        self.counters.lock().force_terminate = true;
    }

    pub fn is_running(&self) -> bool {
        let c = self.counters.lock();
        c.end_count < c.start_count && !c.force_terminate
    }

    pub fn status(&self) -> JobStatus {
        let c = self.counters.lock();
        if c.start_count == 0 {
            JobStatus::NotStarted
        } else if c.end_count >= c.start_count {
            JobStatus::Stopped
        } else if c.force_terminate || !c.keep_running {
            JobStatus::Terminating
        } else {
            JobStatus::Running
        }
    }
}

impl fmt::Debug for RepeatHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatHandle")
            .field("counters", &*self.counters.lock())
            .finish_non_exhaustive()
    }
}

/// Re-queues itself each cycle until its stop condition holds.
///
/// Every copy of a job shares the same task and counters.
pub struct RepeatingJob<R> {
    task: Arc<Mutex<R>>,
    counters: Arc<Mutex<Counters>>,
}

impl<R: Repeat + 'static> RepeatingJob<R> {
    pub fn new(task: R) -> Self {
        Self {
            task: Arc::new(Mutex::new(task)),
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    pub fn handle(&self) -> RepeatHandle {
        let task = self.task.clone();
        let counters = self.counters.clone();
        RepeatHandle {
            counters: self.counters.clone(),
            respawn: Arc::new(move || {
                Box::new(RepeatingJob {
                    task: task.clone(),
                    counters: counters.clone(),
                }) as BoxedJob
            }),
        }
    }
}

impl<R: Repeat> RepeatingJob<R> {
    fn should_run(&self) -> bool {
        let mut c = self.counters.lock();
        let mut run = self.task.lock().should_run() || c.keep_running;
        // restarted while still winding down: this run is stale
        run &= c.end_count + 1 >= c.start_count;
        run &= !c.force_terminate;
        if !run {
            c.end_count = (c.end_count + 1).min(c.start_count);
        }
        run
    }
}

impl<R: Repeat> Job for RepeatingJob<R> {
    fn run(&mut self, ctx: &JobContext) -> Step {
        if !self.should_run() {
            return Step::Done;
        }
        self.task.lock().execute(ctx);
        if ctx.threading == ThreadingMode::Threaded {
            thread::sleep(REPEAT_INTERVAL);
        }
        Step::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Countdown {
        left: usize,
        runs: Arc<AtomicUsize>,
    }

    impl Repeat for Countdown {
        fn execute(&mut self, _ctx: &JobContext) {
            self.left = self.left.saturating_sub(1);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }

        fn should_run(&self) -> bool {
            self.left > 0
        }
    }

    #[test]
    fn queue_drains_in_order() {
        let queue = JobQueue::new();
        queue.push(1);
        queue.push(2);
        let mut batch = Vec::new();
        assert!(queue.try_take_all(&mut batch));
        assert_eq!(batch, vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn try_take_all_gives_up_when_contended() {
        let queue = JobQueue::new();
        queue.push(7);
        let guard = queue.pending.lock();
        let mut batch = Vec::new();
        assert!(!queue.try_take_all(&mut batch));
        drop(guard);
        assert!(queue.try_take_all(&mut batch));
        assert_eq!(batch, vec![7]);
    }

    #[test]
    fn repeating_job_stops_when_should_run_fails() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = JobWorker::new(ThreadingMode::SingleThreaded);
        let handle = worker.spawn_repeating(
            Countdown {
                left: 2,
                runs: runs.clone(),
            },
            false,
        );
        assert_eq!(handle.status(), JobStatus::Terminating);

        worker.pump();
        worker.pump();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(handle.is_running());

        worker.pump();
        assert_eq!(handle.status(), JobStatus::Stopped);
        assert!(worker.queue.is_empty());

        worker.pump();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn force_terminate_overrides_keep_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = JobWorker::new(ThreadingMode::SingleThreaded);
        let handle = worker.spawn_repeating(
            Countdown {
                left: 0,
                runs: runs.clone(),
            },
            true,
        );
        worker.pump();
        assert_eq!(handle.status(), JobStatus::Running);

        handle.force_terminate();
        assert!(!handle.is_running());
        worker.pump();
        assert_eq!(handle.status(), JobStatus::Stopped);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restart_replaces_the_queued_copy() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = JobWorker::new(ThreadingMode::SingleThreaded);
        let handle = worker.spawn_repeating(
            Countdown {
                left: 0,
                runs: runs.clone(),
            },
            true,
        );
        worker.pump();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        worker.restart(&handle, true);
        assert_eq!(worker.queue.len(), 2);
        for _ in 0..5 {
            worker.pump();
        }
        // the stale copy dropped out, the fresh one kept going
        assert_eq!(runs.load(Ordering::SeqCst), 6);
        assert_eq!(worker.queue.len(), 1);
        assert_eq!(handle.status(), JobStatus::Running);

        handle.terminate();
        worker.pump();
        assert_eq!(handle.status(), JobStatus::Stopped);
        assert!(!handle.is_running());
        assert!(worker.queue.is_empty());
    }

    #[test]
    fn stopped_job_can_be_restarted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = JobWorker::new(ThreadingMode::SingleThreaded);
        let handle = worker.spawn_repeating(
            Countdown {
                left: 1,
                runs: runs.clone(),
            },
            false,
        );
        worker.pump();
        worker.pump();
        assert_eq!(handle.status(), JobStatus::Stopped);

        worker.restart(&handle, true);
        assert_eq!(handle.status(), JobStatus::Running);
        worker.pump();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        handle.force_terminate();
        worker.pump();
        assert_eq!(handle.status(), JobStatus::Stopped);
    }

    #[test]
    fn threaded_worker_runs_closures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = JobWorker::new(ThreadingMode::Threaded);
        let (tx, rx) = std::sync::mpsc::channel();
        let counted = runs.clone();
        worker.submit(move |_: &JobContext| {
            counted.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
            Step::Done
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        worker.shutdown();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
