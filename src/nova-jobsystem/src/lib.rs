use crate::job_arena::JobArena;
use crate::worker_thread::WorkerThread;
use nova_core::{nova_info, nova_verbose};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

pub use crate::job::{Job, JobFunction, JobHandle, CACHE_LINE_SIZE, JOB_PAYLOAD_SIZE};
pub use crate::parallel_for::{ParallelForFunction, PAR_GROUP_SIZE};
pub use crate::worker_thread::Worker;

/// Capacity of both a worker's queue and a thread's job ring. A power of two so
/// ring indices reduce to a mask.
pub const MAX_JOB_COUNT: usize = 256;
const _: () = assert!(MAX_JOB_COUNT.is_power_of_two());

/// State every worker thread shares with the public API
#[derive(Debug)]
pub(crate) struct SharedWorkerData {
    workers: Vec<Worker>,

    sleep_condvar: Condvar,
    sleep_mutex: Mutex<()>,

    stopping: AtomicBool,
}

impl SharedWorkerData {
    fn new(workers: Vec<Worker>) -> Self {
        Self {
            workers,
            sleep_condvar: Condvar::new(),
            sleep_mutex: Mutex::new(()),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn worker(&self, index: usize) -> &Worker {
        &self.workers[index]
    }

    fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Pop the worker's own queue, else steal from a uniformly random victim.
    /// Picking ourselves or an empty victim yields the OS scheduler and returns
    /// nothing this tick.
    pub fn try_get_job(&self, worker_index: usize) -> Option<JobHandle> {
        if let Some(job) = self.workers[worker_index].queue().pop() {
            return Some(job);
        }

        let victim = fastrand::usize(..self.workers.len());
        if victim == worker_index {
            thread::yield_now();
            return None;
        }

        let stolen = self.workers[victim].queue().steal();
        if stolen.is_none() {
            thread::yield_now();
        }
        stolen
    }

    /// Wake one sleeper. Taking the sleep mutex here means the notification cannot
    /// slip between a worker's last empty queue probe and its wait.
    pub fn signal(&self) {
        let _guard = self.sleep_mutex.lock();
        self.sleep_condvar.notify_one();
    }

    /// Block until more work is submitted. Re-checks the queues under the sleep
    /// mutex, pairing with `signal`, so a wakeup is either observed as queued work
    /// or delivered to the wait.
    pub fn sleep(&self) {
        let mut guard = self.sleep_mutex.lock();
        if self.is_stopping() || self.has_queued_jobs() {
            return;
        }
        self.sleep_condvar.wait(&mut guard);
    }

    fn has_queued_jobs(&self) -> bool {
        self.workers.iter().any(|worker| !worker.queue().is_empty())
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _guard = self.sleep_mutex.lock();
        self.sleep_condvar.notify_all();
    }
}

/// A work-stealing job system: a fixed pool of workers, each owning a bounded
/// deque, with parent/child completion accounting between jobs
#[derive(Debug)]
pub struct JobSystem {
    shared_worker_data: Arc<SharedWorkerData>,
    arena: JobArena,
    worker_threads: Vec<WorkerThread>,
}

impl JobSystem {
    /// Create a system with `worker_count` workers in total. The calling thread
    /// becomes worker 0, which owns a queue to submit into but drives completion
    /// through [`JobSystem::wait`]; the remaining `worker_count - 1` workers get
    /// dispatch threads.
    pub fn new(worker_count: usize) -> Arc<Self> {
        assert!(worker_count >= 1, "a job system needs at least one worker");
        nova_info!("Creating job system with {} workers", worker_count);

        let workers = (0..worker_count).map(Worker::new).collect();
        let shared_worker_data = Arc::new(SharedWorkerData::new(workers));
        shared_worker_data.worker(0).bind_current_thread();

        let mut worker_threads = Vec::with_capacity(worker_count - 1);
        for index in 1..worker_count {
            worker_threads.push(WorkerThread::new(index, shared_worker_data.clone()));
        }

        Arc::new(Self {
            shared_worker_data,
            arena: JobArena::new(),
            worker_threads,
        })
    }

    pub fn cpu_thread_count() -> usize {
        num_cpus::get()
    }

    /// Allocate a root job from the calling thread's arena. The job is cleared,
    /// given `function` and an unfinished count of 1, and is not submitted.
    pub fn create(&self, function: JobFunction) -> JobHandle {
        self.create_inner(function, None)
    }

    /// Allocate a job that must complete before `parent` can finish. The parent's
    /// counter is raised before the child exists, so the parent cannot complete
    /// in the meantime. Children may only be attached while the parent is still
    /// unsubmitted or running.
    pub fn create_child(&self, parent: JobHandle, function: JobFunction) -> JobHandle {
        debug_assert!(
            !parent.is_finished(),
            "cannot attach a child to a finished job"
        );
        parent.unfinished_jobs.fetch_add(1, Ordering::SeqCst);
        self.create_inner(function, Some(parent))
    }

    fn create_inner(&self, function: JobFunction, parent: Option<JobHandle>) -> JobHandle {
        let mut job = loop {
            match self.arena.allocate() {
                Ok(job) => break job,
                Err(job_arena::Error::Exhausted) => {
                    // Same backoff as a full queue: wake a consumer, then retry
                    self.shared_worker_data.signal();
                    thread::yield_now();
                }
            }
        };

        *job = Job {
            function: Some(function),
            parent,
            unfinished_jobs: AtomicI32::new(1),
            payload: [0; JOB_PAYLOAD_SIZE],
        };
        job
    }

    /// Push `job` onto `worker`'s queue. A full queue wakes a sleeper so somebody
    /// drains it, yields and retries; a successful push signals once.
    pub fn submit(&self, worker: &Worker, job: JobHandle) {
        while !worker.queue().push(job) {
            self.shared_worker_data.signal();
            thread::yield_now();
        }
        self.shared_worker_data.signal();
    }

    /// Run jobs from `worker`'s queue (stealing when it is empty) until `job`
    /// completes. The waiting thread is a full participant, so waiting from inside
    /// a job cannot deadlock the pool.
    pub fn wait(&self, worker: &Worker, job: JobHandle) {
        while !job.is_finished() {
            if let Some(next) = self.shared_worker_data.try_get_job(worker.index()) {
                job::execute(next);
            }
        }
    }

    /// The worker bound to the calling thread. A foreign thread gets the first
    /// worker with free queue capacity, or worker 0 when every queue is full
    /// (`submit` copes with fullness by retrying).
    pub fn thread_worker(&self) -> &Worker {
        let thread_id = thread::current().id();
        let workers = self.shared_worker_data.workers();
        workers
            .iter()
            .find(|worker| worker.is_bound_to(thread_id))
            .or_else(|| workers.iter().find(|worker| worker.queue().has_capacity()))
            .unwrap_or(&workers[0])
    }

    /// Create a job from a closure stored inline in the payload buffer
    pub fn spawn<F>(&self, f: F) -> JobHandle
    where
        F: FnOnce(JobHandle),
        F: Send + 'static,
    {
        // SAFETY: statically checked thanks to the 'static lifetime bound
        unsafe { self.spawn_unchecked(f) }
    }

    /// Like [`JobSystem::spawn`], with the new job attached as a child of `parent`
    pub fn spawn_child<F>(&self, parent: JobHandle, f: F) -> JobHandle
    where
        F: FnOnce(JobHandle),
        F: Send + 'static,
    {
        debug_assert!(
            !parent.is_finished(),
            "cannot attach a child to a finished job"
        );
        parent.unfinished_jobs.fetch_add(1, Ordering::SeqCst);
        // SAFETY: statically checked thanks to the 'static lifetime bound
        let mut job = unsafe { self.spawn_unchecked(f) };
        job.parent = Some(parent);
        job
    }

    /// Create a job from a closure without any lifetime constraint
    ///
    /// # Safety
    /// The caller must guarantee everything the closure borrows outlives the job's
    /// execution, normally by waiting on it before those borrows end.
    pub unsafe fn spawn_unchecked<F>(&self, f: F) -> JobHandle
    where
        F: FnOnce(JobHandle),
        F: Send,
    {
        fn trampoline<Func: FnOnce(JobHandle)>(job: JobHandle, _payload: &[u8]) {
            // SAFETY: written by `spawn_unchecked` below, consumed exactly once here
            let f = unsafe { job.payload_value::<Func>() };
            f(job);
        }

        debug_assert!(
            mem::size_of::<F>() <= JOB_PAYLOAD_SIZE,
            "Closure too large for a job payload! {} out of {} bytes max.",
            mem::size_of::<F>(),
            JOB_PAYLOAD_SIZE
        );

        let mut job = self.create(trampoline::<F>);
        unsafe {
            job.write_payload_value(f);
        }
        job
    }

    /// Run two closures as jobs and hand back both results
    /// ```
    /// let jobsystem = nova_jobsystem::JobSystem::new(nova_jobsystem::JobSystem::cpu_thread_count());
    /// let (a, b) = jobsystem.join(|| 20, || 30);
    /// assert_eq!(a, 20);
    /// assert_eq!(b, 30);
    /// ```
    pub fn join<F1, F2, R1, R2>(&self, f1: F1, f2: F2) -> (R1, R2)
    where
        F1: FnOnce() -> R1 + Send,
        F2: FnOnce() -> R2 + Send,
        R1: Send,
        R2: Send,
    {
        let mut left_result = MaybeUninit::uninit();
        let mut right_result = MaybeUninit::uninit();

        // SAFETY: both jobs are waited on before this frame returns
        let (left, right) = unsafe {
            let left = self.spawn_unchecked(|_| {
                left_result.write(f1());
            });
            let right = self.spawn_unchecked(|_| {
                right_result.write(f2());
            });
            (left, right)
        };

        let worker = self.thread_worker();
        self.submit(worker, left);
        self.submit(worker, right);
        self.wait(worker, left);
        self.wait(worker, right);

        // SAFETY: jobs are finished, results are initialized
        unsafe { (left_result.assume_init(), right_result.assume_init()) }
    }

    /// Create a root job, submit it to a worker with capacity and hand back the
    /// pair as a [`Task`]
    pub fn launch(&self, function: JobFunction) -> Task {
        let job = self.create(function);
        let worker = self.thread_worker();
        self.submit(worker, job);
        Task {
            worker: worker.index(),
            job,
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        nova_verbose!("Stopping job system");
        self.shared_worker_data.stop();
        for worker_thread in self.worker_threads.drain(..) {
            worker_thread.join();
        }
    }
}

/// A submitted job paired with the worker whose queue received it
#[derive(Debug, Copy, Clone)]
pub struct Task {
    worker: usize,
    job: JobHandle,
}

impl Task {
    pub fn job(&self) -> JobHandle {
        self.job
    }

    /// Help out on the owning worker's queue until the job completes
    pub fn wait(&self, jobsystem: &JobSystem) {
        let worker = jobsystem.shared_worker_data.worker(self.worker);
        jobsystem.wait(worker, self.job);
    }
}

static GLOBAL_JOBSYSTEM: OnceCell<Arc<JobSystem>> = OnceCell::new();

/// Get the global job system
/// Panic if it's not initialized
pub fn global() -> &'static Arc<JobSystem> {
    GLOBAL_JOBSYSTEM
        .get()
        .expect("Global job system was not initialized")
}

pub fn initialize_global(jobsystem: Arc<JobSystem>) {
    GLOBAL_JOBSYSTEM
        .set(jobsystem)
        .expect("Global job system was already initialized");
}

pub fn try_initialize_global(jobsystem: Arc<JobSystem>) -> Result<(), Arc<JobSystem>> {
    GLOBAL_JOBSYSTEM.set(jobsystem)
}

pub mod job;
mod job_arena;
mod job_queue;
pub mod parallel_for;
pub mod worker_thread;

#[cfg(test)]
mod tests;
