use crate::job_queue::JobQueue;
use crate::{job, SharedWorkerData};
use once_cell::sync::OnceCell;
use std::panic::{self, AssertUnwindSafe};
use std::process::abort;
use std::sync::Arc;
use std::thread;
use std::thread::{JoinHandle, ThreadId};

/// One queue plus the identity of the thread that owns it. Worker 0 is bound to
/// the thread that built the job system; it never runs the dispatch loop and
/// participates through `wait` instead.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    thread_id: OnceCell<ThreadId>,
    queue: JobQueue,
}

impl Worker {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            thread_id: OnceCell::new(),
            queue: JobQueue::new(),
        }
    }

    pub(crate) fn bind_current_thread(&self) {
        self.thread_id
            .set(thread::current().id())
            .expect("worker is already bound to a thread");
    }

    pub(crate) fn is_bound_to(&self, thread_id: ThreadId) -> bool {
        self.thread_id.get() == Some(&thread_id)
    }

    pub(crate) fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug)]
pub(crate) struct WorkerThread {
    thread: JoinHandle<()>,
}

impl WorkerThread {
    pub fn new(index: usize, shared_worker_data: Arc<SharedWorkerData>) -> Self {
        Self {
            thread: thread::Builder::new()
                .name(format!("Worker Thread {}", index))
                .spawn(move || {
                    WorkerThread::thread_main(index, shared_worker_data);
                })
                .expect("failed to spawn a worker thread"),
        }
    }

    fn thread_main(index: usize, shared_worker_data: Arc<SharedWorkerData>) {
        shared_worker_data.worker(index).bind_current_thread();
        nova_core::logger::set_current_thread_name(thread::current().name().unwrap());

        loop {
            if shared_worker_data.is_stopping() {
                return;
            }

            // Pop our own queue, else steal from a random victim
            if let Some(job) = shared_worker_data.try_get_job(index) {
                // A panicking job would leave its completion counters dangling,
                // so treat it as fatal
                panic::catch_unwind(AssertUnwindSafe(|| {
                    job::execute(job);
                }))
                .unwrap_or_else(|_| {
                    abort();
                });
            } else {
                shared_worker_data.sleep();
            }
        }
    }

    pub fn join(self) {
        let _ = self.thread.join();
    }
}
