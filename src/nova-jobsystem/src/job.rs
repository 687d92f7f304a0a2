use crate::job_arena::Slot;
use std::fmt::{Debug, Formatter};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

/// Jobs are sized and aligned to this so adjacent pool slots never share a line
pub const CACHE_LINE_SIZE: usize = 64;

/// Inline payload capacity: whatever the job header leaves free in the cache line
pub const JOB_PAYLOAD_SIZE: usize = CACHE_LINE_SIZE
    - (mem::size_of::<Option<JobFunction>>()
        + mem::size_of::<Option<JobHandle>>()
        + mem::size_of::<AtomicI32>());

/// Called with the job itself and a view of its payload buffer
pub type JobFunction = fn(JobHandle, &[u8]);

/// A copyable reference to an arena slot, tagged with the generation it was
/// minted for. The slot cannot be recycled before its job finishes; a handle
/// kept beyond the recycle no longer matches the slot's generation and trips
/// the accessors below in debug builds.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct JobHandle {
    pub(crate) slot: NonNull<Slot>,
    pub(crate) generation: u32,
}

impl JobHandle {
    /// True once the job and all of its children ran to completion
    pub fn is_finished(&self) -> bool {
        self.unfinished_jobs.load(Ordering::SeqCst) == 0
    }

    /// True if the slot behind this handle was recycled for a newer job
    pub fn is_stale(&self) -> bool {
        let slot = unsafe { self.slot.as_ref() };
        slot.generation.load(Ordering::SeqCst) != self.generation
    }
}

impl Deref for JobHandle {
    type Target = Job;

    fn deref(&self) -> &Self::Target {
        debug_assert!(!self.is_stale(), "job handle outlived its arena slot");
        unsafe { &*self.slot.as_ref().job.get() }
    }
}

impl DerefMut for JobHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        debug_assert!(!self.is_stale(), "job handle outlived its arena slot");
        unsafe { &mut *self.slot.as_ref().job.get() }
    }
}

unsafe impl Send for JobHandle {}

#[repr(align(64))]
pub struct Job {
    pub(crate) function: Option<JobFunction>,
    pub(crate) parent: Option<JobHandle>,

    /// 1 for the job's own work, plus 1 per outstanding child
    pub(crate) unfinished_jobs: AtomicI32,
    pub(crate) payload: [u8; JOB_PAYLOAD_SIZE],
}

// One cache line exactly, so queue and pool slots cannot false-share
const _: () = assert!(mem::size_of::<Job>() == CACHE_LINE_SIZE);
const _: () = assert!(mem::align_of::<Job>() == CACHE_LINE_SIZE);

impl Debug for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("unfinished_jobs", &self.unfinished_jobs)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Default for Job {
    fn default() -> Self {
        Self {
            function: None,
            parent: None,
            unfinished_jobs: AtomicI32::new(0),
            payload: [0; JOB_PAYLOAD_SIZE],
        }
    }
}

impl Job {
    /// Copy `bytes` into the inline payload buffer. The payload is frozen once
    /// the job is submitted.
    pub fn write_payload(&mut self, bytes: &[u8]) {
        debug_assert!(
            bytes.len() <= JOB_PAYLOAD_SIZE,
            "Payload max size exceeded! {} out of {} bytes max.",
            bytes.len(),
            JOB_PAYLOAD_SIZE
        );
        self.payload[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Store `value` at the start of the payload buffer.
    ///
    /// # Safety
    /// `value` must fit in [`JOB_PAYLOAD_SIZE`] bytes (debug-asserted), and if it is
    /// not `Copy` it must be read back exactly once with [`Job::payload_value`].
    pub unsafe fn write_payload_value<T>(&mut self, value: T) {
        debug_assert!(
            mem::size_of::<T>() <= JOB_PAYLOAD_SIZE,
            "Payload max size exceeded! {} out of {} bytes max.",
            mem::size_of::<T>(),
            JOB_PAYLOAD_SIZE
        );
        // The buffer has byte alignment, so the write must not assume T's
        (self.payload.as_mut_ptr() as *mut T).write_unaligned(value);
    }

    /// Read back a value stored with [`Job::write_payload_value`].
    ///
    /// # Safety
    /// A `T` must have been written first; a non-`Copy` `T` must be read at most once.
    pub unsafe fn payload_value<T>(&self) -> T {
        (self.payload.as_ptr() as *const T).read_unaligned()
    }
}

unsafe impl Send for Job {}

#[inline]
pub(crate) fn execute(job: JobHandle) {
    {
        let function = job.function.expect("executed a job with no function");
        function(job, job.payload());
    }

    finish(job);
}

#[inline]
pub(crate) fn finish(job: JobHandle) {
    // The zero test must come from the decrement itself: a separate load would let
    // two finishing children both observe zero and cascade twice into the parent
    let old = job.unfinished_jobs.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(old > 0, "job finished more times than it was started");

    if old == 1 {
        if let Some(parent) = job.parent {
            finish(parent);
        }
    }
}
