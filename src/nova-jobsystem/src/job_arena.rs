use crate::job::{Job, JobHandle};
use crate::MAX_JOB_COUNT;
use std::cell::{Cell, UnsafeCell};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use thread_local::ThreadLocal;

/// Per-thread arena of job slots, addressed by a wrapping bump cursor. Slots are
/// never freed individually: minting a handle retires the slot's previous
/// occupant by bumping its generation, so a handle kept across a recycle is
/// detectable at run time instead of silently aliasing a new job.
#[derive(Debug)]
pub(crate) struct JobArena {
    rings: ThreadLocal<Ring>,
}

#[derive(Debug)]
pub(crate) enum Error {
    /// The cursor wrapped onto a job that is still in flight; let some jobs
    /// finish and retry
    Exhausted,
}

impl JobArena {
    pub fn new() -> Self {
        Self {
            rings: ThreadLocal::new(),
        }
    }

    pub fn allocate(&self) -> Result<JobHandle, Error> {
        self.rings.get_or(Ring::new).take_next_slot()
    }
}

#[derive(Debug)]
struct Ring {
    slots: Box<[Slot]>,
    cursor: Cell<u32>,
}

impl Ring {
    fn new() -> Self {
        Self {
            slots: (0..MAX_JOB_COUNT).map(|_| Slot::new()).collect(),
            cursor: Cell::new(0),
        }
    }

    fn take_next_slot(&self) -> Result<JobHandle, Error> {
        let cursor = self.cursor.get();
        let slot = &self.slots[cursor as usize & (MAX_JOB_COUNT - 1)];

        // Clobbering an in-flight occupant would corrupt a live completion tree,
        // so a full ring reports exhaustion rather than wrapping over it
        if !slot.occupant_finished() {
            return Err(Error::Exhausted);
        }

        self.cursor.set(cursor.wrapping_add(1));
        Ok(slot.issue_handle())
    }
}

/// One cache line of job storage plus the generation that tells current handles
/// from retired ones
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) generation: AtomicU32,
    pub(crate) job: UnsafeCell<Job>,
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            job: UnsafeCell::new(Job::default()),
        }
    }

    /// Retire any outstanding handles and mint one for the slot's next occupant
    pub(crate) fn issue_handle(&self) -> JobHandle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        JobHandle {
            slot: NonNull::from(self),
            generation,
        }
    }

    fn occupant_finished(&self) -> bool {
        // SAFETY: only the finished-state atomic is read
        let job = unsafe { &*self.job.get() };
        job.unfinished_jobs.load(Ordering::SeqCst) == 0
    }
}
