use crate::job::JobHandle;
use crate::MAX_JOB_COUNT;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

const MOD_MASK: u32 = (MAX_JOB_COUNT - 1) as u32;

/// Bounded work-stealing deque. The owning worker pushes and pops at `bottom`
/// (LIFO, the cache-hot end); thieves take from `top` (FIFO, where the oldest and
/// typically largest pieces of work sit). `bottom` and `top` count monotonically
/// and wrap; a slot is live iff `top <= i < bottom`. One mutex serializes all
/// three operations, which is what resolves the pop/steal race on a
/// single-element deque: at most one caller gets the job.
#[derive(Debug)]
pub(crate) struct JobQueue {
    // Padded so two workers' queues never contend on a line
    state: CachePadded<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    slots: [Option<JobHandle>; MAX_JOB_COUNT],
    bottom: u32,
    top: u32,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: CachePadded::new(Mutex::new(State {
                slots: [None; MAX_JOB_COUNT],
                bottom: 0,
                top: 0,
            })),
        }
    }

    /// Owner end. Fails when the deque already holds `MAX_JOB_COUNT` jobs; the
    /// caller is expected to let consumers drain and retry.
    pub fn push(&self, job: JobHandle) -> bool {
        let mut state = self.state.lock();
        if state.bottom.wrapping_sub(state.top) < MAX_JOB_COUNT as u32 {
            let index = (state.bottom & MOD_MASK) as usize;
            state.slots[index] = Some(job);
            state.bottom = state.bottom.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Owner end: the most recently pushed job
    pub fn pop(&self) -> Option<JobHandle> {
        let mut state = self.state.lock();
        if state.bottom == state.top {
            return None;
        }
        state.bottom = state.bottom.wrapping_sub(1);
        let index = (state.bottom & MOD_MASK) as usize;
        state.slots[index].take()
    }

    /// Thief end: the oldest queued job
    pub fn steal(&self) -> Option<JobHandle> {
        let mut state = self.state.lock();
        if state.bottom == state.top {
            return None;
        }
        let index = (state.top & MOD_MASK) as usize;
        let job = state.slots[index].take();
        state.top = state.top.wrapping_add(1);
        job
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.bottom == state.top
    }

    pub fn has_capacity(&self) -> bool {
        let state = self.state.lock();
        state.bottom.wrapping_sub(state.top) < MAX_JOB_COUNT as u32
    }
}
