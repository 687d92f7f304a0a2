use crate::job::JobHandle;
use crate::JobSystem;
use std::slice;

/// Ranges at or below this size stop splitting and run the leaf callback directly
pub const PAR_GROUP_SIZE: usize = 32;

/// Leaf callback: receives a disjoint sub-slice of the original range
pub type ParallelForFunction<T> = fn(&mut [T]);

/// Inline payload of a splitter job
struct ParallelForData<T> {
    data: *mut T,
    count: usize,
    function: ParallelForFunction<T>,
    jobsystem: *const JobSystem,
}

fn parallel_for_job<T: Send>(job: JobHandle, _payload: &[u8]) {
    // SAFETY: written by `parallel_for_unchecked` or by the parent splitter;
    // plain data, safe to read more than once
    let data = unsafe { job.payload_value::<ParallelForData<T>>() };

    if data.count > PAR_GROUP_SIZE {
        // SAFETY: the root's caller keeps the system alive until the whole tree ran
        let jobsystem = unsafe { &*data.jobsystem };
        let worker = jobsystem.thread_worker();

        let left_count = data.count / 2;
        let mut left = jobsystem.create_child(job, parallel_for_job::<T>);
        unsafe {
            left.write_payload_value(ParallelForData::<T> {
                data: data.data,
                count: left_count,
                function: data.function,
                jobsystem: data.jobsystem,
            });
        }
        jobsystem.submit(worker, left);

        let right_count = data.count - left_count;
        let mut right = jobsystem.create_child(job, parallel_for_job::<T>);
        unsafe {
            right.write_payload_value(ParallelForData::<T> {
                // Advance by elements, never bytes
                data: data.data.add(left_count),
                count: right_count,
                function: data.function,
                jobsystem: data.jobsystem,
            });
        }
        jobsystem.submit(worker, right);

        // No wait here: completion propagates through the parent counters
    } else {
        // SAFETY: splitters hand out disjoint sub-ranges of one exclusive slice
        let group = unsafe { slice::from_raw_parts_mut(data.data, data.count) };
        (data.function)(group);
    }
}

impl JobSystem {
    /// Build the root splitter job for `data` without submitting it. The job
    /// recursively halves the range until groups of at most [`PAR_GROUP_SIZE`]
    /// elements remain, then calls `function` on each group.
    ///
    /// # Safety
    /// The job and its children read and write `data` through a raw pointer. The
    /// caller must submit the job and wait for it to complete while `self` and the
    /// borrow of `data` are both still alive.
    pub unsafe fn parallel_for_unchecked<T: Send>(
        &self,
        data: &mut [T],
        function: ParallelForFunction<T>,
    ) -> JobHandle {
        let mut job = self.create(parallel_for_job::<T>);
        job.write_payload_value(ParallelForData {
            data: data.as_mut_ptr(),
            count: data.len(),
            function,
            jobsystem: self as *const JobSystem,
        });
        job
    }

    /// Apply `function` to `data` in parallel groups of at most
    /// [`PAR_GROUP_SIZE`] elements, returning once every group ran
    pub fn parallel_for<T: Send>(&self, data: &mut [T], function: ParallelForFunction<T>) {
        // SAFETY: submitted and waited on below, inside the borrow of `data`
        let job = unsafe { self.parallel_for_unchecked(data, function) };
        let worker = self.thread_worker();
        self.submit(worker, job);
        self.wait(worker, job);
    }
}
