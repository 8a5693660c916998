//! Persistent worker pool for per-block fan-out.
//!
//! Grounded on the original engine's `OPTManeger` (`thread_maneger.h`):
//! a fixed set of OS threads spawned once at construction, parked on a
//! condvar between blocks, and released together for each block via a
//! generation counter. Task claiming is a single atomic fetch-add — no
//! per-task locking — and the fold-back into the output buffer happens
//! once per block via [`crate::barrier::CompletionBarrier`]'s completion
//! hook, run by whichever worker happens to complete the block.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::barrier::CompletionBarrier;

/// Minimum persistent worker count.
pub const MIN_THREADS: usize = 1;
/// Maximum persistent worker count.
pub const MAX_THREADS: usize = 8;

/// A task closure invoked once per claimed index, `0..task_count`, along
/// with the id (`0..num_threads`) of the worker executing it. Tasks are
/// claimed dynamically, so the worker that runs a given task index is not
/// predictable from the index alone — callers that need per-worker
/// scratch space must partition by the worker id, not the task index.
pub type BlockJob = Arc<dyn Fn(usize, usize) + Send + Sync>;
/// The per-block completion hook, run exactly once by the worker that
/// completes the block (never the caller of `run_and_collect` directly).
type CompletionHook = Box<dyn FnMut() + Send>;

struct StartState {
    generation: u64,
}

struct DoneState {
    generation: u64,
}

struct Shared {
    start: Mutex<StartState>,
    start_condvar: Condvar,
    done: Mutex<DoneState>,
    done_condvar: Condvar,
    job: Mutex<Option<BlockJob>>,
    completion_hook: Mutex<Option<CompletionHook>>,
    next_task: AtomicUsize,
    task_count: AtomicUsize,
    barrier: CompletionBarrier,
    shutdown: AtomicBool,
    generation: AtomicU64,
}

/// A fixed-size pool of persistent worker threads driving one block at a time.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Spawn `num_threads` persistent workers, clamped to `[1, 8]`.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.clamp(MIN_THREADS, MAX_THREADS);

        let shared = Arc::new(Shared {
            start: Mutex::new(StartState { generation: 0 }),
            start_condvar: Condvar::new(),
            done: Mutex::new(DoneState { generation: 0 }),
            done_condvar: Condvar::new(),
            job: Mutex::new(None),
            completion_hook: Mutex::new(None),
            next_task: AtomicUsize::new(0),
            task_count: AtomicUsize::new(0),
            barrier: CompletionBarrier::new(num_threads),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        });

        let handles = (0..num_threads)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("openpiano-worker-{worker_id}"))
                    .spawn(move || worker_loop(shared, worker_id))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::debug!("worker pool started with {num_threads} threads");

        WorkerPool {
            shared,
            handles,
            num_threads,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Enqueue one block's work: `job(i)` will be called exactly once for
    /// each `i` in `0..task_count`, spread across the pool, and
    /// `completion_hook` will run exactly once, on the worker that
    /// completes the block. Returns the generation to pass to
    /// [`WorkerPool::run_and_collect`].
    pub fn push_callable(
        &self,
        job: BlockJob,
        task_count: usize,
        completion_hook: impl FnMut() + Send + 'static,
    ) -> u64 {
        *self.shared.job.lock().unwrap() = Some(job);
        *self.shared.completion_hook.lock().unwrap() = Some(Box::new(completion_hook));
        self.shared.next_task.store(0, Ordering::SeqCst);
        self.shared.task_count.store(task_count, Ordering::SeqCst);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut start = self.shared.start.lock().unwrap();
        start.generation = generation;
        self.shared.start_condvar.notify_all();
        generation
    }

    /// Block the calling thread until the block started by `push_callable`
    /// (identified by the generation it returned) has fully completed,
    /// including its completion hook.
    pub fn run_and_collect(&self, generation: u64) {
        let mut done = self.shared.done.lock().unwrap();
        while done.generation < generation {
            done = self.shared.done_condvar.wait(done).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let mut start = self.shared.start.lock().unwrap();
            start.generation = start.generation.wrapping_add(1);
        }
        self.shared.start_condvar.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        log::debug!("worker pool shut down, all workers joined");
    }
}

fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    let mut seen_generation = 0u64;
    loop {
        {
            let mut start = shared.start.lock().unwrap();
            while start.generation == seen_generation && !shared.shutdown.load(Ordering::SeqCst) {
                start = shared.start_condvar.wait(start).unwrap();
            }
            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }
            seen_generation = start.generation;
        }

        let job = shared.job.lock().unwrap().clone();
        if let Some(job) = job {
            let task_count = shared.task_count.load(Ordering::SeqCst);
            loop {
                let index = shared.next_task.fetch_add(1, Ordering::SeqCst);
                if index >= task_count {
                    break;
                }
                job(index, worker_id);
            }
        }

        let shared_for_hook = Arc::clone(&shared);
        let generation = seen_generation;
        shared.barrier.wait(move || {
            if let Some(mut hook) = shared_for_hook.completion_hook.lock().unwrap().take() {
                hook();
            }
            let mut done = shared_for_hook.done.lock().unwrap();
            done.generation = generation;
            shared_for_hook.done_condvar.notify_all();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_task_exactly_once() {
        let pool = WorkerPool::new(4);
        let counters: Arc<Vec<AtomicUsize>> = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect());
        let counters_for_job = Arc::clone(&counters);
        let job: BlockJob = Arc::new(move |i, _worker_id| {
            counters_for_job[i].fetch_add(1, Ordering::SeqCst);
        });

        let generation = pool.push_callable(job, 100, || {});
        pool.run_and_collect(generation);

        for c in counters.iter() {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn completion_hook_runs_exactly_once_per_block() {
        let pool = WorkerPool::new(4);
        let hook_calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let hook_calls = Arc::clone(&hook_calls);
            let generation = pool.push_callable(Arc::new(|_, _| {}), 16, move || {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            });
            pool.run_and_collect(generation);
        }

        assert_eq!(hook_calls.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn clamps_thread_count_to_valid_range() {
        assert_eq!(WorkerPool::new(0).num_threads(), MIN_THREADS);
        assert_eq!(WorkerPool::new(99).num_threads(), MAX_THREADS);
        assert_eq!(WorkerPool::new(3).num_threads(), 3);
    }

    #[test]
    fn empty_block_completes_immediately() {
        let pool = WorkerPool::new(2);
        let generation = pool.push_callable(Arc::new(|_, _| {}), 0, || {});
        pool.run_and_collect(generation);
    }
}
