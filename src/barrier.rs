//! A reusable barrier with a completion hook.
//!
//! Modeled on the original engine's "gates" class (`thread_maneger.h`):
//! `T` participants arrive, the last arrival runs a caller-supplied
//! completion closure while everyone else blocks, and then all participants
//! are released together. Unlike [`std::sync::Barrier`], the hook lets the
//! dispatcher thread fold per-thread scratch buffers into the output buffer
//! exactly once per block, without a second round-trip.

use std::sync::{Condvar, Mutex};

struct State {
    arrived: usize,
    generation: u64,
}

/// A barrier for exactly `width` participants, reusable across blocks.
pub struct CompletionBarrier {
    width: usize,
    state: Mutex<State>,
    condvar: Condvar,
}

impl CompletionBarrier {
    pub fn new(width: usize) -> Self {
        CompletionBarrier {
            width: width.max(1),
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until `width` callers have arrived. The caller that completes
    /// the group runs `on_complete` before anyone is released; every other
    /// caller just waits. Returns once every participant (including the
    /// completer) has passed the barrier.
    pub fn wait<F: FnOnce()>(&self, on_complete: F) {
        let mut guard = self.state.lock().unwrap();
        let my_generation = guard.generation;
        guard.arrived += 1;

        if guard.arrived == self.width {
            on_complete();
            guard.arrived = 0;
            guard.generation = guard.generation.wrapping_add(1);
            self.condvar.notify_all();
        } else {
            while guard.generation == my_generation {
                guard = self.condvar.wait(guard).unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_participant_runs_hook_every_time() {
        let barrier = CompletionBarrier::new(1);
        let count = AtomicUsize::new(0);
        for _ in 0..5 {
            barrier.wait(|| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn hook_runs_exactly_once_per_round_with_many_threads() {
        let barrier = Arc::new(CompletionBarrier::new(8));
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let arrivals = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let hook_calls = Arc::clone(&hook_calls);
                let arrivals = Arc::clone(&arrivals);
                thread::spawn(move || {
                    for _ in 0..50 {
                        arrivals.fetch_add(1, Ordering::SeqCst);
                        barrier.wait(|| {
                            hook_calls.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(hook_calls.load(Ordering::SeqCst), 50);
        assert_eq!(arrivals.load(Ordering::SeqCst), 8 * 50);
    }
}
