//! The polyphonic engine: a fixed keyboard of 52 strings, hit/damp control,
//! and single- and multi-threaded per-block rendering.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::hammer::Hammer;
use crate::notes::{self, MIDI_NOTE_OFFSET, N_STRINGS};
use crate::pool::{BlockJob, WorkerPool};
use crate::string::StringSimulator;

/// Construction parameters for an [`Engine`]. The only "configuration" this
/// crate has — there is no configuration file, per the external interface
/// contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_rate_hz: f64,
    pub samples_per_block: usize,
    pub threads: usize,
}

impl EngineConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.sample_rate_hz <= 0.0 {
            return Err(EngineError::InvalidParameter {
                field: "sample_rate_hz",
                reason: format!("must be positive, got {}", self.sample_rate_hz),
            });
        }
        if self.samples_per_block == 0 {
            return Err(EngineError::InvalidParameter {
                field: "samples_per_block",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.threads == 0 {
            return Err(EngineError::InvalidParameter {
                field: "threads",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-thread scratch accumulator for one block. Interior mutability is
/// sound only because the pool passes each job the id of the worker
/// executing it, and that id is what selects the scratch slot: tasks are
/// claimed dynamically and a given task index can run on any worker, but a
/// given worker id is never live on two threads at once, so its scratch
/// slot is only ever written by that one worker.
struct ThreadScratch {
    buf: UnsafeCell<Box<[f32]>>,
}

unsafe impl Sync for ThreadScratch {}

impl ThreadScratch {
    fn new(len: usize) -> Self {
        ThreadScratch {
            buf: UnsafeCell::new(vec![0.0; len].into_boxed_slice()),
        }
    }

    fn zero(&self) {
        unsafe { (*self.buf.get()).fill(0.0) };
    }

    /// # Safety
    /// Caller must ensure no other thread observes or mutates this scratch
    /// concurrently (true during the pool's fan-out phase, by construction).
    unsafe fn as_mut_ptr(&self) -> *mut f32 {
        (*self.buf.get()).as_mut_ptr()
    }

    fn as_slice(&self) -> &[f32] {
        unsafe { &*self.buf.get() }
    }
}

/// A raw pointer wrapper asserting the pointee is safe to send across the
/// thread-pool boundary for the duration of one block. See
/// [`Engine::get_next_block_multithreaded`] for the accompanying safety
/// argument.
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}
impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        SendPtr(self.0)
    }
}
impl<T> Copy for SendPtr<T> {}

/// # Safety
/// The returned `BlockJob` must not be invoked after the block that created
/// it has fully completed (enforced by `WorkerPool::run_and_collect`
/// blocking the caller until then); the captured borrows outlive every call.
unsafe fn extend_job_lifetime(job: Arc<dyn Fn(usize, usize) + Send + Sync + '_>) -> BlockJob {
    std::mem::transmute(job)
}

/// The full polyphonic piano engine: 52 fixed (hammer, string) pairs plus a
/// persistent worker pool for block rendering.
pub struct Engine {
    config: EngineConfig,
    strings: Vec<StringSimulator>,
    pool: WorkerPool,
    scratch: Vec<ThreadScratch>,
}

impl Engine {
    /// Build the engine: constructs all 52 strings from the fixed note
    /// table and starts the worker pool. Fails fast if `config` is invalid
    /// or if a derived string parameter is out of range.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let mut strings = Vec::with_capacity(N_STRINGS);
        for note_index in 0..N_STRINGS {
            let params = notes::note_params(note_index).expect("note_index in 0..N_STRINGS");
            let hammer = Hammer::new(
                config.sample_rate_hz,
                notes::HAMMER_MASS_KG,
                notes::HAMMER_STIFFNESS_EXPONENT,
                notes::HAMMER_FELT_DAMPING,
                notes::HAMMER_STIFFNESS_N_PER_M,
                notes::HAMMER_CONTACT_POSITION,
                notes::HAMMER_CONTACT_WINDOW_M,
            );
            let string = StringSimulator::new(
                config.sample_rate_hz,
                params.f0_hz,
                params.length_m,
                notes::RHO,
                params.cross_section_m2,
                notes::YOUNG_MODULUS,
                notes::B1_NOMINAL,
                notes::B2_NOMINAL,
                hammer,
            )?;
            strings.push(string);
        }

        let pool = WorkerPool::new(config.threads);
        let scratch = (0..pool.num_threads())
            .map(|_| ThreadScratch::new(config.samples_per_block))
            .collect();

        log::debug!(
            "engine constructed: {} strings, {} threads, {} samples/block",
            N_STRINGS,
            pool.num_threads(),
            config.samples_per_block
        );

        Ok(Engine {
            config,
            strings,
            pool,
            scratch,
        })
    }

    /// Excite the string at `note_index` (`0 == A0`, `51 == C5`) with hammer
    /// velocity `v` (m/s).
    pub fn hit(&mut self, note_index: u8, v: f64) -> EngineResult<()> {
        let string = self
            .strings
            .get_mut(note_index as usize)
            .ok_or(EngineError::UnknownNote(note_index))?;
        log::trace!("hit note_index={note_index} v={v:.3}");
        string.hit(v);
        Ok(())
    }

    /// Excite the string addressed by MIDI note number.
    pub fn hit_midi(&mut self, midi_note: u8, v: f64) -> EngineResult<()> {
        let note_index = notes::midi_to_note_index(midi_note)
            .ok_or(EngineError::UnknownNote(midi_note.wrapping_sub(MIDI_NOTE_OFFSET)))?;
        self.hit(note_index as u8, v)
    }

    /// Damp the string at `note_index`.
    pub fn damp(&mut self, note_index: u8) -> EngineResult<()> {
        let string = self
            .strings
            .get_mut(note_index as usize)
            .ok_or(EngineError::UnknownNote(note_index))?;
        log::trace!("damp note_index={note_index}");
        string.damp();
        Ok(())
    }

    /// Advance every active string by one sample and mix with `gain`.
    pub fn get_next_sample(&mut self, gain: f32) -> f32 {
        let mut acc = 0.0f32;
        for string in self.strings.iter_mut() {
            if string.is_active() {
                acc += string.get_next_sample();
            }
        }
        acc * gain
    }

    /// Fill `out` single-threaded, sample by sample.
    pub fn get_next_block(&mut self, out: &mut [f32], gain: f32) -> EngineResult<()> {
        if out.len() > self.config.samples_per_block {
            return Err(EngineError::BufferTooLarge {
                requested: out.len(),
                capacity: self.config.samples_per_block,
            });
        }
        for sample in out.iter_mut() {
            *sample = self.get_next_sample(gain);
        }
        Ok(())
    }

    /// Fill `out` by fanning active strings out across the worker pool.
    ///
    /// Zeroes per-thread scratch, assigns one task per active string (the
    /// executing worker's own id selects its scratch slot), runs the pool,
    /// then sums the scratch slots into `out` scaled by `gain`.
    pub fn get_next_block_multithreaded(&mut self, out: &mut [f32], gain: f32) -> EngineResult<()> {
        let block_len = out.len();
        if block_len > self.config.samples_per_block {
            return Err(EngineError::BufferTooLarge {
                requested: block_len,
                capacity: self.config.samples_per_block,
            });
        }

        out.fill(0.0);

        let active_indices: Vec<usize> = (0..self.strings.len())
            .filter(|&i| self.strings[i].is_active())
            .collect();
        let task_count = active_indices.len();
        if task_count == 0 {
            return Ok(());
        }

        for scratch in &self.scratch {
            scratch.zero();
        }

        let active_indices = Arc::new(active_indices);
        let strings_ptr = SendPtr(self.strings.as_mut_ptr());
        // SAFETY: each scratch slot's raw pointer is touched by exactly one
        // worker per block (see `ThreadScratch::as_mut_ptr`'s contract).
        let scratch_ptrs: Arc<Vec<SendPtr<f32>>> = Arc::new(
            self.scratch
                .iter()
                .map(|s| SendPtr(unsafe { s.as_mut_ptr() }))
                .collect(),
        );

        let job_active_indices = Arc::clone(&active_indices);
        let job_scratch_ptrs = Arc::clone(&scratch_ptrs);
        let job = Arc::new(move |task_index: usize, worker_id: usize| {
            let strings_ptr = strings_ptr;
            let string_index = job_active_indices[task_index];
            // SAFETY: `active_indices` contains each string index at most
            // once, so distinct tasks never alias the same `StringSimulator`.
            let string: &mut StringSimulator = unsafe { &mut *strings_ptr.0.add(string_index) };
            let scratch_base = job_scratch_ptrs[worker_id].0;
            for i in 0..block_len {
                let sample = string.get_next_sample();
                // SAFETY: `worker_id` is unique among the workers live at
                // any instant, so this scratch slot has exactly one writer.
                unsafe {
                    *scratch_base.add(i) += sample;
                }
            }
        });
        // SAFETY: `run_and_collect` below blocks until this block's tasks
        // and completion hook have finished, so `job` is never invoked after
        // `strings_ptr`/`scratch_ptrs`/`active_indices` go out of scope.
        let job: BlockJob = unsafe { extend_job_lifetime(job) };

        let generation = self.pool.push_callable(job, task_count, || {});
        self.pool.run_and_collect(generation);

        for scratch in &self.scratch {
            for (out_sample, scratch_sample) in out.iter_mut().zip(scratch.as_slice()) {
                *out_sample += *scratch_sample * gain;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_engine(threads: usize) -> Engine {
        Engine::new(EngineConfig {
            sample_rate_hz: 48_000.0,
            samples_per_block: 512,
            threads,
        })
        .unwrap()
    }

    #[test]
    fn rejects_zero_threads_and_zero_block_size() {
        assert!(Engine::new(EngineConfig {
            sample_rate_hz: 48_000.0,
            samples_per_block: 0,
            threads: 4,
        })
        .is_err());
        assert!(Engine::new(EngineConfig {
            sample_rate_hz: 48_000.0,
            samples_per_block: 512,
            threads: 0,
        })
        .is_err());
    }

    #[test]
    fn unknown_note_index_is_an_error() {
        let mut engine = make_engine(2);
        assert!(matches!(
            engine.hit(200, 1.0),
            Err(EngineError::UnknownNote(200))
        ));
        assert!(matches!(
            engine.damp(200),
            Err(EngineError::UnknownNote(200))
        ));
    }

    #[test]
    fn buffer_too_large_is_rejected() {
        let mut engine = make_engine(2);
        let mut out = vec![0.0f32; 1024];
        assert!(matches!(
            engine.get_next_block(&mut out, 1.0),
            Err(EngineError::BufferTooLarge { .. })
        ));
        assert!(matches!(
            engine.get_next_block_multithreaded(&mut out, 1.0),
            Err(EngineError::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn silent_keyboard_emits_silence() {
        let mut engine = make_engine(2);
        let mut out = vec![1.0f32; 512];
        engine.get_next_block(&mut out, 1.0).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn single_and_multithreaded_blocks_match_after_a_hit() {
        let mut single = make_engine(1);
        let mut multi = make_engine(4);
        single.hit(39, 3.0).unwrap(); // middle C
        multi.hit(39, 3.0).unwrap();

        let mut out_single = vec![0.0f32; 256];
        let mut out_multi = vec![0.0f32; 256];
        for _ in 0..20 {
            single.get_next_block(&mut out_single, 1.0).unwrap();
            multi.get_next_block_multithreaded(&mut out_multi, 1.0).unwrap();
            for (a, b) in out_single.iter().zip(out_multi.iter()) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn multiple_simultaneous_hits_mix_without_nan() {
        let mut engine = make_engine(4);
        for note_index in [0u8, 12, 24, 39, 50] {
            engine.hit(note_index, 4.0).unwrap();
        }
        let mut out = vec![0.0f32; 256];
        for _ in 0..50 {
            engine.get_next_block_multithreaded(&mut out, 0.2).unwrap();
            assert!(out.iter().all(|s| s.is_finite()));
        }
    }
}
