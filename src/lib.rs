//! # openpiano-core
//!
//! A real-time, physically-modeled piano sound engine. Every key is a
//! coupled string/felt-hammer finite-difference simulation; the [`Engine`]
//! aggregates all 52 modeled keys (A0..C5) and offers single- and
//! multi-threaded per-block rendering on top of a persistent worker pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ENGINE                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  String 0  (A0)  [Hammer]──[FD solver]                        │
//! │  String 1  (A#0) [Hammer]──[FD solver]                        │
//! │  ...                                                          │
//! │  String 51 (C5)  [Hammer]──[FD solver]                        │
//! │                         │                                     │
//! │                         ▼                                     │
//! │              ┌────────────────────┐                           │
//! │              │    Worker pool     │  fan-out across T threads │
//! │              └──────────┬─────────┘                           │
//! │                         ▼                                     │
//! │                  [mono f32 output]                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate has no host plug-in shell, no file I/O, and no network
//! surface: it is a pure rendering library, driven by `hit`/`damp` calls and
//! polled for audio via `get_next_sample`/`get_next_block*`.

mod activity;
mod barrier;
mod error;
mod hammer;
mod keyboard;
mod notes;
mod pool;
mod string;

pub use error::{EngineError, EngineResult};
pub use keyboard::{Engine, EngineConfig};
pub use notes::{midi_to_note_index, MIDI_NOTE_OFFSET, N_STRINGS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_round_trip() {
        let mut engine = Engine::new(EngineConfig {
            sample_rate_hz: 48_000.0,
            samples_per_block: 128,
            threads: 2,
        })
        .unwrap();

        engine.hit_midi(60, 3.0).unwrap(); // middle C, MIDI 60
        let mut out = vec![0.0f32; 128];
        engine.get_next_block(&mut out, 1.0).unwrap();
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn midi_offset_matches_a0() {
        assert_eq!(midi_to_note_index(MIDI_NOTE_OFFSET), Some(0));
        assert_eq!(N_STRINGS, 52);
    }
}
