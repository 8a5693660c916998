//! Error taxonomy for the engine's construction and control paths.
//!
//! Hot-path methods (`get_next_sample`, `get_next_block*`) never return
//! `Result`: per the error handling design, their only failure mode after
//! construction is audible silence, not a propagated error.

/// Errors surfaced synchronously by construction and control-path calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A construction parameter was outside its valid range.
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter {
        field: &'static str,
        reason: String,
    },

    /// `hit`/`damp` addressed a note index outside the modeled range.
    #[error("unknown note index {0}")]
    UnknownNote(u8),

    /// The caller passed a buffer longer than `samples_per_block`.
    #[error("buffer too large: requested {requested}, capacity {capacity}")]
    BufferTooLarge { requested: usize, capacity: usize },
}

pub type EngineResult<T> = Result<T, EngineError>;
