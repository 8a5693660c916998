//! The fixed 52-note A0..C5 table: per-note physical parameters and the
//! uniform hammer/damping constants shared by every key.
//!
//! Values are taken directly from the original engine's `init_strings()`
//! and `init_hammers()` (`piano.h`): a two-segment string length (1.92m up
//! to B2, 0.96m from C3 up) and a cross-section of 0.001 for every string
//! except the topmost (C5, 0.0008), with density, Young's modulus, and
//! damping shared across the whole keyboard.

/// Number of modeled strings, A0..C5 inclusive.
pub const N_STRINGS: usize = 52;
/// MIDI note number of A0, the lowest modeled key.
pub const MIDI_NOTE_OFFSET: u8 = 21;

/// Linear mass density shared by every string (kg/m).
pub const RHO: f64 = 0.0182;
/// Young's modulus shared by every string (N/m^2).
pub const YOUNG_MODULUS: f64 = 9e7;
/// Nominal (undamped) first damping coefficient.
pub const B1_NOMINAL: f64 = 0.003;
/// Nominal (undamped) second damping coefficient.
pub const B2_NOMINAL: f64 = 6.25e-9;

/// Uniform hammer parameters, identical for all 52 keys.
pub const HAMMER_MASS_KG: f64 = 4.9e-3;
pub const HAMMER_STIFFNESS_EXPONENT: f64 = 2.3;
pub const HAMMER_FELT_DAMPING: f64 = 1e-4;
pub const HAMMER_STIFFNESS_N_PER_M: f64 = 4e8;
pub const HAMMER_CONTACT_POSITION: f64 = 0.12;
pub const HAMMER_CONTACT_WINDOW_M: f64 = 0.05;

/// Fixed per-note physical parameters: fundamental frequency, string
/// length, and cross-sectional area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteParams {
    pub f0_hz: f64,
    pub length_m: f64,
    pub cross_section_m2: f64,
}

/// Equal-tempered A4 = 440 Hz table, in MIDI note order A0 (note 0) to C5 (note 51).
const F0_TABLE: [f64; N_STRINGS] = [
    27.5000, 29.1352, 30.8677, 32.7032, 34.6478, 36.7081, 38.8909, 41.2034, 43.6535, 46.2493,
    48.9994, 51.9131, 55.0000, 58.2705, 61.7354, 65.4064, 69.2957, 73.4162, 77.7817, 82.4069,
    87.3071, 92.4986, 97.9989, 103.8262, 110.0000, 116.5409, 123.4708, 130.8128, 138.5913,
    146.8324, 155.5635, 164.8138, 174.6141, 184.9972, 195.9977, 207.6523, 220.0000, 233.0819,
    246.9417, 261.6256, 277.1826, 293.6648, 311.1270, 329.6276, 349.2282, 369.9944, 391.9954,
    415.3047, 440.0000, 466.1638, 493.8833, 523.2511,
];

/// Returns the fixed parameters for the given note index (`0 == A0`, `51 == C5`).
pub fn note_params(note_index: usize) -> Option<NoteParams> {
    let f0_hz = *F0_TABLE.get(note_index)?;
    // C3 is note index 27 (A0=0 ... B2=26, C3=27). C5 is note index 51, the
    // only string with the reduced cross-section (piano.h's init_strings
    // gives every other string 0.001, and only the topmost string 0.0008).
    let (length_m, cross_section_m2) = if note_index < 27 {
        (1.92, 0.001)
    } else if note_index < 51 {
        (0.96, 0.001)
    } else {
        (0.96, 0.0008)
    };
    Some(NoteParams {
        f0_hz,
        length_m,
        cross_section_m2,
    })
}

/// Converts a MIDI note number to a note index, if within the modeled range.
pub fn midi_to_note_index(midi_note: u8) -> Option<usize> {
    let index = midi_note.checked_sub(MIDI_NOTE_OFFSET)? as usize;
    (index < N_STRINGS).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_52_entries() {
        assert_eq!(F0_TABLE.len(), N_STRINGS);
    }

    #[test]
    fn a0_and_c5_bracket_the_table() {
        let a0 = note_params(0).unwrap();
        assert!((a0.f0_hz - 27.5).abs() < 1e-6);
        let c5 = note_params(51).unwrap();
        assert!((c5.f0_hz - 523.2511).abs() < 1e-3);
        assert!(note_params(52).is_none());
    }

    #[test]
    fn length_breaks_at_b2_to_c3() {
        let b2 = note_params(26).unwrap();
        let c3 = note_params(27).unwrap();
        assert_eq!(b2.length_m, 1.92);
        assert_eq!(c3.length_m, 0.96);
    }

    #[test]
    fn cross_section_breaks_only_at_top_c5() {
        let b4 = note_params(50).unwrap();
        let c5 = note_params(51).unwrap();
        assert_eq!(b4.cross_section_m2, 0.001);
        assert_eq!(c5.cross_section_m2, 0.0008);
    }

    #[test]
    fn midi_mapping_matches_offset() {
        assert_eq!(midi_to_note_index(21), Some(0));
        assert_eq!(midi_to_note_index(72), Some(N_STRINGS - 1));
        assert_eq!(midi_to_note_index(20), None);
        assert_eq!(midi_to_note_index(73), None);
    }
}
