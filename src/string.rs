//! Finite-difference string simulator.
//!
//! Solves the stiff, damped string PDE coupled to a nonlinear felt hammer
//! (Chaigne & Askenfelt's scheme, as implemented by the original OpenPiano
//! engine this crate's physical model is grounded on). Each
//! [`StringSimulator`] owns exactly one [`Hammer`] and advances one audio
//! sample per call to [`StringSimulator::get_next_sample`].

use crate::activity::ActivityTracker;
use crate::error::{EngineError, EngineResult};
use crate::hammer::Hammer;

/// Minimum spatial grid size for the FD stencil (`i-2..i+2` with `2 <= i <= N-4`).
const MIN_GRID_SIZE: usize = 5;

/// A single modeled piano string and its hammer.
pub struct StringSimulator {
    hammer: Hammer,

    // Physical parameters.
    ts: f64,
    rho: f64,
    b1_nom: f64,
    b2_nom: f64,
    b1: f64,
    b2: f64,

    // Derived physical quantities.
    ms: f64,
    c: f64,
    eps: f64,

    // Grid.
    n: usize,
    delta_x: f64,
    lambda: f64,
    mu: f64,

    // PDE coefficients, recomputed whenever damping changes.
    a1: f64,
    a2: f64,
    a3: f64,
    a4: f64,
    a5: f64,

    // Boundary coefficients for the alternate impedance-matched boundary
    // condition; kept and recomputed alongside a1..a5 because the data
    // model tracks them, even though the active step uses the simplified
    // reflective boundary below.
    #[allow(dead_code)]
    b_r: [f64; 5],
    #[allow(dead_code)]
    b_l: [f64; 5],

    /// Spatial x time displacement buffer: `y[i][n]`, `i in 0..=N+1`, `n in 0..4`.
    y: Vec<[f64; 4]>,
    n0: u8,
    n1: u8,
    n2: u8,
    n3: u8,

    // Sound tap bounds, half-open [left, right).
    tap_left: usize,
    tap_right: usize,

    activity: ActivityTracker,
}

impl StringSimulator {
    /// Construct a string simulator for one key.
    ///
    /// `fs` (Hz), `f0` (Hz), `length` (m), `rho` (kg/m), `cross_section` (m^2),
    /// `young_modulus` (N/m^2), and the nominal damping pair `(b1, b2)`.
    pub fn new(
        fs: f64,
        f0: f64,
        length: f64,
        rho: f64,
        cross_section: f64,
        young_modulus: f64,
        b1: f64,
        b2: f64,
        mut hammer: Hammer,
    ) -> EngineResult<Self> {
        if f0 <= 0.0 || f0 > fs / 2.0 {
            return Err(EngineError::InvalidParameter {
                field: "f0",
                reason: format!("f0={f0} must be in (0, Fs/2={}]", fs / 2.0),
            });
        }

        let te = rho * length * length * 4.0 * f0 * f0;
        let c = (te / rho).sqrt();
        let r_gyr = cross_section / 2.0;
        let eps = r_gyr * r_gyr * (young_modulus * cross_section) / (te * length * length);

        let gamma = fs / (2.0 * f0);
        let n = ((-1.0 + (1.0 + 16.0 * eps * gamma * gamma).sqrt()) / (8.0 * eps))
            .sqrt()
            .floor() as i64;

        if n < MIN_GRID_SIZE as i64 {
            return Err(EngineError::InvalidParameter {
                field: "N",
                reason: format!(
                    "derived grid size N={n} is below the minimum stencil width {MIN_GRID_SIZE}"
                ),
            });
        }
        let n = n as usize;
        let delta_x = length / n as f64;

        if n < MIN_GRID_SIZE * 2 {
            log::warn!(
                "string f0={f0:.2}Hz has a small grid size N={n}; close to the stability floor"
            );
        }

        hammer.fit_to_grid(n, delta_x);

        let ts = 1.0 / fs;
        let lambda = c * ts / delta_x;
        let mu = eps * eps / (c * c * delta_x * delta_x);
        let ms = rho * length;

        let tap = sound_tap_bounds(n, hammer.xs_contact);

        let mut string = StringSimulator {
            hammer,
            ts,
            rho,
            b1_nom: b1,
            b2_nom: b2,
            b1,
            b2,
            ms,
            c,
            eps,
            n,
            delta_x,
            lambda,
            mu,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
            a5: 0.0,
            b_r: [0.0; 5],
            b_l: [0.0; 5],
            y: vec![[0.0; 4]; n + 2],
            n0: 3,
            n1: 2,
            n2: 1,
            n3: 0,
            tap_left: tap.0,
            tap_right: tap.1,
            activity: ActivityTracker::new(),
        };
        string.compute_fd_coefficients();

        log::debug!("string f0={f0:.2}Hz grid N={n} delta_x={delta_x:.6}m");

        Ok(string)
    }

    /// Recompute the PDE and boundary coefficients from the current
    /// `(b1, b2)` damping pair. Called at construction and whenever
    /// `damp`/`undamp` changes damping.
    fn compute_fd_coefficients(&mut self) {
        let delta_x = self.delta_x;
        let ts = self.ts;
        let c = self.c;
        let eps = self.eps;
        let n = self.n as f64;
        let b1 = self.b1;
        let b2 = self.b2;

        let d = 1.0 + b1 * delta_x + 2.0 * b2 / ts;
        let r = c * ts / delta_x;

        self.a1 = (2.0 - 2.0 * r * r + b2 / ts - 6.0 * eps * n * n * r * r) / d;
        self.a2 = (-1.0 + b1 * ts + 2.0 * b2 / ts) / d;
        self.a3 = (r * r * (1.0 + 4.0 * eps * n * n)) / d;
        self.a4 = (b2 / ts - eps * n * n * r * r) / d;
        self.a5 = (-b2 / ts) / d;

        let lambda = self.lambda;
        let mu = self.mu;
        let zeta_b = 1e3;
        let zeta_l = 1e20;

        let d_r = 1.0 + b1 * ts + zeta_b * lambda;
        self.b_r = [
            (2.0 - 2.0 * lambda * lambda * mu - 2.0 * lambda * lambda) / d_r,
            (4.0 * lambda * lambda * mu + 2.0 * lambda * lambda) / d_r,
            (-2.0 * lambda * lambda * mu) / d_r,
            (-1.0 - b1 * ts + zeta_b * lambda) / d_r,
            (ts * ts / self.rho) / d_r,
        ];

        let d_l = 1.0 + b1 * ts + zeta_l * lambda;
        self.b_l = [
            (2.0 - 2.0 * lambda * lambda * mu - 2.0 * lambda * lambda) / d_l,
            (4.0 * lambda * lambda * mu + 2.0 * lambda * lambda) / d_l,
            (-2.0 * lambda * lambda * mu) / d_l,
            (-1.0 - b1 * ts + zeta_l * lambda) / d_l,
            (ts * ts / self.rho) / d_l,
        ];
    }

    /// Excite the string with initial hammer velocity `v` (m/s). Does not
    /// reset the string displacement: repeated hits accumulate energy (see
    /// spec §9, "Open question — hit without reset").
    pub fn hit(&mut self, v: f64) {
        self.activity.hit();
        self.undamp();

        let (n0, n1, n2, n3) = (self.n0 as usize, self.n1 as usize, self.n2 as usize, self.n3 as usize);
        self.hammer.eta[n3] = 0.0;
        self.hammer.eta[n2] = 0.0;
        self.hammer.eta[n1] = 0.0;
        self.hammer.eta[n0] = v * self.ts;

        let y_contact = self.y[self.hammer.xs_contact][n0];
        self.hammer.fh[n0] = self.hammer.contact_force(self.hammer.eta[n0], y_contact);
    }

    /// Aggressively damp the string (used on key-off when sustain is off).
    pub fn damp(&mut self) {
        self.b1 = 0.2;
        self.b2 = 6.25e-6;
        self.compute_fd_coefficients();
    }

    /// Restore the nominal damping coefficients.
    pub fn undamp(&mut self) {
        self.b1 = self.b1_nom;
        self.b2 = self.b2_nom;
        self.compute_fd_coefficients();
    }

    /// Whether this string currently needs to be advanced.
    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }

    fn rotate(&mut self) {
        self.n0 = (self.n0 + 1) & 3;
        self.n1 = (self.n1 + 1) & 3;
        self.n2 = (self.n2 + 1) & 3;
        self.n3 = (self.n3 + 1) & 3;
    }

    /// Sum, over the four circular time slots, of the mean absolute
    /// displacement across the interior `[2, N-4]` spatial range.
    fn measure_energy(&self) -> f64 {
        if self.n < 6 {
            return 0.0;
        }
        let start = 2usize;
        let stop = self.n - 4; // inclusive
        let count = (stop - start + 1) as f64;
        [self.n0, self.n1, self.n2, self.n3]
            .iter()
            .map(|&k| {
                let sum: f64 = (start..=stop).map(|i| self.y[i][k as usize].abs()).sum();
                sum / count
            })
            .sum()
    }

    /// Advance one audio sample and return it.
    pub fn get_next_sample(&mut self) -> f32 {
        if self.activity.tick() {
            let energy = self.measure_energy();
            self.activity.record_check(energy);
        }
        if !self.activity.is_active() {
            return 0.0;
        }

        self.rotate();
        let (n0, n1, n2, n3) = (self.n0 as usize, self.n1 as usize, self.n2 as usize, self.n3 as usize);

        if self.n >= 6 {
            let ts2_n_over_ms = self.ts * self.ts * self.n as f64 / self.ms;
            let lo = 2usize;
            let hi = self.n - 4; // inclusive upper bound: i in [2, N-4]
            for i in lo..=hi {
                self.y[i][n0] = self.a1 * self.y[i][n1]
                    + self.a2 * self.y[i][n2]
                    + self.a3 * (self.y[i + 1][n1] + self.y[i - 1][n1])
                    + self.a4 * (self.y[i + 2][n1] + self.y[i - 2][n1])
                    + self.a5 * (self.y[i + 1][n2] + self.y[i - 1][n2] + self.y[i][n3])
                    + ts2_n_over_ms * self.hammer.fh[n1] * self.hammer.hammer_mask[i];
            }
        }

        // Simplified reflective boundary (Chaigne, Eq. 23).
        let end = self.n + 1;
        self.y[0][n0] = -self.y[2][n0];
        self.y[end][n0] = -self.y[end - 2][n0];

        let tap_sum: f64 = (self.tap_left..self.tap_right).map(|i| self.y[i][n0]).sum();
        let tap_count = (self.tap_right - self.tap_left).max(1) as f64;
        let current_sample = tap_sum / tap_count;

        self.hammer.eta[n0] = self.hammer.d1 * self.hammer.eta[n1]
            + self.hammer.d2 * self.hammer.eta[n2]
            + self.hammer.d_f * self.hammer.fh[n1];

        let y_contact = self.y[self.hammer.xs_contact][n0];
        self.hammer.fh[n0] = self.hammer.contact_force(self.hammer.eta[n0], y_contact);

        current_sample as f32
    }
}

/// `N_tap = min(13, largest odd <= N-1)`, centered on `N - Xs_contact`,
/// reproducing the original's half-open mean convention: `[left, right)`.
fn sound_tap_bounds(n: usize, xs_contact: usize) -> (usize, usize) {
    let largest_odd = if (n - 1) % 2 == 1 { n - 1 } else { (n - 1).saturating_sub(1) };
    let n_tap = 13usize.min(largest_odd).max(1);
    let xs_sound = n.saturating_sub(xs_contact);
    let half = (n_tap - 1) / 2;
    let left = xs_sound.saturating_sub(half);
    let right = (xs_sound + half).min(n + 1);
    (left, right.max(left + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hammer::Hammer;

    fn make_string(fs: f64, f0: f64, length: f64) -> StringSimulator {
        let hammer = Hammer::new(fs, 4.9e-3, 2.3, 1e-4, 4e8, 0.12, 0.05);
        StringSimulator::new(fs, f0, length, 0.0182, 0.001, 9e7, 3e-3, 6.25e-9, hammer).unwrap()
    }

    #[test]
    fn rejects_f0_above_nyquist() {
        let hammer = Hammer::new(48_000.0, 4.9e-3, 2.3, 1e-4, 4e8, 0.12, 0.05);
        let err = StringSimulator::new(48_000.0, 30_000.0, 1.92, 0.0182, 0.001, 9e7, 3e-3, 6.25e-9, hammer);
        assert!(matches!(err, Err(EngineError::InvalidParameter { field: "f0", .. })));
    }

    #[test]
    fn silence_stays_silent() {
        let mut s = make_string(48_000.0, 65.41, 1.92);
        for _ in 0..48_000 {
            assert_eq!(s.get_next_sample(), 0.0);
        }
    }

    #[test]
    fn hit_produces_nonzero_output_quickly() {
        let mut s = make_string(48_000.0, 65.41, 1.92);
        s.hit(2.5);
        let mut saw_signal = false;
        for _ in 0..64 {
            if s.get_next_sample().abs() > 1e-8 {
                saw_signal = true;
                break;
            }
        }
        assert!(saw_signal);
    }

    #[test]
    fn damp_drains_energy_faster_than_no_damp() {
        let mut s = make_string(48_000.0, 65.41, 1.92);
        s.hit(2.5);
        for _ in 0..24_000 {
            s.get_next_sample();
        }
        s.damp();
        let mut max_after = 0.0f32;
        for _ in 0..48_000 {
            max_after = max_after.max(s.get_next_sample().abs());
        }
        assert!(max_after < 1e-3);
    }

    #[test]
    fn output_never_goes_nonfinite_across_a_double_hit() {
        let mut s = make_string(48_000.0, 65.41, 1.92);
        s.hit(2.5);
        for _ in 0..96_000 {
            assert!(s.get_next_sample().is_finite());
        }
        s.hit(5.5);
        for _ in 0..96_000 {
            assert!(s.get_next_sample().is_finite());
        }
    }

    #[test]
    fn deterministic_given_same_hit_sequence() {
        let mut a = make_string(48_000.0, 65.41, 1.92);
        let mut b = make_string(48_000.0, 65.41, 1.92);
        a.hit(3.0);
        b.hit(3.0);
        for _ in 0..10_000 {
            assert_eq!(a.get_next_sample(), b.get_next_sample());
        }
    }
}
