//! Builds the starting ensemble of a simulation from per-axis parameter ranges.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::ensemble::{Constant, FIELD_COUNT, SPIN_AXES, SpinAxis, SpinEnsemble, State, unravel};
use crate::error::PreconditionError;

/// Proton gyromagnetic ratio in kHz/mT.
pub const PROTON_GAMMA: f64 = 42.577;

/// Initial magnetization of every spin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartingSpins {
    #[default]
    Mz,
    Zero,
    MinusMz,
    Mx,
    My,
}

impl StartingSpins {
    pub const ALL: [StartingSpins; 5] = [
        StartingSpins::Mz,
        StartingSpins::Zero,
        StartingSpins::MinusMz,
        StartingSpins::Mx,
        StartingSpins::My,
    ];

    /// Selector position as used by `"Starting Spins"`, where 0 is "off".
    pub fn from_selector(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn magnetization(self) -> [f64; 3] {
        match self {
            StartingSpins::Mz => [0.0, 0.0, 1.0],
            StartingSpins::Zero => [0.0, 0.0, 0.0],
            StartingSpins::MinusMz => [0.0, 0.0, -1.0],
            StartingSpins::Mx => [1.0, 0.0, 0.0],
            StartingSpins::My => [0.0, 1.0, 0.0],
        }
    }
}

/// `length` evenly spaced values from `start` to `end`; a single spin takes
/// `start`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub length: usize,
    pub start: f64,
    pub end: f64,
}

impl Default for AxisRange {
    fn default() -> Self {
        Self::constant(0.0)
    }
}

impl AxisRange {
    pub fn constant(value: f64) -> Self {
        Self {
            length: 1,
            start: value,
            end: value,
        }
    }

    pub fn linspace(length: usize, start: f64, end: f64) -> Self {
        Self { length, start, end }
    }

    /// Values after mapping both ends through `convert`, spaced linearly in
    /// the converted unit.
    fn values(&self, convert: impl Fn(f64) -> f64) -> Vec<f64> {
        let (start, end) = (convert(self.start), convert(self.end));
        let step = (end - start) / (self.length.saturating_sub(1) as f64).max(1.0);
        (0..self.length).map(|i| start + step * i as f64).collect()
    }
}

/// Relaxation time in ms to rate in 1/ms; 0 or less means no relaxation.
fn rate(time_ms: f64) -> f64 {
    if time_ms <= 0.0 { 0.0 } else { 1.0 / time_ms }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpinGenerator {
    pub starting_spins: StartingSpins,
    pub t0_ms: f64,
    /// Recorded output step in us. Integration always runs at 1 us.
    pub dt_us: u32,
    pub t1_ms: AxisRange,
    pub t2_ms: AxisRange,
    pub fq_hz: AxisRange,
    pub x0_mm: AxisRange,
    pub y0_mm: AxisRange,
    pub z0_mm: AxisRange,
    pub vx_cm_s: AxisRange,
    pub vy_cm_s: AxisRange,
    pub vz_cm_s: AxisRange,
}

impl Default for SpinGenerator {
    fn default() -> Self {
        Self {
            starting_spins: StartingSpins::default(),
            t0_ms: 0.0,
            dt_us: 50,
            t1_ms: AxisRange::default(),
            t2_ms: AxisRange::default(),
            fq_hz: AxisRange::default(),
            x0_mm: AxisRange::default(),
            y0_mm: AxisRange::default(),
            z0_mm: AxisRange::default(),
            vx_cm_s: AxisRange::default(),
            vy_cm_s: AxisRange::default(),
            vz_cm_s: AxisRange::default(),
        }
    }
}

impl SpinGenerator {
    pub fn axis(&self, axis: SpinAxis) -> &AxisRange {
        match axis {
            SpinAxis::T1 => &self.t1_ms,
            SpinAxis::T2 => &self.t2_ms,
            SpinAxis::Fq => &self.fq_hz,
            SpinAxis::X => &self.x0_mm,
            SpinAxis::Y => &self.y0_mm,
            SpinAxis::Z => &self.z0_mm,
            SpinAxis::Vx => &self.vx_cm_s,
            SpinAxis::Vy => &self.vy_cm_s,
            SpinAxis::Vz => &self.vz_cm_s,
        }
    }

    pub fn axis_mut(&mut self, axis: SpinAxis) -> &mut AxisRange {
        match axis {
            SpinAxis::T1 => &mut self.t1_ms,
            SpinAxis::T2 => &mut self.t2_ms,
            SpinAxis::Fq => &mut self.fq_hz,
            SpinAxis::X => &mut self.x0_mm,
            SpinAxis::Y => &mut self.y0_mm,
            SpinAxis::Z => &mut self.z0_mm,
            SpinAxis::Vx => &mut self.vx_cm_s,
            SpinAxis::Vy => &mut self.vy_cm_s,
            SpinAxis::Vz => &mut self.vz_cm_s,
        }
    }

    /// Per-axis values in simulation units (1/ms, kHz, m, m/ms).
    fn axis_values(&self, axis: SpinAxis) -> Vec<f64> {
        let range = self.axis(axis);
        match axis {
            SpinAxis::T1 | SpinAxis::T2 => range.values(rate),
            SpinAxis::Fq | SpinAxis::X | SpinAxis::Y | SpinAxis::Z => range.values(|v| 0.001 * v),
            SpinAxis::Vx | SpinAxis::Vy | SpinAxis::Vz => range.values(|v| 0.00001 * v),
        }
    }

    pub fn generate(&self) -> Result<SpinEnsemble, PreconditionError> {
        if self.dt_us == 0 {
            return Err(PreconditionError::InvalidParameter {
                name: "dt_us",
                value: 0.0,
            });
        }
        if !self.t0_ms.is_finite() {
            return Err(PreconditionError::InvalidParameter {
                name: "t0_ms",
                value: self.t0_ms,
            });
        }

        let spin_shape: [usize; SPIN_AXES] = SpinAxis::ALL.map(|axis| self.axis(axis).length);
        let values = SpinAxis::ALL.map(|axis| self.axis_values(axis));
        let spins: usize = spin_shape.iter().product();
        if spins == 0 {
            return Err(PreconditionError::EmptySpinAxis);
        }

        let [mx, my, mz] = self.starting_spins.magnetization();
        let dt_ms = f64::from(self.dt_us) * 0.001;
        let mut constants = Array2::zeros((FIELD_COUNT, spins));
        let mut initial = Array2::zeros((FIELD_COUNT, spins));

        for s in 0..spins {
            let index = unravel(&spin_shape, s);
            let value = |axis: SpinAxis| values[axis as usize][index[axis as usize]];
            let velocity = [value(SpinAxis::Vx), value(SpinAxis::Vy), value(SpinAxis::Vz)];

            let mut set = |field: Constant, v: f64| constants[[field as usize, s]] = v;
            set(Constant::M0, 1.0);
            set(Constant::R1, value(SpinAxis::T1));
            set(Constant::R2, value(SpinAxis::T2));
            set(Constant::Vx, velocity[0]);
            set(Constant::Vy, velocity[1]);
            set(Constant::Vz, velocity[2]);
            set(Constant::Fq, value(SpinAxis::Fq));
            set(Constant::Dt, dt_ms);
            set(Constant::Gamma, PROTON_GAMMA);

            // positions are given at t = 0, the first row is at t0
            let mut set = |field: State, v: f64| initial[[field as usize, s]] = v;
            set(State::Mx, mx);
            set(State::My, my);
            set(State::Mz, mz);
            set(State::X, value(SpinAxis::X) + velocity[0] * self.t0_ms);
            set(State::Y, value(SpinAxis::Y) + velocity[1] * self.t0_ms);
            set(State::Z, value(SpinAxis::Z) + velocity[2] * self.t0_ms);
            set(State::Time, self.t0_ms);
        }

        log::debug!("generated {spins} spins with shape {spin_shape:?}");
        SpinEnsemble::new(spin_shape, constants, initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_is_a_single_relaxation_free_spin() {
        let ensemble = SpinGenerator::default().generate().unwrap();
        assert_eq!(ensemble.spin_count(), 1);
        assert_eq!(ensemble.slots(), 2);
        assert_relative_eq!(ensemble.dt_ms(), 0.05);
        assert_eq!(ensemble.gamma(), PROTON_GAMMA);
        assert_eq!(ensemble.constant(Constant::R1)[0], 0.0);
        assert_eq!(ensemble.final_state()[[State::Mz as usize, 0]], 1.0);
    }

    #[test]
    fn selector_skips_off() {
        assert_eq!(StartingSpins::from_selector(0), None);
        assert_eq!(StartingSpins::from_selector(1), Some(StartingSpins::Mz));
        assert_eq!(StartingSpins::from_selector(3), Some(StartingSpins::MinusMz));
        assert_eq!(StartingSpins::from_selector(5), Some(StartingSpins::My));
        assert_eq!(StartingSpins::from_selector(6), None);
    }

    #[test]
    fn relaxation_axes_are_spaced_in_rate() {
        let generator = SpinGenerator {
            t1_ms: AxisRange::linspace(3, 1000.0, 250.0),
            t2_ms: AxisRange::constant(0.0),
            ..Default::default()
        };
        let ensemble = generator.generate().unwrap();
        assert_eq!(ensemble.spin_shape(), [3, 1, 1, 1, 1, 1, 1, 1, 1]);
        let r1 = ensemble.constant(Constant::R1);
        assert_relative_eq!(r1[0], 0.001);
        assert_relative_eq!(r1[1], 0.0025);
        assert_relative_eq!(r1[2], 0.004);
        assert!(ensemble.constant(Constant::R2).iter().all(|&r| r == 0.0));
    }

    #[test]
    fn units_are_converted() {
        let generator = SpinGenerator {
            starting_spins: StartingSpins::Mx,
            fq_hz: AxisRange::constant(100.0),
            x0_mm: AxisRange::linspace(2, -5.0, 5.0),
            vz_cm_s: AxisRange::constant(10.0),
            ..Default::default()
        };
        let ensemble = generator.generate().unwrap();
        let spin = ensemble.spin_index([0, 0, 0, 1, 0, 0, 0, 0, 0]).unwrap();
        assert_relative_eq!(ensemble.constant(Constant::Fq)[spin], 0.1);
        assert_relative_eq!(ensemble.constant(Constant::Vz)[spin], 1e-4);
        let state = ensemble.final_state();
        assert_relative_eq!(state[[State::X as usize, spin]], 0.005);
        assert_eq!(state[[State::Mx as usize, spin]], 1.0);
        assert_eq!(state[[State::Mz as usize, spin]], 0.0);
    }

    #[test]
    fn start_time_shifts_positions() {
        let generator = SpinGenerator {
            t0_ms: 2.0,
            z0_mm: AxisRange::constant(1.0),
            vz_cm_s: AxisRange::constant(100.0),
            ..Default::default()
        };
        let ensemble = generator.generate().unwrap();
        let state = ensemble.final_state();
        assert_relative_eq!(state[[State::Time as usize, 0]], 2.0);
        assert_relative_eq!(state[[State::Z as usize, 0]], 0.001 + 0.001 * 2.0);
    }

    #[test]
    fn empty_axis_and_zero_dt_are_rejected() {
        let mut generator = SpinGenerator::default();
        generator.axis_mut(SpinAxis::Fq).length = 0;
        assert!(matches!(
            generator.generate(),
            Err(PreconditionError::EmptySpinAxis)
        ));

        let generator = SpinGenerator {
            dt_us: 0,
            ..Default::default()
        };
        assert!(generator.generate().is_err());
    }
}
