//! Time-stepping integrator for one segment of a pulse sequence.
//!
//! A segment is first prepared against the ensemble it will run on (timing,
//! RF reconciliation and waveform resampling), then run once. Running
//! consumes the engine, so a prepared segment can't be applied twice.

use std::ops::Range;

use ndarray::{Array1, Array3, ArrayView2, Axis};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::MessageFn;
use crate::ensemble::{Constant, FIELD_COUNT, SpinEnsemble, State};
use crate::error::{PreconditionError, SimError};
use crate::kernel::{FINE_STEP_MS, Relaxation, Vector3, rotate};
use crate::params::SegmentParameters;
use crate::reconcile::{Reconciler, snap_duration};
use crate::waveform::{self, Waveform};

/// Number of progress messages sent over a segment (at most).
const PROGRESS_MESSAGES: usize = 10;

/// Longest segment accepted, in fine steps (about 67 s of simulated time).
const MAX_FINE_STEPS: usize = 1 << 26;
/// Largest block of recorded values a single segment may append.
const MAX_RECORDED_VALUES: usize = 1 << 28;

/// Per fine step drive, shared read-only by every spin.
struct Drive {
    gx: Array1<f64>,
    gy: Array1<f64>,
    gz: Array1<f64>,
    /// mT, `x + i y`
    rf: Array1<Complex64>,
    /// Rotation in rad per mT over one fine step: `2 pi gamma dt`.
    rads_per_mt: f64,
}

pub struct BlochEngine {
    params: SegmentParameters,
    drive: Drive,
    recorded_steps: usize,
    substeps: usize,
    dt_ms: f64,
    gamma: f64,
    spin_count: usize,
}

impl BlochEngine {
    /// Resolve timing, reconcile RF magnitude and flip angle and resample the
    /// waveforms for a segment that starts from the last state of `ensemble`.
    pub fn prepare(
        ensemble: &SpinEnsemble,
        params: &SegmentParameters,
        gradient: Option<&Waveform>,
        rf: Option<&Waveform>,
    ) -> Result<Self, SimError> {
        params.validate()?;
        let dt_ms = ensemble.dt_ms();
        let gamma = ensemble.gamma();

        let too_long = || PreconditionError::InvalidParameter {
            name: "duration_ms",
            value: params.duration_ms,
        };
        // the ensemble guarantees dt is a whole number of fine steps
        let substeps = (dt_ms / FINE_STEP_MS).round() as usize;
        let duration_ms = snap_duration(params.duration_ms, dt_ms);
        let steps = (duration_ms / dt_ms).round();
        if steps > MAX_FINE_STEPS as f64 {
            return Err(too_long().into());
        }
        let recorded_steps = steps as usize;
        let fine_steps = recorded_steps
            .checked_mul(substeps)
            .filter(|&n| n <= MAX_FINE_STEPS)
            .ok_or_else(too_long)?;
        recorded_steps
            .checked_mul(FIELD_COUNT)
            .and_then(|n| n.checked_mul(ensemble.spin_count()))
            .filter(|&n| n <= MAX_RECORDED_VALUES)
            .ok_or_else(too_long)?;

        let rf_shape = waveform::rf_shape(rf, params.rf_encoding, fine_steps)?;
        let average = match rf {
            Some(_) => waveform::coherent_average(&rf_shape),
            None => 1.0,
        };
        let drive = Reconciler::new(gamma, average, duration_ms).reconcile(params.rf);
        let [gx, gy, gz] = waveform::gradient_waveforms(gradient, params.gradient, fine_steps)?;
        let rf = waveform::scale_rf(&rf_shape, drive.magnitude_ut, params.rf_phase_deg);

        log::debug!(
            "segment prepared: {duration_ms} ms, {recorded_steps} recorded x {substeps} fine steps, \
             RF {:.4} uT / {:.2} deg",
            drive.magnitude_ut,
            drive.flip_deg
        );

        Ok(Self {
            params: SegmentParameters {
                duration_ms,
                rf: drive,
                ..params.clone()
            },
            drive: Drive {
                gx,
                gy,
                gz,
                rf,
                rads_per_mt: 2.0 * std::f64::consts::PI * gamma * FINE_STEP_MS,
            },
            recorded_steps,
            substeps,
            dt_ms,
            gamma,
            spin_count: ensemble.spin_count(),
        })
    }

    /// Parameters as they will be simulated: duration snapped to whole
    /// recorded steps and RF magnitude / flip angle reconciled.
    pub fn parameters(&self) -> &SegmentParameters {
        &self.params
    }

    pub fn recorded_steps(&self) -> usize {
        self.recorded_steps
    }

    /// Simulate the segment and append its recorded steps to `ensemble`.
    ///
    /// `send_msg` is called with progress at recorded-step boundaries; if it
    /// returns an [`crate::AbortReason`] the run stops and `ensemble` is left
    /// as it was.
    pub fn run(
        self,
        ensemble: &mut SpinEnsemble,
        send_msg: &mut MessageFn<'_>,
    ) -> Result<(), SimError> {
        if ensemble.spin_count() != self.spin_count
            || ensemble.dt_ms() != self.dt_ms
            || ensemble.gamma() != self.gamma
        {
            return Err(PreconditionError::EnsembleMismatch.into());
        }

        let tc = self.params.crusher_tc_ms;
        let mut spins = spin_states(ensemble.constants(), ensemble.final_state(), self.gamma, tc);
        let mut rows = Array3::zeros((self.recorded_steps, FIELD_COUNT, self.spin_count));
        let report_every = self.recorded_steps.div_ceil(PROGRESS_MESSAGES).max(1);

        for (outer, mut row) in rows.axis_iter_mut(Axis(0)).enumerate() {
            let fine = outer * self.substeps..(outer + 1) * self.substeps;
            let last = fine.end - 1;
            spins
                .par_iter_mut()
                .for_each(|spin| spin.advance(fine.clone(), &self.drive));

            let applied = [
                (State::Gx, self.drive.gx[last]),
                (State::Gy, self.drive.gy[last]),
                (State::Gz, self.drive.gz[last]),
                (State::RFx, self.drive.rf[last].re),
                (State::RFy, self.drive.rf[last].im),
                (State::Tc, tc),
            ];
            for (s, spin) in spins.iter().enumerate() {
                let recorded = [
                    (State::Mx, spin.m[0]),
                    (State::My, spin.m[1]),
                    (State::Mz, spin.m[2]),
                    (State::X, spin.position[0]),
                    (State::Y, spin.position[1]),
                    (State::Z, spin.position[2]),
                    (State::Time, spin.time_ms),
                ];
                for (field, value) in recorded.into_iter().chain(applied) {
                    row[[field as usize, s]] = value;
                }
            }

            let done = outer + 1;
            if done % report_every == 0 || done == self.recorded_steps {
                send_msg(format!(
                    "recorded step {done}/{} (t = {:.3} ms)",
                    self.recorded_steps,
                    spins.first().map_or(0.0, |spin| spin.time_ms)
                ))?;
            }
        }

        ensemble.append(rows.view())?;
        Ok(())
    }
}

/// Prepare and run a segment in one go.
pub fn simulate(
    ensemble: &mut SpinEnsemble,
    params: &SegmentParameters,
    gradient: Option<&Waveform>,
    rf: Option<&Waveform>,
    send_msg: &mut MessageFn<'_>,
) -> Result<SegmentParameters, SimError> {
    let engine = BlochEngine::prepare(ensemble, params, gradient, rf)?;
    let params = engine.parameters().clone();
    engine.run(ensemble, send_msg)?;
    Ok(params)
}

/// Running state of one spin during a segment.
struct SpinState {
    m: Vector3,
    origin: Vector3,
    velocity: Vector3,
    position: Vector3,
    /// Off-resonance expressed as a field offset in mT.
    db0: f64,
    relaxation: Relaxation,
    start_ms: f64,
    time_ms: f64,
}

impl SpinState {
    fn advance(&mut self, fine_steps: Range<usize>, drive: &Drive) {
        for i in fine_steps {
            let elapsed = (i + 1) as f64 * FINE_STEP_MS;
            for axis in 0..3 {
                self.position[axis] = self.origin[axis] + elapsed * self.velocity[axis];
            }
            let [x, y, z] = self.position;

            let bz = x * drive.gx[i] + y * drive.gy[i] + z * drive.gz[i] + self.db0;
            let p = [
                drive.rads_per_mt * drive.rf[i].re,
                drive.rads_per_mt * drive.rf[i].im,
                drive.rads_per_mt * bz,
            ];
            self.m = rotate(self.m, p);
            self.relaxation.apply(&mut self.m);
            self.time_ms = self.start_ms + elapsed;
        }
    }
}

fn spin_states(
    constants: ArrayView2<'_, f64>,
    start: ArrayView2<'_, f64>,
    gamma: f64,
    crusher_tc_ms: f64,
) -> Vec<SpinState> {
    let c = |field: Constant, s: usize| constants[[field as usize, s]];
    let m = |field: State, s: usize| start[[field as usize, s]];

    (0..constants.ncols())
        .map(|s| {
            let origin = [m(State::X, s), m(State::Y, s), m(State::Z, s)];
            SpinState {
                m: [m(State::Mx, s), m(State::My, s), m(State::Mz, s)],
                origin,
                velocity: [c(Constant::Vx, s), c(Constant::Vy, s), c(Constant::Vz, s)],
                position: origin,
                db0: c(Constant::Fq, s) / gamma,
                relaxation: Relaxation::new(
                    c(Constant::M0, s),
                    c(Constant::R1, s),
                    c(Constant::R2, s),
                    crusher_tc_ms,
                ),
                start_ms: m(State::Time, s),
                time_ms: m(State::Time, s),
            }
        })
        .collect()
}
