//! The spin ensemble: per-spin constants plus the recorded history of every
//! spin's magnetization, position and the fields applied to it.
//!
//! Externally the ensemble is the 11-axis tensor
//! `(13, T, n_T1, n_T2, n_Fq, n_X, n_Y, n_Z, n_Vx, n_Vy, n_Vz)`. Internally
//! the history is stored as rows of shape `(field, spin)` stacked along the
//! time axis, so a segment only ever appends.

use ndarray::{
    Array, Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, Dimension, IxDyn, s,
};
use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;
use crate::kernel::FINE_STEP_MS;

/// Length of the field axis (axis 0 of the tensor).
pub const FIELD_COUNT: usize = 13;
/// Number of spin parameter axes (axes 2-10 of the tensor).
pub const SPIN_AXES: usize = 9;
pub const TENSOR_RANK: usize = 2 + SPIN_AXES;

/// Field slots of the constants row (time slot 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constant {
    M0 = 0,
    /// 1/T1 in 1/ms, 0 for no recovery
    R1,
    /// 1/T2 in 1/ms, 0 for no decay
    R2,
    /// m/ms
    Vx,
    Vy,
    Vz,
    /// Off-resonance in kHz
    Fq,
    Dx,
    Dy,
    Dz,
    /// Recorded output step in ms
    Dt,
    /// kHz/mT
    Gamma,
    Reserved,
}

/// Field slots of every recorded row (time slot >= 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Mx = 0,
    My,
    Mz,
    /// m
    X,
    Y,
    Z,
    /// Elapsed time in ms
    Time,
    /// mT/m
    Gx,
    Gy,
    Gz,
    /// mT
    RFx,
    RFy,
    /// Crusher time constant in ms, 0 when off
    Tc,
}

/// Spin parameter axes, in tensor order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpinAxis {
    T1 = 0,
    T2,
    Fq,
    X,
    Y,
    Z,
    Vx,
    Vy,
    Vz,
}

impl SpinAxis {
    pub const ALL: [SpinAxis; SPIN_AXES] = [
        SpinAxis::T1,
        SpinAxis::T2,
        SpinAxis::Fq,
        SpinAxis::X,
        SpinAxis::Y,
        SpinAxis::Z,
        SpinAxis::Vx,
        SpinAxis::Vy,
        SpinAxis::Vz,
    ];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpinEnsemble {
    spin_shape: [usize; SPIN_AXES],
    /// `(time, field, spin)`; time slot 0 holds the constants
    history: Array3<f64>,
}

impl SpinEnsemble {
    /// Build an ensemble from its constants row and its starting state,
    /// both of shape `(FIELD_COUNT, spin_count)`.
    pub fn new(
        spin_shape: [usize; SPIN_AXES],
        constants: Array2<f64>,
        initial: Array2<f64>,
    ) -> Result<Self, PreconditionError> {
        let spins: usize = spin_shape.iter().product();
        if spins == 0 {
            return Err(PreconditionError::EmptySpinAxis);
        }
        for row in [&constants, &initial] {
            if row.nrows() != FIELD_COUNT {
                return Err(PreconditionError::FieldCount {
                    expected: FIELD_COUNT,
                    found: row.nrows(),
                });
            }
        }

        let mut history = Array3::zeros((0, FIELD_COUNT, spins));
        history.push(Axis(0), constants.view())?;
        history.push(Axis(0), initial.view())?;
        Self::from_parts(spin_shape, history)
    }

    /// Convert the 11-axis tensor into an ensemble, checking its layout.
    pub fn from_tensor(tensor: &ArrayD<f64>) -> Result<Self, PreconditionError> {
        let shape = tensor.shape();
        if shape.len() != TENSOR_RANK {
            return Err(PreconditionError::Rank {
                expected: TENSOR_RANK,
                found: shape.len(),
            });
        }
        if shape[0] != FIELD_COUNT {
            return Err(PreconditionError::FieldCount {
                expected: FIELD_COUNT,
                found: shape[0],
            });
        }
        let slots = shape[1];
        let mut spin_shape = [0; SPIN_AXES];
        spin_shape.copy_from_slice(&shape[2..]);
        let spins: usize = spin_shape.iter().product();

        let fields_first = tensor
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((FIELD_COUNT, slots, spins))?;
        let history = fields_first
            .permuted_axes([1, 0, 2])
            .as_standard_layout()
            .into_owned();

        Self::from_parts(spin_shape, history)
    }

    pub(crate) fn from_parts(
        spin_shape: [usize; SPIN_AXES],
        history: Array3<f64>,
    ) -> Result<Self, PreconditionError> {
        let (slots, fields, spins) = history.dim();
        if fields != FIELD_COUNT {
            return Err(PreconditionError::FieldCount {
                expected: FIELD_COUNT,
                found: fields,
            });
        }
        if spins == 0 || spins != spin_shape.iter().product::<usize>() {
            return Err(PreconditionError::EmptySpinAxis);
        }
        if slots < 2 {
            return Err(PreconditionError::MissingState(slots));
        }
        let ensemble = Self {
            spin_shape,
            history,
        };
        ensemble.check_constants()?;
        Ok(ensemble)
    }

    pub(crate) fn into_parts(self) -> ([usize; SPIN_AXES], Array3<f64>) {
        (self.spin_shape, self.history)
    }

    /// The 11-axis tensor view of the whole history.
    pub fn to_tensor(&self) -> ArrayD<f64> {
        let mut shape = vec![FIELD_COUNT, self.slots()];
        shape.extend(self.spin_shape);
        Array::from_shape_fn(IxDyn(&shape), |index| {
            let spin = ravel(&self.spin_shape, &index.slice()[2..]);
            self.history[[index[1], index[0], spin]]
        })
    }

    pub fn spin_shape(&self) -> [usize; SPIN_AXES] {
        self.spin_shape
    }

    pub fn spin_count(&self) -> usize {
        self.history.len_of(Axis(2))
    }

    /// Number of time slots, including the constants slot.
    pub fn slots(&self) -> usize {
        self.history.len_of(Axis(0))
    }

    /// Number of state rows (the initial state plus every recorded step).
    pub fn recorded_steps(&self) -> usize {
        self.slots() - 1
    }

    pub fn history(&self) -> ArrayView3<'_, f64> {
        self.history.view()
    }

    /// Constants row, shape `(FIELD_COUNT, spin_count)`.
    pub fn constants(&self) -> ArrayView2<'_, f64> {
        self.history.slice(s![0, .., ..])
    }

    pub fn constant(&self, field: Constant) -> ArrayView1<'_, f64> {
        self.history.slice(s![0, field as usize, ..])
    }

    /// State row at `slot` (>= 1), shape `(FIELD_COUNT, spin_count)`.
    pub fn state(&self, slot: usize) -> Option<ArrayView2<'_, f64>> {
        (1..self.slots())
            .contains(&slot)
            .then(|| self.history.slice(s![slot, .., ..]))
    }

    /// The state a following segment starts from.
    pub fn final_state(&self) -> ArrayView2<'_, f64> {
        self.history.slice(s![self.slots() - 1, .., ..])
    }

    pub fn dt_ms(&self) -> f64 {
        self.history[[0, Constant::Dt as usize, 0]]
    }

    pub fn gamma(&self) -> f64 {
        self.history[[0, Constant::Gamma as usize, 0]]
    }

    /// Flat spin index of a per-axis index, `None` if out of range.
    pub fn spin_index(&self, index: [usize; SPIN_AXES]) -> Option<usize> {
        index
            .iter()
            .zip(&self.spin_shape)
            .all(|(i, n)| i < n)
            .then(|| ravel(&self.spin_shape, &index))
    }

    /// Append recorded rows of shape `(steps, FIELD_COUNT, spin_count)`.
    pub(crate) fn append(&mut self, rows: ArrayView3<'_, f64>) -> Result<(), PreconditionError> {
        self.history.append(Axis(0), rows)?;
        Ok(())
    }

    fn check_constants(&self) -> Result<(), PreconditionError> {
        // dt has to be a whole number (at least one) of fine steps
        let dt = self.dt_ms();
        let substeps = dt / FINE_STEP_MS;
        if !(dt.is_finite() && substeps >= 0.5 && (substeps - substeps.round()).abs() < 1e-6) {
            return Err(PreconditionError::InvalidConstant { name: "dt", value: dt });
        }
        let gamma = self.gamma();
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(PreconditionError::InvalidConstant {
                name: "gamma",
                value: gamma,
            });
        }
        for (field, name) in [(Constant::Dt, "dt"), (Constant::Gamma, "gamma")] {
            let first = self.history[[0, field as usize, 0]];
            if self.constant(field).iter().any(|&x| x != first) {
                return Err(PreconditionError::NonUniformConstant { name });
            }
        }
        for (field, name) in [(Constant::R1, "R1"), (Constant::R2, "R2")] {
            if let Some(&rate) = self.constant(field).iter().find(|&&r| !(r >= 0.0)) {
                return Err(PreconditionError::InvalidConstant { name, value: rate });
            }
        }
        Ok(())
    }
}

/// Row-major flat index over the spin axes.
pub(crate) fn ravel(spin_shape: &[usize; SPIN_AXES], index: &[usize]) -> usize {
    index
        .iter()
        .zip(spin_shape)
        .fold(0, |flat, (&i, &n)| flat * n + i)
}

/// Inverse of [`ravel`].
pub(crate) fn unravel(spin_shape: &[usize; SPIN_AXES], mut flat: usize) -> [usize; SPIN_AXES] {
    let mut index = [0; SPIN_AXES];
    for (axis, &n) in spin_shape.iter().enumerate().rev() {
        index[axis] = flat % n;
        flat /= n;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_spin_tensor(slots: usize) -> ArrayD<f64> {
        let mut shape = vec![FIELD_COUNT, slots, 2];
        shape.extend([1; SPIN_AXES - 1]);
        let mut tensor = ArrayD::zeros(IxDyn(&shape));
        for spin in 0..2 {
            let mut index = vec![0; TENSOR_RANK];
            index[2] = spin;
            index[0] = Constant::M0 as usize;
            tensor[&index[..]] = 1.0;
            index[0] = Constant::R1 as usize;
            tensor[&index[..]] = 0.001 * (spin + 1) as f64;
            index[0] = Constant::Dt as usize;
            tensor[&index[..]] = 0.05;
            index[0] = Constant::Gamma as usize;
            tensor[&index[..]] = 42.577;
            for slot in 1..slots {
                index[1] = slot;
                index[0] = State::Mz as usize;
                tensor[&index[..]] = slot as f64 + spin as f64 * 0.5;
                index[1] = 0;
            }
        }
        tensor
    }

    #[test]
    fn tensor_conversion_preserves_layout() {
        let tensor = two_spin_tensor(3);
        let ensemble = SpinEnsemble::from_tensor(&tensor).unwrap();

        assert_eq!(ensemble.spin_count(), 2);
        assert_eq!(ensemble.slots(), 3);
        assert_eq!(ensemble.dt_ms(), 0.05);
        assert_eq!(ensemble.gamma(), 42.577);
        assert_eq!(ensemble.constant(Constant::R1).to_vec(), vec![0.001, 0.002]);
        assert_eq!(ensemble.final_state()[[State::Mz as usize, 1]], 2.5);
        assert_eq!(ensemble.to_tensor(), tensor);
    }

    #[test]
    fn rejects_wrong_rank_and_field_count() {
        let flat = ArrayD::<f64>::zeros(IxDyn(&[FIELD_COUNT, 2, 4]));
        assert!(matches!(
            SpinEnsemble::from_tensor(&flat),
            Err(PreconditionError::Rank { found: 3, .. })
        ));

        let mut shape = vec![12, 2];
        shape.extend([1; SPIN_AXES]);
        let short = ArrayD::<f64>::zeros(IxDyn(&shape));
        assert!(matches!(
            SpinEnsemble::from_tensor(&short),
            Err(PreconditionError::FieldCount { found: 12, .. })
        ));
    }

    #[test]
    fn rejects_missing_state_and_bad_constants() {
        let constants_only = two_spin_tensor(1);
        assert!(matches!(
            SpinEnsemble::from_tensor(&constants_only),
            Err(PreconditionError::MissingState(1))
        ));

        let mut tensor = two_spin_tensor(2);
        let mut index = vec![0; TENSOR_RANK];
        index[0] = Constant::Dt as usize;
        index[2] = 1;
        tensor[&index[..]] = 0.1;
        assert!(matches!(
            SpinEnsemble::from_tensor(&tensor),
            Err(PreconditionError::NonUniformConstant { name: "dt" })
        ));

        for dt in [0.0, 0.0004, 0.0015, f64::NAN] {
            let mut tensor = two_spin_tensor(2);
            let mut index = vec![0; TENSOR_RANK];
            index[0] = Constant::Dt as usize;
            for spin in 0..2 {
                index[2] = spin;
                tensor[&index[..]] = dt;
            }
            assert!(matches!(
                SpinEnsemble::from_tensor(&tensor),
                Err(PreconditionError::InvalidConstant { name: "dt", .. })
            ));
        }

        let mut tensor = two_spin_tensor(2);
        index[0] = Constant::R2 as usize;
        tensor[&index[..]] = -1.0;
        assert!(matches!(
            SpinEnsemble::from_tensor(&tensor),
            Err(PreconditionError::InvalidConstant { name: "R2", .. })
        ));
    }

    #[test]
    fn ravel_round_trips() {
        let shape = [2, 1, 3, 1, 1, 4, 1, 1, 2];
        let total: usize = shape.iter().product();
        for flat in 0..total {
            assert_eq!(ravel(&shape, &unravel(&shape, flat)), flat);
        }
        assert_eq!(unravel(&shape, total - 1), [1, 0, 2, 0, 0, 3, 0, 0, 1]);
    }

    #[test]
    fn append_grows_time_axis() {
        let mut ensemble = SpinEnsemble::from_tensor(&two_spin_tensor(2)).unwrap();
        let rows = Array3::from_elem((4, FIELD_COUNT, 2), 7.0);
        ensemble.append(rows.view()).unwrap();
        assert_eq!(ensemble.slots(), 6);
        assert_eq!(ensemble.recorded_steps(), 5);
        assert_eq!(ensemble.final_state()[[State::Tc as usize, 0]], 7.0);
        assert!(ensemble.state(0).is_none());
        assert!(ensemble.state(5).is_some());
        assert!(ensemble.state(6).is_none());
    }
}
