//! Gradient and RF waveforms, resampled onto the fine simulation grid.

use std::fmt;

use ndarray::{Array1, Array2, ArrayD, ArrayView1, Ix1, Ix2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::kernel::FINE_STEP_MS;
use crate::params::RfEncoding;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveformRole {
    Gradient,
    Rf,
}

impl fmt::Display for WaveformRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveformRole::Gradient => write!(f, "gradient"),
            WaveformRole::Rf => write!(f, "RF"),
        }
    }
}

/// A waveform at its native sample count. Samples are spread evenly over the
/// segment, first sample at its start, last sample at its end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Waveform {
    /// One sample per point, applied to every channel.
    Shape(Array1<f64>),
    /// `(samples, channels)`: 3 gradient axes or 2 RF components.
    Channels(Array2<f64>),
}

impl Waveform {
    /// Accepts rank 1 or rank 2 arrays with at least one sample.
    pub fn from_array(role: WaveformRole, array: ArrayD<f64>) -> Result<Self, SimError> {
        let unsupported = |shape: &[usize]| SimError::UnsupportedWaveform {
            role,
            shape: shape.to_vec(),
        };
        if array.is_empty() {
            return Err(unsupported(array.shape()));
        }
        match array.ndim() {
            1 => Ok(Self::Shape(
                array
                    .into_dimensionality::<Ix1>()
                    .map_err(|_| unsupported(&[]))?,
            )),
            2 => Ok(Self::Channels(
                array
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| unsupported(&[]))?,
            )),
            _ => Err(unsupported(array.shape())),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Waveform::Shape(w) => w.shape().to_vec(),
            Waveform::Channels(w) => w.shape().to_vec(),
        }
    }

    fn unsupported(&self, role: WaveformRole) -> SimError {
        SimError::UnsupportedWaveform {
            role,
            shape: self.shape(),
        }
    }
}

/// Linear interpolation of `source` onto `len` evenly spaced points, both
/// parameterized over `[0, 1]`.
pub fn resample(source: ArrayView1<'_, f64>, len: usize) -> Array1<f64> {
    let n = source.len();
    match n {
        0 => Array1::zeros(len),
        1 => Array1::from_elem(len, source[0]),
        _ => Array1::from_shape_fn(len, |k| {
            let x = if len > 1 {
                k as f64 / (len - 1) as f64
            } else {
                0.0
            };
            let pos = x * (n - 1) as f64;
            let j = (pos.floor() as usize).min(n - 2);
            let frac = pos - j as f64;
            source[j] + (source[j + 1] - source[j]) * frac
        }),
    }
}

/// Per-axis gradient waveforms in mT/m, `len` fine steps long.
///
/// Without a source waveform the gradients are constant at `amplitude`.
pub fn gradient_waveforms(
    source: Option<&Waveform>,
    amplitude: [f64; 3],
    len: usize,
) -> Result<[Array1<f64>; 3], SimError> {
    let [ax, ay, az] = amplitude;
    let [gx, gy, gz] = match source {
        None => {
            let unit = Array1::ones(len);
            [unit.clone(), unit.clone(), unit]
        }
        Some(Waveform::Shape(w)) => {
            let shape = resample(w.view(), len);
            [shape.clone(), shape.clone(), shape]
        }
        Some(Waveform::Channels(w)) if w.ncols() == 3 => [
            resample(w.column(0), len),
            resample(w.column(1), len),
            resample(w.column(2), len),
        ],
        Some(other) => return Err(other.unsupported(WaveformRole::Gradient)),
    };
    Ok([gx * ax, gy * ay, gz * az])
}

/// Unit-amplitude RF shape as `x + i y`, `len` fine steps long.
///
/// Without a source waveform the shape is a constant block of 1.
pub fn rf_shape(
    source: Option<&Waveform>,
    encoding: RfEncoding,
    len: usize,
) -> Result<Array1<Complex64>, SimError> {
    match source {
        None => Ok(Array1::from_elem(len, Complex64::new(1.0, 0.0))),
        Some(Waveform::Shape(w)) => Ok(resample(w.view(), len).mapv(|m| Complex64::new(m, 0.0))),
        Some(Waveform::Channels(w)) if w.ncols() == 2 => {
            let rf0 = resample(w.column(0), len);
            let rf1 = resample(w.column(1), len);
            let shape = match encoding {
                RfEncoding::MagnitudePhaseDeg => Array1::from_shape_fn(len, |i| {
                    Complex64::from_polar(rf0[i], rf1[i].to_radians())
                }),
                RfEncoding::MagnitudePhaseRad => {
                    Array1::from_shape_fn(len, |i| Complex64::from_polar(rf0[i], rf1[i]))
                }
                RfEncoding::MagnitudeFrequency => {
                    // phase is the running integral of the frequency in kHz
                    let mut phase = 0.0;
                    Array1::from_shape_fn(len, |i| {
                        phase += 2.0 * std::f64::consts::PI * FINE_STEP_MS * rf1[i];
                        Complex64::from_polar(rf0[i], phase)
                    })
                }
                RfEncoding::Cartesian => {
                    Array1::from_shape_fn(len, |i| Complex64::new(rf0[i], rf1[i]))
                }
            };
            Ok(shape)
        }
        Some(other) => Err(other.unsupported(WaveformRole::Rf)),
    }
}

/// Magnitude of the mean of a unit RF shape: the fraction of a block pulse's
/// on-resonance flip this shape produces. An empty shape counts as a block.
pub fn coherent_average(shape: &Array1<Complex64>) -> f64 {
    if shape.is_empty() {
        return 1.0;
    }
    (shape.sum() / shape.len() as f64).norm()
}

/// Scale a unit RF shape to `magnitude_ut` and rotate it by `phase_deg`.
/// The result is in mT.
pub fn scale_rf(shape: &Array1<Complex64>, magnitude_ut: f64, phase_deg: f64) -> Array1<Complex64> {
    let carrier = Complex64::from_polar(0.001 * magnitude_ut, phase_deg.to_radians());
    shape.mapv(|w| carrier * w)
}
