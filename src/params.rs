//! Configuration of a single simulation segment.

use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;

/// Shortest segment accepted, in ms.
pub const MIN_DURATION_MS: f64 = 0.01;

/// How the two columns of a rank 2 RF waveform are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfEncoding {
    /// Magnitude and phase in degrees
    MagnitudePhaseDeg,
    /// Magnitude and phase in radians
    MagnitudePhaseRad,
    /// Magnitude and frequency in kHz
    MagnitudeFrequency,
    /// RFx and RFy
    #[default]
    Cartesian,
}

impl RfEncoding {
    pub const ALL: [RfEncoding; 4] = [
        RfEncoding::MagnitudePhaseDeg,
        RfEncoding::MagnitudePhaseRad,
        RfEncoding::MagnitudeFrequency,
        RfEncoding::Cartesian,
    ];

    /// Position of the mode in the selector, as used by `"RF Waveform"`.
    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Which of the two RF settings was set by the caller; the other one is
/// derived from it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfAuthority {
    Magnitude,
    #[default]
    FlipAngle,
}

/// RF amplitude and on-resonance flip angle, kept consistent by
/// [`crate::reconcile::Reconciler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RfDrive {
    pub magnitude_ut: f64,
    pub flip_deg: f64,
    pub authority: RfAuthority,
}

impl RfDrive {
    pub fn magnitude(magnitude_ut: f64) -> Self {
        Self {
            magnitude_ut,
            flip_deg: 0.0,
            authority: RfAuthority::Magnitude,
        }
    }

    pub fn flip_angle(flip_deg: f64) -> Self {
        Self {
            magnitude_ut: 0.0,
            flip_deg,
            authority: RfAuthority::FlipAngle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParameters {
    pub duration_ms: f64,
    /// Gradient amplitudes in mT/m; an external waveform is multiplied by these.
    pub gradient: [f64; 3],
    pub rf: RfDrive,
    pub rf_phase_deg: f64,
    /// Extra transverse decay `exp(-t/Tc)` during this segment, off when 0.
    pub crusher_tc_ms: f64,
    pub rf_encoding: RfEncoding,
}

impl Default for SegmentParameters {
    fn default() -> Self {
        Self {
            duration_ms: 1.0,
            gradient: [0.0; 3],
            rf: RfDrive::default(),
            rf_phase_deg: 0.0,
            crusher_tc_ms: 0.0,
            rf_encoding: RfEncoding::default(),
        }
    }
}

impl SegmentParameters {
    pub fn validate(&self) -> Result<(), PreconditionError> {
        let invalid = |name, value| Err(PreconditionError::InvalidParameter { name, value });

        if !(self.duration_ms.is_finite() && self.duration_ms >= MIN_DURATION_MS) {
            return invalid("duration_ms", self.duration_ms);
        }
        if !(self.crusher_tc_ms.is_finite() && self.crusher_tc_ms >= 0.0) {
            return invalid("crusher_tc_ms", self.crusher_tc_ms);
        }
        if let Some(&g) = self.gradient.iter().find(|g| !g.is_finite()) {
            return invalid("gradient", g);
        }
        if !self.rf_phase_deg.is_finite() {
            return invalid("rf_phase_deg", self.rf_phase_deg);
        }
        match self.rf.authority {
            RfAuthority::Magnitude
                if !(self.rf.magnitude_ut.is_finite() && self.rf.magnitude_ut >= 0.0) =>
            {
                invalid("rf_magnitude_ut", self.rf.magnitude_ut)
            }
            RfAuthority::FlipAngle if !self.rf.flip_deg.is_finite() => {
                invalid("rf_flip_deg", self.rf.flip_deg)
            }
            _ => Ok(()),
        }
    }

    /// Apply values forwarded from an upstream pulse designer.
    pub fn with_overrides(mut self, overrides: &SegmentOverrides) -> Self {
        if let Some(duration) = overrides.duration_ms {
            self.duration_ms = duration;
        }
        if let Some(gz) = overrides.gz {
            self.gradient[2] = gz;
        }
        if let Some(magnitude) = overrides.rf_magnitude_ut {
            self.rf.magnitude_ut = magnitude;
            self.rf.authority = RfAuthority::Magnitude;
        }
        if let Some(flip) = overrides.rf_flip_deg {
            self.rf.flip_deg = flip;
            self.rf.authority = RfAuthority::FlipAngle;
        }
        if overrides.rf_has_fm_shape == Some(true) {
            self.rf_encoding = RfEncoding::MagnitudeFrequency;
        }
        self
    }
}

/// Recognized keys of the optional parameter input of a segment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentOverrides {
    pub duration_ms: Option<f64>,
    pub gz: Option<f64>,
    pub rf_magnitude_ut: Option<f64>,
    pub rf_flip_deg: Option<f64>,
    pub rf_has_fm_shape: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_index_follows_selector_order() {
        assert_eq!(RfEncoding::from_index(0), Some(RfEncoding::MagnitudePhaseDeg));
        assert_eq!(RfEncoding::from_index(2), Some(RfEncoding::MagnitudeFrequency));
        assert_eq!(RfEncoding::from_index(3), Some(RfEncoding::Cartesian));
        assert_eq!(RfEncoding::from_index(4), None);
        assert_eq!(RfEncoding::from_index(-1), None);
    }

    #[test]
    fn defaults_are_valid() {
        let params = SegmentParameters::default();
        assert_eq!(params.duration_ms, 1.0);
        assert_eq!(params.rf_encoding, RfEncoding::Cartesian);
        params.validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let short = SegmentParameters {
            duration_ms: 0.001,
            ..Default::default()
        };
        assert!(short.validate().is_err());

        let negative_crusher = SegmentParameters {
            crusher_tc_ms: -1.0,
            ..Default::default()
        };
        assert!(negative_crusher.validate().is_err());

        let negative_rf = SegmentParameters {
            rf: RfDrive::magnitude(-3.0),
            ..Default::default()
        };
        assert!(negative_rf.validate().is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let params = SegmentParameters {
            rf: RfDrive::magnitude(5.0),
            gradient: [1.0, 2.0, 3.0],
            ..Default::default()
        };
        let overrides = SegmentOverrides {
            duration_ms: Some(2.5),
            gz: Some(-4.0),
            rf_flip_deg: Some(30.0),
            rf_has_fm_shape: Some(true),
            ..Default::default()
        };
        let merged = params.with_overrides(&overrides);

        assert_eq!(merged.duration_ms, 2.5);
        assert_eq!(merged.gradient, [1.0, 2.0, -4.0]);
        assert_eq!(merged.rf.authority, RfAuthority::FlipAngle);
        assert_eq!(merged.rf.flip_deg, 30.0);
        assert_eq!(merged.rf.magnitude_ut, 5.0);
        assert_eq!(merged.rf_encoding, RfEncoding::MagnitudeFrequency);
    }

    #[test]
    fn empty_overrides_change_nothing() {
        let params = SegmentParameters::default();
        assert_eq!(
            params.clone().with_overrides(&SegmentOverrides::default()),
            params
        );
    }
}
