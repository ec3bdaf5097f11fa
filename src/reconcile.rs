//! Keeps RF amplitude and flip angle consistent for a segment.
//!
//! `flip_deg = 360 * gamma * <w> * duration_ms * magnitude_ut / 1000`, where
//! `<w>` is the [coherent average](crate::waveform::coherent_average) of the
//! unit RF shape.

use crate::params::{RfAuthority, RfDrive};

/// Round a requested duration to a whole number (at least one) of recorded
/// steps of `dt_ms`.
pub fn snap_duration(duration_ms: f64, dt_ms: f64) -> f64 {
    (duration_ms / dt_ms).round().max(1.0) * dt_ms
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reconciler {
    /// Flip angle in degrees per uT of RF amplitude.
    deg_per_ut: f64,
}

impl Reconciler {
    pub fn new(gamma: f64, average: f64, duration_ms: f64) -> Self {
        Self {
            deg_per_ut: 360.0 * gamma * average * duration_ms / 1000.0,
        }
    }

    pub fn flip_deg(&self, magnitude_ut: f64) -> f64 {
        self.deg_per_ut * magnitude_ut
    }

    /// `None` when the pulse can't flip anything (zero gamma, shape area or
    /// duration), so no amplitude reaches the requested angle.
    pub fn magnitude_ut(&self, flip_deg: f64) -> Option<f64> {
        let magnitude = flip_deg / self.deg_per_ut;
        magnitude.is_finite().then_some(magnitude)
    }

    /// Derive the non-authoritative half of `drive`. If the flip angle is
    /// authoritative but unreachable, the magnitude is left as it was.
    pub fn reconcile(&self, drive: RfDrive) -> RfDrive {
        match drive.authority {
            RfAuthority::Magnitude => RfDrive {
                flip_deg: self.flip_deg(drive.magnitude_ut),
                ..drive
            },
            RfAuthority::FlipAngle => match self.magnitude_ut(drive.flip_deg) {
                Some(magnitude_ut) => RfDrive {
                    magnitude_ut,
                    ..drive
                },
                None => {
                    log::warn!(
                        "flip angle {} deg is unreachable with this RF shape, keeping {} uT",
                        drive.flip_deg,
                        drive.magnitude_ut
                    );
                    drive
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const GAMMA: f64 = 42.577;

    #[test]
    fn snap_rounds_to_recorded_steps() {
        assert_relative_eq!(snap_duration(1.0, 0.05), 1.0);
        assert_relative_eq!(snap_duration(1.02, 0.05), 1.0);
        assert_relative_eq!(snap_duration(1.03, 0.05), 1.05);
        assert_relative_eq!(snap_duration(0.01, 0.05), 0.05);
    }

    #[test]
    fn ninety_degree_block() {
        let reconciler = Reconciler::new(GAMMA, 1.0, 1.0);
        let drive = reconciler.reconcile(RfDrive::flip_angle(90.0));
        assert_relative_eq!(drive.magnitude_ut, 90.0 / (0.36 * GAMMA), max_relative = 1e-12);
        assert_eq!(drive.flip_deg, 90.0);
        assert_eq!(drive.authority, RfAuthority::FlipAngle);
    }

    #[test]
    fn magnitude_authority_updates_flip() {
        let reconciler = Reconciler::new(GAMMA, 0.5, 2.0);
        let drive = reconciler.reconcile(RfDrive::magnitude(10.0));
        assert_relative_eq!(drive.flip_deg, 360.0 * GAMMA * 0.5 * 2.0 * 10.0 / 1000.0);
        assert_eq!(drive.magnitude_ut, 10.0);
    }

    #[test]
    fn unreachable_flip_keeps_magnitude() {
        let reconciler = Reconciler::new(GAMMA, 0.0, 1.0);
        let drive = RfDrive {
            magnitude_ut: 3.0,
            flip_deg: 45.0,
            authority: RfAuthority::FlipAngle,
        };
        assert_eq!(reconciler.reconcile(drive), drive);
        assert_eq!(reconciler.magnitude_ut(0.0), None);
    }

    proptest! {
        #[test]
        fn magnitude_flip_round_trip(
            magnitude in 0.0f64..50.0,
            average in 0.01f64..1.0,
            duration in 0.01f64..20.0,
            gamma in 1.0f64..50.0,
        ) {
            let reconciler = Reconciler::new(gamma, average, duration);
            let flip = reconciler.reconcile(RfDrive::magnitude(magnitude)).flip_deg;
            let back = reconciler.reconcile(RfDrive::flip_angle(flip)).magnitude_ut;
            prop_assert!((back - magnitude).abs() <= 1e-9 * (1.0 + magnitude));
        }
    }
}
