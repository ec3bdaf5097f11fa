//! Per-spin update kernels applied once per fine time step.

/// Fine simulation step in ms. Every segment is integrated at this resolution,
/// independent of the recorded output step.
pub const FINE_STEP_MS: f64 = 0.001;

pub type Vector3 = [f64; 3];

/// Rotate `r` about the axis `p` by `|p|` radians.
///
/// `r` is split into the part parallel to `p`, which is left alone, and the
/// perpendicular part, which is rotated within its plane:
///
/// ```text
/// R1 = P (P.R) / |P|^2
/// R2 = R - R1
/// R3 = R2 cos|P|
/// R4 = (P x R2) sin|P| / |P|
/// R' = R1 + R3 + R4
/// ```
///
/// A zero rotation vector returns `r` unchanged.
#[inline]
pub fn rotate(r: Vector3, p: Vector3) -> Vector3 {
    let [rx, ry, rz] = r;
    let [px, py, pz] = p;

    let psqu = px * px + py * py + pz * pz;
    if psqu == 0.0 {
        return r;
    }
    let pmag = psqu.sqrt();

    let pdotr = px * rx + py * ry + pz * rz;
    let r1norm = pdotr / psqu;
    let cp = pmag.cos();
    let spn = if pmag > 0.0 { pmag.sin() / pmag } else { 1.0 };

    let r1x = px * r1norm;
    let r1y = py * r1norm;
    let r1z = pz * r1norm;

    let r2x = rx - r1x;
    let r2y = ry - r1y;
    let r2z = rz - r1z;

    let r3x = r2x * cp;
    let r3y = r2y * cp;
    let r3z = r2z * cp;

    let r4x = (py * r2z - pz * r2y) * spn;
    let r4y = (pz * r2x - px * r2z) * spn;
    let r4z = (px * r2y - py * r2x) * spn;

    [r1x + r3x + r4x, r1y + r3y + r4y, r1z + r3z + r4z]
}

/// Exponential T1 recovery and T2 decay over one [`FINE_STEP_MS`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relaxation {
    /// `M0 (1 - e1)`
    recovery: f64,
    e1: f64,
    e2: f64,
}

impl Relaxation {
    /// `crusher_tc_ms > 0` adds an extra transverse decay rate of `1 / Tc`.
    pub fn new(m0: f64, r1: f64, r2: f64, crusher_tc_ms: f64) -> Self {
        let r2c = if crusher_tc_ms > 0.0 {
            r2 + 1.0 / crusher_tc_ms
        } else {
            r2
        };
        let e1 = (-r1 * FINE_STEP_MS).exp();
        let e2 = (-r2c * FINE_STEP_MS).exp();
        Self {
            recovery: m0 * (1.0 - e1),
            e1,
            e2,
        }
    }

    #[inline]
    pub fn apply(&self, m: &mut Vector3) {
        m[2] = self.recovery + self.e1 * m[2];
        m[0] *= self.e2;
        m[1] *= self.e2;
    }
}
