//! Shared setup for the integration tests

#![allow(dead_code)]

use spinsim::ensemble::State;
use spinsim::{AbortReason, AxisRange, SpinEnsemble, SpinGenerator, StartingSpins};

pub const GAMMA: f64 = 42.577;

/// Message sink that accepts everything.
pub fn quiet(_: String) -> Result<(), AbortReason> {
    Ok(())
}

/// One spin at the origin with dt = 50 us. A relaxation time of 0 disables it.
pub fn single_spin(start: StartingSpins, t1_ms: f64, t2_ms: f64) -> SpinEnsemble {
    SpinGenerator {
        starting_spins: start,
        t1_ms: AxisRange::constant(t1_ms),
        t2_ms: AxisRange::constant(t2_ms),
        ..Default::default()
    }
    .generate()
    .unwrap()
}

pub fn final_m(ensemble: &SpinEnsemble, spin: usize) -> [f64; 3] {
    let state = ensemble.final_state();
    [State::Mx, State::My, State::Mz].map(|field| state[[field as usize, spin]])
}

pub fn norm(m: [f64; 3]) -> f64 {
    m.iter().map(|x| x * x).sum::<f64>().sqrt()
}
