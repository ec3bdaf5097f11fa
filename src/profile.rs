//! Read-only views of a simulated ensemble: signal traces and the pulse
//! diagram of the fields that were applied.

use ndarray::{Array1, Array2, Axis, s};
use serde::{Deserialize, Serialize};

use crate::ensemble::{SpinEnsemble, State};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    Mx,
    My,
    Mz,
    /// `|Mx + i My|`
    Transverse,
    /// `|M|`
    Magnitude,
}

impl Component {
    fn of(self, m: [f64; 3]) -> f64 {
        let [x, y, z] = m;
        match self {
            Component::Mx => x,
            Component::My => y,
            Component::Mz => z,
            Component::Transverse => x.hypot(y),
            Component::Magnitude => (x * x + y * y + z * z).sqrt(),
        }
    }
}

/// Column order of [`SpinEnsemble::pulse_diagram`].
pub const PULSE_DIAGRAM_COLUMNS: [&str; 6] = ["t (ms)", "Gx", "Gy", "Gz", "RFx (uT)", "RFy (uT)"];

impl SpinEnsemble {
    /// Time of every state row in ms.
    pub fn time_axis(&self) -> Array1<f64> {
        self.history()
            .slice(s![1.., State::Time as usize, 0])
            .to_owned()
    }

    /// One component of one spin over every state row, `None` if `spin` is
    /// out of range.
    pub fn trace(&self, spin: usize, component: Component) -> Option<Array1<f64>> {
        if spin >= self.spin_count() {
            return None;
        }
        let history = self.history();
        let states = history.slice(s![1.., .., spin]);
        Some(
            states
                .axis_iter(Axis(0))
                .map(|row| {
                    component.of([
                        row[State::Mx as usize],
                        row[State::My as usize],
                        row[State::Mz as usize],
                    ])
                })
                .collect(),
        )
    }

    /// Signal of the whole ensemble: the component of the mean magnetization.
    pub fn mean_trace(&self, component: Component) -> Array1<f64> {
        let history = self.history();
        let states = history.slice(s![1.., ..=State::Mz as usize, ..]);
        states
            .axis_iter(Axis(0))
            .map(|row| {
                let mean = |field: State| row.row(field as usize).mean().unwrap_or(0.0);
                component.of([mean(State::Mx), mean(State::My), mean(State::Mz)])
            })
            .collect()
    }

    /// Applied fields per state row, see [`PULSE_DIAGRAM_COLUMNS`]. RF is
    /// converted from mT to uT.
    pub fn pulse_diagram(&self) -> Array2<f64> {
        let history = self.history();
        let states = history.slice(s![1.., .., 0]);
        let mut diagram = Array2::zeros((states.nrows(), PULSE_DIAGRAM_COLUMNS.len()));
        for (mut out, row) in diagram.outer_iter_mut().zip(states.outer_iter()) {
            out[0] = row[State::Time as usize];
            out[1] = row[State::Gx as usize];
            out[2] = row[State::Gy as usize];
            out[3] = row[State::Gz as usize];
            out[4] = 1000.0 * row[State::RFx as usize];
            out[5] = 1000.0 * row[State::RFy as usize];
        }
        diagram
    }
}
