//! Tool functions operating on [`ValueDict`]s, for hosts that wire spin
//! ensembles and waveforms between nodes by name.
//!
//! - [`bloch`]: run one segment on `"M_in"` and return `"M_out"`
//! - [`spyn`]: build a starting ensemble and return it as `"out"`

use ndarray::ArrayD;

use crate::engine::simulate;
use crate::ensemble::{SpinAxis, SpinEnsemble};
use crate::error::{ErrorKind, LookupError, SimError, ToolError};
use crate::generator::{AxisRange, SpinGenerator, StartingSpins};
use crate::params::{RfAuthority, RfDrive, RfEncoding, SegmentOverrides, SegmentParameters};
use crate::value::ValueDict;
use crate::waveform::{Waveform, WaveformRole};
use crate::{MessageFn, ToolFn};

pub const M_IN: &str = "M_in";
pub const G_IN: &str = "G_in";
pub const RF_IN: &str = "RF_in";
pub const PARS_IN: &str = "Pars_in";
pub const M_OUT: &str = "M_out";

pub const DURATION: &str = "Duration (ms)";
pub const GX: &str = "Gx (mT/m)";
pub const GY: &str = "Gy (mT/m)";
pub const GZ: &str = "Gz (mT/m)";
pub const RF_MAG: &str = "RF Mag (uT)";
pub const RF_FLIP: &str = "RF Flip (deg)";
pub const RF_PHASE: &str = "RF Phase (deg)";
pub const CRUSHER_TC: &str = "Crusher Tc (ms)";
pub const RF_WAVEFORM: &str = "RF Waveform";
/// Name of the RF widget the user touched last, either [`RF_MAG`] or
/// [`RF_FLIP`]. Without it the flip angle wins.
pub const LAST_EDITED: &str = "Last edited";
/// Only recognized inside `"Pars_in"`.
pub const FM_SHAPE: &str = "RF waveform has FM shape";

pub const STARTING_SPINS: &str = "Starting Spins";
pub const T0: &str = "T0 (ms)";
pub const DT_US: &str = "dt (us)";
pub const OUT: &str = "out";
pub const AXIS_KEYS: [(SpinAxis, &str); 9] = [
    (SpinAxis::T1, "T1 (ms)"),
    (SpinAxis::T2, "T2 (ms)"),
    (SpinAxis::Fq, "Fq (Hz)"),
    (SpinAxis::X, "X0 (mm)"),
    (SpinAxis::Y, "Y0 (mm)"),
    (SpinAxis::Z, "Z0 (mm)"),
    (SpinAxis::Vx, "Vx (cm/s)"),
    (SpinAxis::Vy, "Vy (cm/s)"),
    (SpinAxis::Vz, "Vz (cm/s)"),
];

pub const TOOLS: [(&str, ToolFn); 2] = [("bloch", bloch), ("spyn", spyn)];

pub fn tool_by_name(name: &str) -> Option<ToolFn> {
    TOOLS
        .iter()
        .find(|(tool, _)| *tool == name)
        .map(|&(_, tool)| tool)
}

fn pop_f64(input: &mut ValueDict, key: &'static str) -> Result<Option<f64>, ToolError> {
    input.pop_opt(key).map_err(ToolError::input(key))
}

fn invalid(key: &'static str, reason: &'static str) -> ToolError {
    ToolError::input(key)(LookupError::InvalidValue(reason))
}

/// Simulate one segment.
///
/// Widget values not present in `input` keep their defaults. If a waveform
/// can't be used, the problem is reported through `send_msg` and `"M_in"` is
/// returned unchanged as `"M_out"`.
pub fn bloch(mut input: ValueDict, send_msg: &mut MessageFn<'_>) -> Result<ValueDict, ToolError> {
    let m_in: ArrayD<f64> = input.pop(M_IN).map_err(ToolError::input(M_IN))?;
    let g_in: Option<ArrayD<f64>> = input.pop_opt(G_IN).map_err(ToolError::input(G_IN))?;
    let rf_in: Option<ArrayD<f64>> = input.pop_opt(RF_IN).map_err(ToolError::input(RF_IN))?;
    let overrides = match input.pop_opt(PARS_IN).map_err(ToolError::input(PARS_IN))? {
        Some(pars) => segment_overrides(pars)?,
        None => SegmentOverrides::default(),
    };
    let params = segment_parameters(&mut input)?.with_overrides(&overrides);
    if !input.0.is_empty() {
        log::debug!("ignoring unknown inputs {:?}", input.0.keys());
    }

    let mut ensemble = SpinEnsemble::from_tensor(&m_in).map_err(SimError::from)?;
    let result = match waveforms(g_in, rf_in) {
        Ok((gradient, rf)) => {
            simulate(&mut ensemble, &params, gradient.as_ref(), rf.as_ref(), send_msg)
        }
        Err(err) => Err(err),
    };

    let (m_out, params) = match result {
        Ok(simulated) => (ensemble.to_tensor(), simulated),
        Err(err) if err.kind() == ErrorKind::Configuration => {
            log::warn!("segment skipped: {err}");
            send_msg(format!("{err}, passing {M_IN} through unchanged"))?;
            (m_in, params)
        }
        Err(err) => return Err(err.into()),
    };

    let mut output = ValueDict::new();
    output.insert(M_OUT, m_out);
    output.insert(DURATION, params.duration_ms);
    output.insert(RF_MAG, params.rf.magnitude_ut);
    output.insert(RF_FLIP, params.rf.flip_deg);
    Ok(output)
}

fn waveforms(
    gradient: Option<ArrayD<f64>>,
    rf: Option<ArrayD<f64>>,
) -> Result<(Option<Waveform>, Option<Waveform>), SimError> {
    let gradient = gradient
        .map(|array| Waveform::from_array(WaveformRole::Gradient, array))
        .transpose()?;
    let rf = rf
        .map(|array| Waveform::from_array(WaveformRole::Rf, array))
        .transpose()?;
    Ok((gradient, rf))
}

fn segment_parameters(input: &mut ValueDict) -> Result<SegmentParameters, ToolError> {
    let mut params = SegmentParameters::default();
    if let Some(duration) = pop_f64(input, DURATION)? {
        params.duration_ms = duration;
    }
    for (axis, key) in [GX, GY, GZ].into_iter().enumerate() {
        if let Some(g) = pop_f64(input, key)? {
            params.gradient[axis] = g;
        }
    }

    let magnitude = pop_f64(input, RF_MAG)?;
    let flip = pop_f64(input, RF_FLIP)?;
    let last_edited: Option<String> = input
        .pop_opt(LAST_EDITED)
        .map_err(ToolError::input(LAST_EDITED))?;
    params.rf = match (magnitude, flip) {
        (Some(magnitude_ut), Some(flip_deg)) if last_edited.as_deref() == Some(RF_MAG) => RfDrive {
            magnitude_ut,
            flip_deg,
            authority: RfAuthority::Magnitude,
        },
        (magnitude, Some(flip_deg)) => RfDrive {
            magnitude_ut: magnitude.unwrap_or(0.0),
            flip_deg,
            authority: RfAuthority::FlipAngle,
        },
        (Some(magnitude_ut), None) => RfDrive::magnitude(magnitude_ut),
        (None, None) => RfDrive::default(),
    };

    if let Some(phase) = pop_f64(input, RF_PHASE)? {
        params.rf_phase_deg = phase;
    }
    if let Some(tc) = pop_f64(input, CRUSHER_TC)? {
        params.crusher_tc_ms = tc;
    }
    if let Some(index) = input
        .pop_opt::<i64>(RF_WAVEFORM)
        .map_err(ToolError::input(RF_WAVEFORM))?
    {
        params.rf_encoding = RfEncoding::from_index(index)
            .ok_or_else(|| invalid(RF_WAVEFORM, "no such RF encoding"))?;
    }
    Ok(params)
}

fn segment_overrides(mut pars: ValueDict) -> Result<SegmentOverrides, ToolError> {
    let overrides = SegmentOverrides {
        duration_ms: pop_f64(&mut pars, DURATION)?,
        gz: pop_f64(&mut pars, GZ)?,
        rf_magnitude_ut: pop_f64(&mut pars, RF_MAG)?,
        rf_flip_deg: pop_f64(&mut pars, RF_FLIP)?,
        rf_has_fm_shape: pars.pop_opt(FM_SHAPE).map_err(ToolError::input(FM_SHAPE))?,
    };
    if !pars.0.is_empty() {
        log::debug!("ignoring unknown {PARS_IN} keys {:?}", pars.0.keys());
    }
    Ok(overrides)
}

/// Generate a starting ensemble. Each axis key takes a dict with `"length"`,
/// `"start"` and `"end"`. With `"Starting Spins"` set to 0 (off) no ensemble
/// is produced and `"out"` is empty.
pub fn spyn(mut input: ValueDict, send_msg: &mut MessageFn<'_>) -> Result<ValueDict, ToolError> {
    let mut generator = SpinGenerator::default();
    let mut output = ValueDict::new();

    match input
        .pop_opt::<i64>(STARTING_SPINS)
        .map_err(ToolError::input(STARTING_SPINS))?
    {
        Some(0) => {
            send_msg("starting spins are off, no ensemble generated".to_owned())?;
            output.insert(OUT, ());
            return Ok(output);
        }
        Some(index) => {
            generator.starting_spins = StartingSpins::from_selector(index)
                .ok_or_else(|| invalid(STARTING_SPINS, "no such starting state"))?;
        }
        None => {}
    }
    if let Some(t0) = pop_f64(&mut input, T0)? {
        generator.t0_ms = t0;
    }
    if let Some(dt) = input.pop_opt::<i64>(DT_US).map_err(ToolError::input(DT_US))? {
        generator.dt_us = u32::try_from(dt)
            .ok()
            .filter(|&dt| dt >= 1)
            .ok_or_else(|| invalid(DT_US, "must be at least 1 us"))?;
    }
    for (axis, key) in AXIS_KEYS {
        if let Some(range) = input.pop_opt(key).map_err(ToolError::input(key))? {
            *generator.axis_mut(axis) = axis_range(range, key)?;
        }
    }

    let ensemble = generator.generate().map_err(SimError::from)?;
    send_msg(format!(
        "generated {} spins, shape {:?}",
        ensemble.spin_count(),
        ensemble.spin_shape()
    ))?;
    output.insert(OUT, ensemble.to_tensor());
    Ok(output)
}

fn axis_range(mut dict: ValueDict, key: &'static str) -> Result<AxisRange, ToolError> {
    let mut range = AxisRange::default();
    if let Some(length) = dict.pop_opt::<i64>("length").map_err(ToolError::input(key))? {
        range.length = usize::try_from(length)
            .ok()
            .filter(|&n| n >= 1)
            .ok_or_else(|| invalid(key, "length must be at least 1"))?;
    }
    let number = |_| invalid(key, "start and end must be numbers");
    if let Some(start) = pop_f64(&mut dict, "start").map_err(number)? {
        range.start = start;
        range.end = start;
    }
    if let Some(end) = pop_f64(&mut dict, "end").map_err(number)? {
        range.end = end;
    }
    Ok(range)
}
