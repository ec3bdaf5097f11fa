use thiserror::Error;

use crate::waveform::WaveformRole;

/// Why a running tool stopped early. Returned by [`crate::MessageFn`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    #[error("requested by caller")]
    RequestedByCaller,
    #[error("message channel closed")]
    ChannelClosed,
}

/// Coarse classification of [`SimError`], so callers can tell a bad
/// configuration apart from a broken input or an intentional stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fix the segment configuration (waveform shape, encoding) and retry.
    Configuration,
    /// The input ensemble or a parameter violates a hard precondition.
    Precondition,
    /// The caller asked the run to stop.
    Aborted,
}

#[derive(Error, Debug)]
pub enum SimError {
    #[error("precondition violated: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("unsupported {role} waveform shape {shape:?}")]
    UnsupportedWaveform {
        role: WaveformRole,
        shape: Vec<usize>,
    },
    #[error("simulation aborted: {0}")]
    Aborted(#[from] AbortReason),
}

impl SimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::Precondition(_) => ErrorKind::Precondition,
            SimError::UnsupportedWaveform { .. } => ErrorKind::Configuration,
            SimError::Aborted(_) => ErrorKind::Aborted,
        }
    }
}

#[derive(Error, Debug)]
pub enum PreconditionError {
    #[error("spin ensemble must have rank {expected}, found {found}")]
    Rank { expected: usize, found: usize },
    #[error("spin ensemble field axis must have length {expected}, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("spin ensemble needs a constants slot and a state slot, found {0} time slots")]
    MissingState(usize),
    #[error("spin ensemble has an empty spin axis")]
    EmptySpinAxis,
    #[error("invalid {name}: {value}")]
    InvalidConstant { name: &'static str, value: f64 },
    #[error("{name} differs between spins")]
    NonUniformConstant { name: &'static str },
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("ensemble does not match the one the segment was prepared for")]
    EnsembleMismatch,
    #[error("array shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Error, Debug, Clone, Copy)]
#[error("cannot convert {from} into {into}")]
pub struct ConversionError {
    pub from: &'static str,
    pub into: &'static str,
}

#[derive(Error, Debug, Clone, Copy)]
pub enum LookupError {
    #[error("key not found")]
    KeyError,
    #[error(transparent)]
    ConversionError(ConversionError),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("serialization failed: {0}")]
    SerializationError(#[from] rmp_serde::encode::Error),
    #[error("deserialization failed: {0}")]
    DeserializationError(#[from] rmp_serde::decode::Error),
    #[error("decompression failed: {0}")]
    DecompressionError(std::io::Error),
    #[error("decoded ensemble is inconsistent: {0}")]
    InvalidEnsemble(#[from] PreconditionError),
}

/// Error returned by a [`crate::ToolFn`].
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("input {key:?}: {source}")]
    Input { key: String, source: LookupError },
    #[error(transparent)]
    Simulation(#[from] SimError),
    #[error(transparent)]
    Codec(#[from] ParseError),
}

impl ToolError {
    pub(crate) fn input(key: &str) -> impl FnOnce(LookupError) -> ToolError + '_ {
        move |source| ToolError::Input {
            key: key.to_owned(),
            source,
        }
    }
}

// Lets tools call `send_msg(..)?` directly
impl From<AbortReason> for ToolError {
    fn from(reason: AbortReason) -> Self {
        ToolError::Simulation(SimError::Aborted(reason))
    }
}
