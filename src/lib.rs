//! Bloch equation simulation of spin ensembles.
//!
//! A [`SpinEnsemble`] is built once (see [`SpinGenerator`]) and then driven
//! through a chain of segments, each with its own gradients, RF and timing
//! ([`SegmentParameters`]). Every segment appends its recorded steps to the
//! ensemble's history, so the finished ensemble holds the whole experiment.
//!
//! ```
//! # use spinsim::{SpinGenerator, SegmentParameters, RfDrive, simulate};
//! let mut ensemble = SpinGenerator::default().generate()?;
//! let excitation = SegmentParameters {
//!     rf: RfDrive::flip_angle(90.0),
//!     ..Default::default()
//! };
//! simulate(&mut ensemble, &excitation, None, None, &mut |msg| {
//!     println!("{msg}");
//!     Ok(())
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

// =====================================
// Public API of spinsim
// =====================================

pub mod codec;
pub mod engine;
pub mod ensemble;
pub mod generator;
pub mod kernel;
pub mod params;
pub mod profile;
pub mod reconcile;
pub mod tool;
pub mod value;
pub mod waveform;

pub use engine::{BlochEngine, simulate};
pub use ensemble::SpinEnsemble;
pub use error::*;
pub use generator::{AxisRange, SpinGenerator, StartingSpins};
pub use params::{RfDrive, RfEncoding, SegmentOverrides, SegmentParameters};
pub use profile::Component;
pub use value::{Value, ValueDict};
pub use waveform::Waveform;

/// Function which receives progress messages of a running simulation and
/// returns whether the caller wants it to stop.
///
/// It is passed to every simulation and tool as a parameter instead of being
/// a global logger because it carries the caller's state (a UI, a connection).
/// Propagate its error with `?` to abort on request.
pub type MessageFn<'a> = dyn FnMut(String) -> Result<(), AbortReason> + 'a;

/// Signature of the functions in [`tool::TOOLS`].
///
/// A tool receives the inputs of the caller by name, as well as a
/// [`MessageFn`] to report progress and abort on request. It returns its
/// outputs by name or an error, which the host reports to its user.
///
/// # Examples
/// ```
/// # use spinsim::{ValueDict, MessageFn, ToolError};
///
/// /// Tool which reports its arguments and returns them to sender.
/// fn echo(input: ValueDict, send_msg: &mut MessageFn<'_>) -> Result<ValueDict, ToolError> {
///     send_msg(format!("Args: {input:?}"))?;
///     Ok(input)
/// }
/// ```
pub type ToolFn = fn(ValueDict, &mut MessageFn<'_>) -> Result<ValueDict, ToolError>;
