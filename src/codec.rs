//! Binary snapshots: MessagePack, zstd compressed.
//!
//! Used to hand an ensemble (or a whole tool input) from one process to the
//! next without going through the tensor form.

use serde::{Serialize, de::DeserializeOwned};

use crate::ensemble::SpinEnsemble;
use crate::error::ParseError;
use crate::value::ValueDict;

fn decompress(raw: &[u8]) -> Result<Vec<u8>, ParseError> {
    use ruzstd::io::Read;
    let mut decoder = ruzstd::decoding::StreamingDecoder::new(raw)
        .map_err(|e| ParseError::DecompressionError(std::io::Error::other(e)))?;
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(ParseError::DecompressionError)?;
    Ok(decompressed)
}

fn compress(raw: &[u8]) -> Vec<u8> {
    ruzstd::encoding::compress_to_vec(raw, ruzstd::encoding::CompressionLevel::Default)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ParseError> {
    let raw = rmp_serde::to_vec(value)?;
    Ok(compress(&raw))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ParseError> {
    let raw = decompress(bytes)?;
    Ok(rmp_serde::from_slice(&raw)?)
}

impl SpinEnsemble {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        encode(self)
    }

    /// Decode a snapshot, applying the same checks as
    /// [`SpinEnsemble::from_tensor`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let (spin_shape, history) = decode::<SpinEnsemble>(bytes)?.into_parts();
        Ok(SpinEnsemble::from_parts(spin_shape, history)?)
    }
}

impl ValueDict {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::simulate;
    use crate::generator::{AxisRange, SpinGenerator};
    use crate::params::{RfDrive, SegmentParameters};
    use crate::value::Value;
    use ndarray::{Array3, ArrayD, IxDyn};

    #[test]
    fn ensemble_snapshot_after_a_segment() {
        let mut ensemble = SpinGenerator {
            t2_ms: AxisRange::linspace(3, 50.0, 150.0),
            ..Default::default()
        }
        .generate()
        .unwrap();
        let params = SegmentParameters {
            rf: RfDrive::flip_angle(45.0),
            ..Default::default()
        };
        simulate(&mut ensemble, &params, None, None, &mut |_| Ok(())).unwrap();

        let bytes = ensemble.to_bytes().unwrap();
        assert_eq!(SpinEnsemble::from_bytes(&bytes).unwrap(), ensemble);
    }

    #[test]
    fn inconsistent_snapshot_is_rejected() {
        let ensemble = SpinGenerator::default().generate().unwrap();
        let (spin_shape, mut history) = ensemble.into_parts();
        history.slice_collapse(ndarray::s![..1, .., ..]);
        let bytes = encode(&(spin_shape, history)).unwrap();
        assert!(matches!(
            SpinEnsemble::from_bytes(&bytes),
            Err(ParseError::InvalidEnsemble(_))
        ));
    }

    #[test]
    fn value_dict_snapshot() {
        let mut dict = ValueDict::new();
        dict.insert("Duration (ms)", 2.5);
        dict.insert("name", "segment");
        dict.insert("data", ArrayD::from_elem(IxDyn(&[2, 3]), 1.5));
        let bytes = dict.to_bytes().unwrap();
        let decoded = ValueDict::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, dict);
        assert!(matches!(decoded.0.get("name"), Some(Value::String(s)) if s == "segment"));
    }

    #[test]
    fn garbage_fails_to_decompress() {
        assert!(matches!(
            decode::<Array3<f64>>(&[1, 2, 3, 4]),
            Err(ParseError::DecompressionError(_))
        ));
    }
}
