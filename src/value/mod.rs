use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ConversionError, LookupError};

/// Named inputs and outputs of a tool, e.g. `"M_in"` or `"Duration (ms)"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueDict(pub HashMap<String, Value>);

impl ValueDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn pop<T>(&mut self, key: &str) -> Result<T, LookupError>
    where
        T: TryFrom<Value, Error = ConversionError>,
    {
        match self.0.remove(key) {
            Some(value) => Ok(value.try_into().map_err(LookupError::ConversionError)?),
            None => Err(LookupError::KeyError),
        }
    }

    /// Like [`ValueDict::pop`], but a missing key or an explicit
    /// [`Value::None`] is `Ok(None)`. Optional ports are passed this way.
    pub fn pop_opt<T>(&mut self, key: &str) -> Result<Option<T>, LookupError>
    where
        T: TryFrom<Value, Error = ConversionError>,
    {
        match self.0.remove(key) {
            None | Some(Value::None(())) => Ok(None),
            Some(value) => Ok(Some(
                value.try_into().map_err(LookupError::ConversionError)?,
            )),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ValueDict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None(()),
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(ArrayD<f64>),
    Dict(ValueDict),
}

// =====================================================
// CONVERSION: Dynamic typed Value <-> Static typed Rust
// =====================================================

impl Value {
    fn type_name(&self) -> &'static str {
        use std::any::type_name_of_val;

        match self {
            Value::None(x) => type_name_of_val(x),
            Value::Bool(x) => type_name_of_val(x),
            Value::Int(x) => type_name_of_val(x),
            Value::Float(x) => type_name_of_val(x),
            Value::String(x) => type_name_of_val(x),
            Value::Array(x) => type_name_of_val(x),
            Value::Dict(x) => type_name_of_val(x),
        }
    }
}

macro_rules! impl_value {
    ($rust_type:ty, $value_type:ident) => {
        impl From<$rust_type> for Value {
            fn from(value: $rust_type) -> Self {
                Value::$value_type(value)
            }
        }

        impl TryFrom<Value> for $rust_type {
            type Error = ConversionError;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    Value::$value_type(value) => Ok(value),
                    _ => Err(ConversionError {
                        from: value.type_name(),
                        into: std::any::type_name::<$rust_type>(),
                    }),
                }
            }
        }
    };
}

impl_value!((), None);
impl_value!(bool, Bool);
impl_value!(i64, Int);
impl_value!(String, String);
impl_value!(ArrayD<f64>, Array);
impl_value!(ValueDict, Dict);

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

// Spin boxes may hand over whole numbers as Int
impl TryFrom<Value> for f64 {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Float(value) => Ok(value),
            Value::Int(value) => Ok(value as f64),
            _ => Err(ConversionError {
                from: value.type_name(),
                into: std::any::type_name::<f64>(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn pop_removes_and_converts() {
        let mut dict: ValueDict = [("Gz (mT/m)", Value::from(2.5)), ("RF Waveform", 3i64.into())]
            .into_iter()
            .collect();

        assert_eq!(dict.pop::<f64>("Gz (mT/m)").unwrap(), 2.5);
        assert!(!dict.contains_key("Gz (mT/m)"));
        assert!(matches!(
            dict.pop::<f64>("Gz (mT/m)"),
            Err(LookupError::KeyError)
        ));
        assert_eq!(dict.pop::<i64>("RF Waveform").unwrap(), 3);
    }

    #[test]
    fn int_is_accepted_as_float() {
        let mut dict: ValueDict = [("Duration (ms)", Value::Int(2))].into_iter().collect();
        assert_eq!(dict.pop::<f64>("Duration (ms)").unwrap(), 2.0);
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let mut dict: ValueDict = [("M_in", Value::from("not an array"))]
            .into_iter()
            .collect();
        match dict.pop::<ArrayD<f64>>("M_in") {
            Err(LookupError::ConversionError(err)) => {
                assert!(err.from.contains("String"));
                assert!(err.into.contains("ArrayBase"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pop_opt_treats_none_as_missing() {
        let mut dict: ValueDict = [
            ("G_in", Value::None(())),
            ("RF_in", ArrayD::<f64>::zeros(IxDyn(&[4])).into()),
        ]
        .into_iter()
        .collect();

        assert!(dict.pop_opt::<ArrayD<f64>>("G_in").unwrap().is_none());
        assert!(dict.pop_opt::<ArrayD<f64>>("Pars_in").unwrap().is_none());
        assert_eq!(
            dict.pop_opt::<ArrayD<f64>>("RF_in").unwrap().unwrap().shape(),
            &[4]
        );
    }
}
