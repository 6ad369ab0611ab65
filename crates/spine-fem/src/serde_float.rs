//! Serde helpers for floats that may be undefined.
//!
//! JSON has no NaN or infinity. Finite values are written as numbers, NaN as
//! `null`, and infinities as the `format_value` markers `"inf"` and `"-inf"`.
//! Reading accepts the same forms plus the `"NaN"` marker.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One `f64` in its wire form.
struct Float(f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum FloatRepr {
    Number(f64),
    Marker(String),
    Undefined(Option<f64>),
}

impl Serialize for Float {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_finite() {
            s.serialize_f64(v)
        } else if v.is_nan() {
            s.serialize_none()
        } else if v > 0.0 {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }
}

impl<'de> Deserialize<'de> for Float {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = match FloatRepr::deserialize(d)? {
            FloatRepr::Number(v) => v,
            FloatRepr::Undefined(v) => v.unwrap_or(f64::NAN),
            FloatRepr::Marker(marker) => match marker.as_str() {
                "NaN" => f64::NAN,
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => {
                    return Err(D::Error::custom(format!(
                        "expected a number, null, \"NaN\", \"inf\" or \"-inf\", got \"{}\"",
                        other
                    )));
                }
            },
        };
        Ok(Float(v))
    }
}

/// `#[serde(with = "crate::serde_float::value")]` for one `f64`.
pub(crate) mod value {
    use super::*;

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        Float(*v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Float::deserialize(d)?.0)
    }
}

/// `#[serde(with = "crate::serde_float::values")]` for a `Vec<f64>`.
pub(crate) mod values {
    use super::*;

    pub fn serialize<S: Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(|&x| Float(x)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        Ok(Vec::<Float>::deserialize(d)?
            .into_iter()
            .map(|f| f.0)
            .collect())
    }
}
