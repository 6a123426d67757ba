//! Serde helpers for floats that may be NaN or infinite.
//!
//! JSON has no NaN, so NaN is written as `null` and infinities as the strings
//! `"inf"` / `"-inf"`. Reading accepts all three forms as well as plain numbers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Repr {
    Num(f64),
    Text(String),
    Null,
}

fn to_repr(v: f64) -> Repr {
    if v.is_nan() {
        Repr::Null
    } else if v.is_infinite() {
        Repr::Text(if v > 0.0 { "inf" } else { "-inf" }.to_string())
    } else {
        Repr::Num(v)
    }
}

fn from_repr<E: serde::de::Error>(repr: Repr) -> Result<f64, E> {
    match repr {
        Repr::Num(v) => Ok(v),
        Repr::Null => Ok(f64::NAN),
        Repr::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| E::custom(format!("invalid float '{s}'"))),
    }
}

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    to_repr(*value).serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    from_repr(Repr::deserialize(deserializer)?)
}

pub mod vec {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let reprs: Vec<Repr> = values.iter().copied().map(to_repr).collect();
        reprs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(from_repr)
            .collect()
    }
}
