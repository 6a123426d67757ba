//! Parameter space enumeration.
//!
//! A `ParameterSpace` maps dimension names to ordered candidate values and
//! enumerates their Cartesian product as `Permutation`s. Dimensions are kept
//! sorted by name, and the last dimension varies fastest, so the enumeration
//! order is fixed for a given definition.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{BenchError, BenchResult};

/// One candidate value of a dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    fn rank(&self) -> u8 {
        match self {
            ParamValue::Int(_) => 0,
            ParamValue::Float(_) => 1,
            ParamValue::Text(_) => 2,
        }
    }

    /// Parse command-line text the way configuration values are typed:
    /// integer, then float, then text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<i64>() {
            ParamValue::Int(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            ParamValue::Float(v)
        } else {
            ParamValue::Text(raw.to_string())
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

// Floats compare by bit pattern so permutations can be map keys.
impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ParamValue::Int(v) => v.hash(state),
            ParamValue::Float(v) => v.to_bits().hash(state),
            ParamValue::Text(s) => s.hash(state),
        }
    }
}

impl PartialOrd for ParamValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParamValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a.cmp(b),
            (ParamValue::Float(a), ParamValue::Float(b)) => a.total_cmp(b),
            (ParamValue::Text(a), ParamValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// One concrete combination of dimension values, ordered by dimension name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permutation {
    fields: Vec<(String, ParamValue)>,
}

impl Permutation {
    /// The permutation of a space without dimensions.
    pub fn empty() -> Self {
        Permutation { fields: Vec::new() }
    }

    pub fn get(&self, dimension: &str) -> Option<&ParamValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flattened field mapping, the serialisable form of the key.
    pub fn to_map(&self) -> BTreeMap<String, ParamValue> {
        self.fields.iter().cloned().collect()
    }

    /// Values joined with `-`, e.g. `2-64`; empty for the empty permutation.
    pub fn joined(&self) -> String {
        self.fields
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return f.write_str("()");
        }
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// The N-dimensional argument grid of a benchmark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    dimensions: BTreeMap<String, Vec<ParamValue>>,
}

impl ParameterSpace {
    pub fn new(dimensions: BTreeMap<String, Vec<ParamValue>>) -> Self {
        ParameterSpace { dimensions }
    }

    /// Builder-style helper used by tests and programmatic benchmarks.
    pub fn with_dimension<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.dimensions
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn dimensions(&self) -> &BTreeMap<String, Vec<ParamValue>> {
        &self.dimensions
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    /// Number of permutations; 1 when there are no dimensions.
    pub fn len(&self) -> usize {
        self.dimensions.values().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy enumeration of the full Cartesian product.
    pub fn iter(&self) -> Permutations<'_> {
        let exhausted = self.dimensions.values().any(Vec::is_empty);
        Permutations {
            space: self,
            cursor: vec![0; self.dimensions.len()],
            done: exhausted,
        }
    }

    /// Permutations whose values on the dimensions named in `fixed` equal the
    /// given values, in enumeration order.
    pub fn iter_fixed<'a>(
        &'a self,
        fixed: &'a BTreeMap<String, ParamValue>,
    ) -> impl Iterator<Item = Permutation> + 'a {
        self.iter().filter(move |perm| {
            fixed
                .iter()
                .all(|(name, value)| perm.get(name) == Some(value))
        })
    }

    /// Rebuild a permutation key from its flattened field mapping.
    ///
    /// The mapping must name exactly this space's dimensions and each value
    /// must be one of that dimension's candidates.
    pub fn permutation(&self, fields: &BTreeMap<String, ParamValue>) -> BenchResult<Permutation> {
        if fields.len() != self.dimensions.len() {
            return Err(BenchError::Message(format!(
                "permutation has {} fields, parameter space has {} dimensions",
                fields.len(),
                self.dimensions.len()
            )));
        }
        let mut out = Vec::with_capacity(fields.len());
        for (name, candidates) in &self.dimensions {
            let value = fields.get(name).ok_or_else(|| {
                BenchError::Message(format!("permutation is missing dimension '{name}'"))
            })?;
            if !candidates.contains(value) {
                return Err(BenchError::Message(format!(
                    "value '{value}' is not a candidate of dimension '{name}'"
                )));
            }
            out.push((name.clone(), value.clone()));
        }
        Ok(Permutation { fields: out })
    }
}

impl<'a> IntoIterator for &'a ParameterSpace {
    type Item = Permutation;
    type IntoIter = Permutations<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Odometer over the candidate indices of each dimension.
pub struct Permutations<'a> {
    space: &'a ParameterSpace,
    cursor: Vec<usize>,
    done: bool,
}

impl Iterator for Permutations<'_> {
    type Item = Permutation;

    fn next(&mut self) -> Option<Permutation> {
        if self.done {
            return None;
        }

        let fields = self
            .space
            .dimensions
            .iter()
            .zip(&self.cursor)
            .map(|((name, values), &idx)| (name.clone(), values[idx].clone()))
            .collect();

        // advance, last dimension fastest
        self.done = true;
        let sizes: Vec<usize> = self.space.dimensions.values().map(Vec::len).collect();
        for pos in (0..self.cursor.len()).rev() {
            self.cursor[pos] += 1;
            if self.cursor[pos] < sizes[pos] {
                self.done = false;
                break;
            }
            self.cursor[pos] = 0;
        }

        Some(Permutation { fields })
    }
}

/// Thread counts between `min_threads` and `cpus * factor` with at most
/// `steps` entries.
pub fn scale_threads_for_cpus(factor: usize, min_threads: usize, steps: usize, cpus: usize) -> Vec<i64> {
    let max_threads = cpus.max(1) * factor.max(1);
    let min_threads = min_threads.max(1).min(max_threads);

    if steps > max_threads - min_threads + 1 {
        return (min_threads..=max_threads).map(|t| t as i64).collect();
    }

    let mut nthreads: Vec<usize> = Vec::new();
    let mut divider = 2;
    loop {
        let step = (max_threads / divider).max(1);
        let entries = max_threads / step;
        if entries > steps.saturating_sub(1) || step == 1 {
            let mut out: Vec<usize> = std::iter::once(min_threads)
                .chain(nthreads)
                .chain(std::iter::once(max_threads))
                .collect();
            out.sort_unstable();
            out.dedup();
            return out.into_iter().map(|t| t as i64).collect();
        }
        nthreads = (1..=entries).map(|i| i * step).collect();
        divider *= 2;
    }
}
