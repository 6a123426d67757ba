//! Result data model: raw per-run records, targets, facts and statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Schema version of the persisted result file.
pub const SCHEMA_VERSION: u32 = 1;

/// A captured measurement value.
#[derive(Debug, Clone)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Store numeric-looking text as a number, anything else verbatim.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(v) => Scalar::Number(v),
            Err(_) => Scalar::Text(trimmed.to_string()),
        }
    }

    /// Numeric coercion; `None` if the value is not a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(v) => Some(*v),
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Scalar::Number(v) if v.is_nan())
    }

    /// Equality that treats two NaNs as the same value.
    pub fn same_as(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(v) => write!(f, "{v}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Number(v) => super::float::serialize(v, serializer),
            // these spellings are taken by infinite numbers
            Scalar::Text(s) if s == "inf" || s == "-inf" => TaggedText { text: s }.serialize(serializer),
            Scalar::Text(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Serialize)]
struct TaggedText<'a> {
    text: &'a str,
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(f64),
            Text(String),
            Null,
            Tagged { text: String },
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Num(v) => Scalar::Number(v),
            Repr::Null => Scalar::Number(f64::NAN),
            Repr::Tagged { text } => Scalar::Text(text),
            Repr::Text(s) => match s.as_str() {
                "inf" => Scalar::Number(f64::INFINITY),
                "-inf" => Scalar::Number(f64::NEG_INFINITY),
                _ => Scalar::Text(s),
            },
        })
    }
}

/// Fields captured from one invocation. Empty means the run failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, Scalar>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Scalar>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Scalar> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Scalar> {
        self.fields.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A record with the same field names as `template`, every value NaN.
    pub fn nan_like(template: &RawRecord) -> Self {
        RawRecord {
            fields: template
                .fields
                .keys()
                .map(|k| (k.clone(), Scalar::Number(f64::NAN)))
                .collect(),
        }
    }

    /// Field-wise equality treating NaN as equal to NaN.
    pub fn same_as(&self, other: &RawRecord) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
    }
}

impl FromIterator<(String, Scalar)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, Scalar)>>(iter: I) -> Self {
        RawRecord {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A named variant under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// Shared objects to preload, space separated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preload: String,
    /// Appended to the dynamic library search path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
    /// Prepended to the benchmark command (may contain placeholders).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub binary_suffix: String,
    /// Reporting identity only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Extra substitution keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Target {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_preload(mut self, preload: impl Into<String>) -> Self {
        self.preload = preload.into();
        self
    }

    pub fn with_library_path(mut self, path: impl Into<String>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    pub fn with_cmd_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cmd_prefix = prefix.into();
        self
    }

    /// Substitution keys contributed by this target.
    pub fn substitutions(&self) -> BTreeMap<String, String> {
        let mut subs = self.attrs.clone();
        subs.insert("target".into(), self.name.clone());
        subs.insert("preload".into(), self.preload.clone());
        subs.insert("library_path".into(), self.library_path.clone().unwrap_or_default());
        subs.insert("cmd_prefix".into(), self.cmd_prefix.clone());
        subs.insert("binary_suffix".into(), self.binary_suffix.clone());
        subs
    }
}

/// Free-form environment and version metadata. Keys are write-once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts {
    entries: BTreeMap<String, serde_json::Value>,
}

impl Facts {
    /// Record a fact unless the key is already present. Returns whether it
    /// was recorded.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(value.into());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Record `key` inside the object-valued fact `section`.
    pub fn record_in(
        &mut self,
        section: &str,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> bool {
        let entry = self
            .entries
            .entry(section.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        match entry {
            serde_json::Value::Object(map) => {
                let key = key.into();
                if map.contains_key(&key) {
                    false
                } else {
                    map.insert(key, value.into());
                    true
                }
            }
            _ => false,
        }
    }

    /// Copy facts from `other` whose keys are not present here.
    pub fn merge_missing(&mut self, other: &Facts) {
        for (k, v) in &other.entries {
            self.record(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Names of the descriptive statistics computed per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Min,
    Max,
    Mean,
    Median,
    Std,
    StdPerc,
    LowerQuartile,
    UpperQuartile,
    LowerWhisker,
    UpperWhisker,
}

impl Statistic {
    pub const ALL: [Statistic; 10] = [
        Statistic::Min,
        Statistic::Max,
        Statistic::Mean,
        Statistic::Median,
        Statistic::Std,
        Statistic::StdPerc,
        Statistic::LowerQuartile,
        Statistic::UpperQuartile,
        Statistic::LowerWhisker,
        Statistic::UpperWhisker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Mean => "mean",
            Statistic::Median => "median",
            Statistic::Std => "std",
            Statistic::StdPerc => "std_perc",
            Statistic::LowerQuartile => "lower_quartile",
            Statistic::UpperQuartile => "upper_quartile",
            Statistic::LowerWhisker => "lower_whisker",
            Statistic::UpperWhisker => "upper_whisker",
        }
    }
}

/// Descriptive statistics of one numeric field across repetitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    #[serde(with = "super::float")]
    pub min: f64,
    #[serde(with = "super::float")]
    pub max: f64,
    #[serde(with = "super::float")]
    pub mean: f64,
    #[serde(with = "super::float")]
    pub median: f64,
    /// Sample standard deviation (N-1).
    #[serde(with = "super::float")]
    pub std: f64,
    /// `std / mean`.
    #[serde(with = "super::float")]
    pub std_perc: f64,
    #[serde(with = "super::float")]
    pub lower_quartile: f64,
    #[serde(with = "super::float")]
    pub upper_quartile: f64,
    /// `lower_quartile - IQR`
    #[serde(with = "super::float")]
    pub lower_whisker: f64,
    /// `upper_quartile + IQR`
    #[serde(with = "super::float")]
    pub upper_whisker: f64,
    #[serde(with = "super::float::vec")]
    pub outliers: Vec<f64>,
}

impl FieldStats {
    pub fn get(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Min => self.min,
            Statistic::Max => self.max,
            Statistic::Mean => self.mean,
            Statistic::Median => self.median,
            Statistic::Std => self.std,
            Statistic::StdPerc => self.std_perc,
            Statistic::LowerQuartile => self.lower_quartile,
            Statistic::UpperQuartile => self.upper_quartile,
            Statistic::LowerWhisker => self.lower_whisker,
            Statistic::UpperWhisker => self.upper_whisker,
        }
    }

    /// Equality within `tolerance`, NaN matching NaN.
    pub fn approx_eq(&self, other: &FieldStats, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| {
            (a.is_nan() && b.is_nan()) || a == b || (a - b).abs() <= tolerance
        };
        Statistic::ALL
            .iter()
            .all(|s| close(self.get(*s), other.get(*s)))
            && self.outliers.len() == other.outliers.len()
            && self.outliers.iter().zip(&other.outliers).all(|(a, b)| close(*a, *b))
    }
}

/// Statistics of one (target, permutation) cell, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermutationStats {
    fields: BTreeMap<String, FieldStats>,
}

impl PermutationStats {
    pub fn insert(&mut self, field: impl Into<String>, stats: FieldStats) {
        self.fields.insert(field.into(), stats);
    }

    pub fn field(&self, field: &str) -> Option<&FieldStats> {
        self.fields.get(field)
    }

    /// `statistic -> field -> value` addressing.
    pub fn get(&self, statistic: Statistic, field: &str) -> Option<f64> {
        self.fields.get(field).map(|s| s.get(statistic))
    }

    /// All fields' values of one statistic, e.g. every mean.
    pub fn by_statistic(&self, statistic: Statistic) -> BTreeMap<&str, f64> {
        self.fields
            .iter()
            .map(|(k, s)| (k.as_str(), s.get(statistic)))
            .collect()
    }

    pub fn outliers(&self, field: &str) -> Option<&[f64]> {
        self.fields.get(field).map(|s| s.outliers.as_slice())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldStats)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
