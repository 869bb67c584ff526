//! Structured record types and their payload codec.
//!
//! Two record shapes are supported:
//!
//! - [`Example`]: a flat map from field name to [`Feature`].
//! - [`SequenceExample`]: a `context` map plus `feature_lists`, where each
//!   named field holds an ordered sequence of features (one per time step).
//!
//! Every feature is list-valued; a scalar is a one-element list. Decoding is
//! driven by a caller-supplied [`Schema`] that both checks declared types and
//! projects the record down to the listed fields.
//!
//! # Example
//!
//! ```
//! use tfrecord_loader::record::{Example, FeatureType, Schema};
//!
//! let ex = Example::builder()
//!     .int64("label", [1])
//!     .float("score", [0.5, 0.25])
//!     .bytes("id", [b"abc"])
//!     .build();
//!
//! let schema = Schema::new()
//!     .field("label", FeatureType::Int)
//!     .field("score", FeatureType::Float);
//! let decoded = Example::decode(&ex.encode(), &schema)?;
//! assert_eq!(decoded.len(), 2);
//! assert_eq!(decoded.get("label"), ex.get("label"));
//! # Ok::<(), tfrecord_loader::Error>(())
//! ```

mod codec;
mod schema;
mod wire;

pub use codec::{decode_example, decode_sequence_example};
pub use schema::{FieldSpec, Schema};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a feature.
///
/// Parsed from the schema tags `"byte"`/`"bytes"`, `"float"` and `"int"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureType {
    #[serde(rename = "bytes", alias = "byte")]
    Bytes,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "int")]
    Int,
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes => f.write_str("bytes"),
            Self::Float => f.write_str("float"),
            Self::Int => f.write_str("int"),
        }
    }
}

impl std::str::FromStr for FeatureType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "byte" | "bytes" => Ok(Self::Bytes),
            "float" => Ok(Self::Float),
            "int" => Ok(Self::Int),
            other => Err(crate::Error::config(format!(
                "unknown feature type '{other}' (expected byte, bytes, float or int)"
            ))),
        }
    }
}

/// A typed, list-valued field.
#[derive(Clone, Debug, PartialEq)]
pub enum Feature {
    BytesList(Vec<Vec<u8>>),
    FloatList(Vec<f32>),
    Int64List(Vec<i64>),
}

impl Feature {
    /// An empty list of the given type.
    #[must_use]
    pub const fn empty(kind: FeatureType) -> Self {
        match kind {
            FeatureType::Bytes => Self::BytesList(Vec::new()),
            FeatureType::Float => Self::FloatList(Vec::new()),
            FeatureType::Int => Self::Int64List(Vec::new()),
        }
    }

    #[must_use]
    pub const fn feature_type(&self) -> FeatureType {
        match self {
            Self::BytesList(_) => FeatureType::Bytes,
            Self::FloatList(_) => FeatureType::Float,
            Self::Int64List(_) => FeatureType::Int,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::BytesList(v) => v.len(),
            Self::FloatList(v) => v.len(),
            Self::Int64List(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_bytes_list(&self) -> Option<&[Vec<u8>]> {
        match self {
            Self::BytesList(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float_list(&self) -> Option<&[f32]> {
        match self {
            Self::FloatList(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int64_list(&self) -> Option<&[i64]> {
        match self {
            Self::Int64List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Vec<i64>> for Feature {
    fn from(v: Vec<i64>) -> Self {
        Self::Int64List(v)
    }
}

impl From<Vec<f32>> for Feature {
    fn from(v: Vec<f32>) -> Self {
        Self::FloatList(v)
    }
}

impl From<Vec<Vec<u8>>> for Feature {
    fn from(v: Vec<Vec<u8>>) -> Self {
        Self::BytesList(v)
    }
}

impl From<i64> for Feature {
    fn from(v: i64) -> Self {
        Self::Int64List(vec![v])
    }
}

impl From<f32> for Feature {
    fn from(v: f32) -> Self {
        Self::FloatList(vec![v])
    }
}

impl From<&[u8]> for Feature {
    fn from(v: &[u8]) -> Self {
        Self::BytesList(vec![v.to_vec()])
    }
}

/// Flat record: field name to feature.
///
/// Fields are kept sorted by name, which is also the order they are encoded in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Example {
    features: BTreeMap<String, Feature>,
}

impl Example {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> ExampleBuilder {
        ExampleBuilder::default()
    }

    /// Insert a field, returning the previous value under that name.
    pub fn insert(&mut self, name: impl Into<String>, feature: impl Into<Feature>) -> Option<Feature> {
        self.features.insert(name.into(), feature.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Feature> {
        self.features.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Feature)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn into_features(self) -> BTreeMap<String, Feature> {
        self.features
    }

    /// Serialize to payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_example(self)
    }

    /// Decode a payload, projecting it through `schema`.
    ///
    /// # Errors
    /// [`Error::UnknownField`](crate::Error::UnknownField) when a schema field
    /// is absent, [`Error::TypeMismatch`](crate::Error::TypeMismatch) when its
    /// wire type disagrees, or [`Error::MalformedRecord`](crate::Error::MalformedRecord).
    pub fn decode(bytes: &[u8], schema: &Schema) -> Result<Self> {
        decode_example(bytes, schema)
    }
}

impl FromIterator<(String, Feature)> for Example {
    fn from_iter<I: IntoIterator<Item = (String, Feature)>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Feature>> for Example {
    fn from(features: BTreeMap<String, Feature>) -> Self {
        Self { features }
    }
}

/// Fluent construction of an [`Example`] from `(value, type)` pairs.
#[derive(Default)]
pub struct ExampleBuilder {
    inner: Example,
}

impl ExampleBuilder {
    #[must_use]
    pub fn feature(mut self, name: impl Into<String>, feature: impl Into<Feature>) -> Self {
        self.inner.insert(name, feature);
        self
    }

    #[must_use]
    pub fn bytes<B: AsRef<[u8]>>(self, name: impl Into<String>, values: impl IntoIterator<Item = B>) -> Self {
        let values = values.into_iter().map(|b| b.as_ref().to_vec()).collect::<Vec<_>>();
        self.feature(name, Feature::BytesList(values))
    }

    #[must_use]
    pub fn float(self, name: impl Into<String>, values: impl IntoIterator<Item = f32>) -> Self {
        self.feature(name, Feature::FloatList(values.into_iter().collect()))
    }

    #[must_use]
    pub fn int64(self, name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        self.feature(name, Feature::Int64List(values.into_iter().collect()))
    }

    #[must_use]
    pub fn build(self) -> Example {
        self.inner
    }
}

/// Nested record: per-record context plus ordered per-step feature lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SequenceExample {
    pub context: Example,
    pub feature_lists: BTreeMap<String, Vec<Feature>>,
}

impl SequenceExample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> SequenceExampleBuilder {
        SequenceExampleBuilder::default()
    }

    /// Steps of a sequence field, in their original order.
    #[must_use]
    pub fn steps(&self, name: &str) -> Option<&[Feature]> {
        self.feature_lists.get(name).map(Vec::as_slice)
    }

    /// Serialize to payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_sequence_example(self)
    }

    /// Decode a payload, projecting the context and sequence fields through
    /// their respective schemas.
    ///
    /// # Errors
    /// See [`Example::decode`].
    pub fn decode(bytes: &[u8], context: &Schema, sequence: &Schema) -> Result<Self> {
        decode_sequence_example(bytes, context, sequence)
    }
}

#[derive(Default)]
pub struct SequenceExampleBuilder {
    inner: SequenceExample,
}

impl SequenceExampleBuilder {
    #[must_use]
    pub fn context(mut self, name: impl Into<String>, feature: impl Into<Feature>) -> Self {
        self.inner.context.insert(name, feature);
        self
    }

    #[must_use]
    pub fn context_int64(self, name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        self.context(name, Feature::Int64List(values.into_iter().collect()))
    }

    #[must_use]
    pub fn context_float(self, name: impl Into<String>, values: impl IntoIterator<Item = f32>) -> Self {
        self.context(name, Feature::FloatList(values.into_iter().collect()))
    }

    #[must_use]
    pub fn context_bytes<B: AsRef<[u8]>>(
        self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = B>,
    ) -> Self {
        let values = values.into_iter().map(|b| b.as_ref().to_vec()).collect::<Vec<_>>();
        self.context(name, Feature::BytesList(values))
    }

    #[must_use]
    pub fn sequence(mut self, name: impl Into<String>, steps: impl IntoIterator<Item = Feature>) -> Self {
        self.inner
            .feature_lists
            .insert(name.into(), steps.into_iter().collect());
        self
    }

    #[must_use]
    pub fn int64_sequence(self, name: impl Into<String>, steps: impl IntoIterator<Item = Vec<i64>>) -> Self {
        self.sequence(name, steps.into_iter().map(Feature::Int64List))
    }

    #[must_use]
    pub fn float_sequence(self, name: impl Into<String>, steps: impl IntoIterator<Item = Vec<f32>>) -> Self {
        self.sequence(name, steps.into_iter().map(Feature::FloatList))
    }

    #[must_use]
    pub fn bytes_sequence(
        self,
        name: impl Into<String>,
        steps: impl IntoIterator<Item = Vec<Vec<u8>>>,
    ) -> Self {
        self.sequence(name, steps.into_iter().map(Feature::BytesList))
    }

    #[must_use]
    pub fn build(self) -> SequenceExample {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_type_tags() {
        assert_eq!("byte".parse::<FeatureType>().unwrap(), FeatureType::Bytes);
        assert_eq!("bytes".parse::<FeatureType>().unwrap(), FeatureType::Bytes);
        assert_eq!("float".parse::<FeatureType>().unwrap(), FeatureType::Float);
        assert_eq!("int".parse::<FeatureType>().unwrap(), FeatureType::Int);
        assert!("int64".parse::<FeatureType>().is_err());
    }

    #[test]
    fn scalars_become_single_element_lists() {
        let ex = Example::builder()
            .feature("a", 7i64)
            .feature("b", 1.5f32)
            .feature("c", &b"xy"[..])
            .build();
        assert_eq!(ex.get("a"), Some(&Feature::Int64List(vec![7])));
        assert_eq!(ex.get("b").unwrap().as_float_list(), Some(&[1.5][..]));
        assert_eq!(ex.get("c").unwrap().len(), 1);
    }

    #[test]
    fn builder_replaces_duplicate_names() {
        let ex = Example::builder().int64("x", [1]).int64("x", [2, 3]).build();
        assert_eq!(ex.len(), 1);
        assert_eq!(ex.get("x").unwrap().as_int64_list(), Some(&[2, 3][..]));
    }
}
