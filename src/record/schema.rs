use super::FeatureType;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// One field a [`Schema`] selects, with its declared type if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// `None` accepts whatever type the payload carries.
    pub kind: Option<FeatureType>,
}

/// Fields to decode from a payload, and what type each must have.
///
/// A schema is a projection: payload fields it does not list are skipped.
/// Every listed field must be present; there is no notion of an optional
/// field. The empty schema selects every field in the payload, with types
/// taken from the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    /// The empty schema, which decodes every field.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a typed field.
    #[must_use]
    pub fn field(self, name: impl Into<String>, kind: FeatureType) -> Self {
        self.with_spec(name.into(), Some(kind))
    }

    /// Add (or replace) a field whose type is not checked.
    #[must_use]
    pub fn untyped(self, name: impl Into<String>) -> Self {
        self.with_spec(name.into(), None)
    }

    fn with_spec(mut self, name: String, kind: Option<FeatureType>) -> Self {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.kind = kind,
            None => self.fields.push(FieldSpec { name, kind }),
        }
        self
    }

    /// Build from `(name, type tag)` pairs such as `("label", "int")`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an unknown type tag or a repeated
    /// field name.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for (name, tag) in pairs {
            let name = name.into();
            let kind = tag.as_ref().parse::<FeatureType>()?;
            if !seen.insert(name.clone()) {
                return Err(Error::config(format!("field '{name}' listed twice in schema")));
            }
            fields.push(FieldSpec {
                name,
                kind: Some(kind),
            });
        }
        Ok(Self { fields })
    }

    /// Build from bare field names; types are not checked.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a repeated field name.
    pub fn from_names<I, K>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for name in names {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(Error::config(format!("field '{name}' listed twice in schema")));
            }
            fields.push(FieldSpec { name, kind: None });
        }
        Ok(Self { fields })
    }

    /// True when the schema lists no fields and therefore decodes all of them.
    #[must_use]
    pub fn selects_all(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
