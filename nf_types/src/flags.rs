//! Binding caller values to a schema and translating them into runner flags.
//!
//! Translation is per parameter, in declared order:
//! - unset optional parameter: nothing
//! - `true` switch: `--<name>`
//! - `false` or unset switch: nothing
//! - anything else: `--<name> <value>`

use crate::schema::{ParamKind, ParameterSchema, ParameterSpec};
use crate::value::ParamValue;
use crate::ParamError;
use std::collections::BTreeMap;

/// Tokens contributed by a single parameter.
pub fn get_flag(spec: &ParameterSpec, value: Option<&ParamValue>) -> Vec<String> {
    match value {
        None | Some(ParamValue::Bool(false)) => vec![],
        Some(ParamValue::Bool(true)) => vec![spec.flag()],
        Some(v) => vec![spec.flag(), v.to_string()],
    }
}

/// Values supplied by a caller, keyed by parameter name.
///
/// A name may be bound to `None` to explicitly unset it, which suppresses its
/// default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterValues {
    values: BTreeMap<String, Option<ParamValue>>,
}

impl ParameterValues {
    /// No values supplied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.to_string(), Some(value.into()));
        self
    }

    /// Explicitly leave `name` unset, overriding any default.
    pub fn unset(&mut self, name: &str) -> &mut Self {
        self.values.insert(name.to_string(), None);
        self
    }

    /// Builder form of [`ParameterValues::set`].
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder form of [`ParameterValues::unset`].
    pub fn without(mut self, name: &str) -> Self {
        self.unset(name);
        self
    }

    /// The binding for `name`: `None` if never mentioned, `Some(None)` if
    /// explicitly unset.
    pub fn get(&self, name: &str) -> Option<Option<&ParamValue>> {
        self.values.get(name).map(Option::as_ref)
    }

    /// Number of names mentioned.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no names are mentioned.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Effective value of every declared parameter, in declared order.
#[derive(Debug, Clone)]
pub struct ResolvedParameters<'a> {
    entries: Vec<(&'a ParameterSpec, Option<ParamValue>)>,
}

impl ParameterSchema {
    /// Bind `supplied` to this schema. Supplied values take precedence over
    /// defaults. Fails on unknown names, kind mismatches, and required
    /// parameters left without a value; an unset required switch is false.
    pub fn resolve(&self, supplied: &ParameterValues) -> Result<ResolvedParameters<'_>, ParamError> {
        if let Some(unknown) = supplied.values.keys().find(|k| self.get(k).is_none()) {
            return Err(ParamError::Unknown(unknown.clone()));
        }

        let mut entries = Vec::with_capacity(self.len());
        for spec in self.iter() {
            let value = match supplied.get(&spec.name) {
                Some(v) => v.cloned(),
                None => spec.default.clone(),
            };
            match &value {
                Some(v) => spec.check_kind(v)?,
                None if !spec.is_optional() && spec.kind != ParamKind::Bool => {
                    return Err(ParamError::MissingRequired(spec.name.clone()));
                }
                None => {}
            }
            entries.push((spec, value));
        }
        Ok(ResolvedParameters { entries })
    }

    /// Resolve `supplied` and translate it into runner flags.
    pub fn build_flags(&self, supplied: &ParameterValues) -> Result<Vec<String>, ParamError> {
        Ok(self.resolve(supplied)?.to_flags())
    }
}

impl<'a> ResolvedParameters<'a> {
    /// Declarations with their effective values.
    pub fn iter(&self) -> impl Iterator<Item = (&'a ParameterSpec, Option<&ParamValue>)> + '_ {
        self.entries.iter().map(|(spec, value)| (*spec, value.as_ref()))
    }

    /// Effective value of `name`, if it has one.
    pub fn value(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(spec, _)| spec.name == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Runner flags for all parameters, concatenated in declared order.
    pub fn to_flags(&self) -> Vec<String> {
        self.iter()
            .flat_map(|(spec, value)| get_flag(spec, value))
            .collect()
    }
}
