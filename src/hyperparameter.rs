//! Hyperparameter search-space algebra
//!
//! Every hyperparameter carries a *normalized* coordinate in `[0, 1]`
//! alongside its search space and boundary policy. All arithmetic is done
//! on the normalized coordinate, so a learning rate in `[1e-6, 1e-2]` and
//! a momentum in `[0.1, 1.0]` cannot be mixed at incompatible scales; the
//! domain value is recovered through the same affine translation on read.
//!
//! Arithmetic between two hyperparameters is only defined when their
//! search spaces are equal; anything else is an [`IncompatibleSpace`]
//! error. Every operation re-applies the constraint to its result, so the
//! coordinate never leaves `[0, 1]`.
//!
//! [`IncompatibleSpace`]: crate::error::PbtError::IncompatibleSpace

use crate::constraint::{translate, Constraint};
use crate::error::{PbtError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

pub const MIN_NORM: f64 = 0.0;
pub const MAX_NORM: f64 = 1.0;

/// A domain-typed hyperparameter value. Continuous parameters read back as
/// `Float`, integer ranges as `Int`, categorical parameters as whichever
/// element the coordinate rounds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
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

/// The search space of a single hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSpace {
    /// Real interval `[min, max]`.
    Continuous { min: f64, max: f64 },
    /// Integer interval `[min, max]`; the normalized coordinate rounds to
    /// the nearest integer on read.
    Integer { min: i64, max: i64 },
    /// Ordered categorical elements; the coordinate maps onto the index
    /// range through the same affine translation as the numeric spaces.
    Discrete { elements: Vec<ParamValue> },
}

impl SearchSpace {
    /// Lower bound in the domain axis (first index for categoricals).
    pub fn lower_bound(&self) -> f64 {
        match self {
            SearchSpace::Continuous { min, .. } => *min,
            SearchSpace::Integer { min, .. } => *min as f64,
            SearchSpace::Discrete { .. } => 0.0,
        }
    }

    /// Upper bound in the domain axis (last index for categoricals).
    pub fn upper_bound(&self) -> f64 {
        match self {
            SearchSpace::Continuous { max, .. } => *max,
            SearchSpace::Integer { max, .. } => *max as f64,
            SearchSpace::Discrete { elements } => (elements.len() - 1) as f64,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            SearchSpace::Continuous { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(PbtError::InvalidSearchSpace(format!(
                        "bounds must be finite, got [{min}, {max}]"
                    )));
                }
                if min > max {
                    return Err(PbtError::InvalidSearchSpace(format!(
                        "the minimum must not exceed the maximum, got [{min}, {max}]"
                    )));
                }
                Ok(())
            }
            SearchSpace::Integer { min, max } => {
                if min > max {
                    return Err(PbtError::InvalidSearchSpace(format!(
                        "the minimum must not exceed the maximum, got [{min}, {max}]"
                    )));
                }
                Ok(())
            }
            SearchSpace::Discrete { elements } => {
                if elements.is_empty() {
                    return Err(PbtError::InvalidSearchSpace(
                        "a categorical search space needs at least one element".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// A single hyperparameter: search space, boundary policy and a normalized
/// coordinate in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameter {
    space: SearchSpace,
    constraint: Constraint,
    normalized: f64,
}

impl Hyperparameter {
    /// A continuous parameter in `[min, max]`, starting at the midpoint of
    /// the space until sampled or assigned.
    pub fn continuous(min: f64, max: f64) -> Result<Self> {
        Self::new(SearchSpace::Continuous { min, max })
    }

    /// A continuous parameter with an explicit initial value. Unlike the
    /// value *setter*, an out-of-range constructor value is rejected.
    pub fn continuous_with(min: f64, max: f64, value: f64) -> Result<Self> {
        let mut hp = Self::new(SearchSpace::Continuous { min, max })?;
        if value < min || value > max {
            return Err(PbtError::InvalidSearchSpace(format!(
                "initial value {value} lies outside [{min}, {max}]"
            )));
        }
        hp.normalized = hp.from_value(&ParamValue::Float(value))?;
        Ok(hp)
    }

    /// An integer-valued parameter in `[min, max]`.
    pub fn integer(min: i64, max: i64) -> Result<Self> {
        Self::new(SearchSpace::Integer { min, max })
    }

    /// A categorical parameter over the given elements.
    pub fn discrete<V: Into<ParamValue>>(elements: Vec<V>) -> Result<Self> {
        Self::new(SearchSpace::Discrete {
            elements: elements.into_iter().map(Into::into).collect(),
        })
    }

    /// A categorical parameter with an explicit initial element, which must
    /// be present in the search space.
    pub fn discrete_with<V: Into<ParamValue>>(elements: Vec<V>, value: V) -> Result<Self> {
        let mut hp = Self::discrete(elements)?;
        let value = value.into();
        hp.normalized = hp.from_value(&value)?;
        Ok(hp)
    }

    fn new(space: SearchSpace) -> Result<Self> {
        space.validate()?;
        Ok(Self {
            space,
            constraint: Constraint::Clip,
            normalized: 0.5 * (MIN_NORM + MAX_NORM),
        })
    }

    /// Replace the boundary policy.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn constraint(&self) -> Constraint {
        self.constraint
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn lower_bound(&self) -> f64 {
        self.space.lower_bound()
    }

    pub fn upper_bound(&self) -> f64 {
        self.space.upper_bound()
    }

    pub fn normalized(&self) -> f64 {
        self.normalized
    }

    /// Set the normalized coordinate. Only finite floats are accepted; the
    /// constraint maps the input back into `[0, 1]`.
    pub fn set_normalized(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(PbtError::NonFinite(value));
        }
        self.normalized = self.constrain(value);
        Ok(())
    }

    /// The domain-typed value the coordinate currently denotes.
    pub fn value(&self) -> ParamValue {
        self.from_normalized(self.normalized)
    }

    /// Set the parameter from a domain value. Out-of-range numeric input is
    /// warned about and constrained; a categorical element must exist in
    /// the search space.
    pub fn set_value(&mut self, value: &ParamValue) -> Result<()> {
        if let SearchSpace::Discrete { elements } = &self.space {
            if !elements.contains(value) {
                return Err(PbtError::InvalidSearchSpace(format!(
                    "the value {value} is not an element of the categorical search space"
                )));
            }
        } else if let Some(v) = value.as_f64() {
            if v < self.lower_bound() || v > self.upper_bound() {
                tracing::warn!(
                    value = v,
                    lower = self.lower_bound(),
                    upper = self.upper_bound(),
                    "value outside the search space, constraining"
                );
            }
        }
        self.normalized = self.constrain(self.from_value(value)?);
        Ok(())
    }

    /// Draw a fresh coordinate uniformly from `[0, 1]`.
    pub fn sample_uniform<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.normalized = rng.gen_range(MIN_NORM..=MAX_NORM);
    }

    /// Map a domain value onto the normalized axis.
    pub fn from_value(&self, value: &ParamValue) -> Result<f64> {
        match &self.space {
            SearchSpace::Continuous { .. } | SearchSpace::Integer { .. } => {
                let v = value.as_f64().ok_or_else(|| {
                    PbtError::InvalidSearchSpace(format!(
                        "numeric search spaces take numeric values, got {value}"
                    ))
                })?;
                Ok(translate(
                    v,
                    self.lower_bound(),
                    self.upper_bound(),
                    MIN_NORM,
                    MAX_NORM,
                ))
            }
            SearchSpace::Discrete { elements } => {
                let index = elements.iter().position(|e| e == value).ok_or_else(|| {
                    PbtError::InvalidSearchSpace(format!(
                        "the value {value} is not an element of the categorical search space"
                    ))
                })?;
                Ok(translate(
                    index as f64,
                    self.lower_bound(),
                    self.upper_bound(),
                    MIN_NORM,
                    MAX_NORM,
                ))
            }
        }
    }

    /// Map a normalized coordinate back to the domain. The constraint is
    /// applied first, so any finite input produces an in-space value.
    pub fn from_normalized(&self, normalized: f64) -> ParamValue {
        let constrained = self.constrain(normalized);
        let translated = translate(
            constrained,
            MIN_NORM,
            MAX_NORM,
            self.lower_bound(),
            self.upper_bound(),
        );
        match &self.space {
            SearchSpace::Continuous { .. } => ParamValue::Float(translated),
            SearchSpace::Integer { .. } => ParamValue::Int(translated.round() as i64),
            SearchSpace::Discrete { elements } => {
                let index = (translated.round() as usize).min(elements.len() - 1);
                elements[index].clone()
            }
        }
    }

    /// True when `other` spans the identical search space.
    pub fn equal_search_space(&self, other: &Hyperparameter) -> bool {
        self.space == other.space
    }

    fn ensure_same_space(&self, other: &Hyperparameter, op: &str) -> Result<()> {
        if self.equal_search_space(other) {
            Ok(())
        } else {
            Err(PbtError::IncompatibleSpace(format!(
                "{op} is not supported for hyperparameters of unequal search spaces"
            )))
        }
    }

    fn constrain(&self, value: f64) -> f64 {
        self.constraint.apply(value, MIN_NORM, MAX_NORM)
    }

    fn derive(&self, normalized: f64) -> Hyperparameter {
        let mut out = self.clone();
        out.normalized = self.constrain(normalized);
        out
    }

    pub fn checked_add(&self, other: &Hyperparameter) -> Result<Hyperparameter> {
        self.ensure_same_space(other, "addition")?;
        Ok(self.derive(self.normalized + other.normalized))
    }

    pub fn checked_sub(&self, other: &Hyperparameter) -> Result<Hyperparameter> {
        self.ensure_same_space(other, "subtraction")?;
        Ok(self.derive(self.normalized - other.normalized))
    }

    pub fn checked_mul(&self, other: &Hyperparameter) -> Result<Hyperparameter> {
        self.ensure_same_space(other, "multiplication")?;
        Ok(self.derive(self.normalized * other.normalized))
    }

    pub fn checked_div(&self, other: &Hyperparameter) -> Result<Hyperparameter> {
        self.ensure_same_space(other, "division")?;
        Ok(self.derive(self.normalized / other.normalized))
    }

    pub fn checked_pow(&self, other: &Hyperparameter) -> Result<Hyperparameter> {
        self.ensure_same_space(other, "exponentiation")?;
        Ok(self.derive(self.normalized.powf(other.normalized)))
    }

    /// Raise the normalized coordinate to a scalar power.
    pub fn powf(&self, exponent: f64) -> Hyperparameter {
        self.derive(self.normalized.powf(exponent))
    }
}

impl PartialEq for Hyperparameter {
    /// Equality requires equal search spaces and equal coordinates.
    fn eq(&self, other: &Self) -> bool {
        self.space == other.space && self.normalized == other.normalized
    }
}

impl PartialOrd for Hyperparameter {
    /// Comparison is only defined within one search space.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.equal_search_space(other) {
            return None;
        }
        self.normalized.partial_cmp(&other.normalized)
    }
}

impl Add<f64> for &Hyperparameter {
    type Output = Hyperparameter;

    fn add(self, rhs: f64) -> Hyperparameter {
        self.derive(self.normalized + rhs)
    }
}

impl Sub<f64> for &Hyperparameter {
    type Output = Hyperparameter;

    fn sub(self, rhs: f64) -> Hyperparameter {
        self.derive(self.normalized - rhs)
    }
}

impl Mul<f64> for &Hyperparameter {
    type Output = Hyperparameter;

    fn mul(self, rhs: f64) -> Hyperparameter {
        self.derive(self.normalized * rhs)
    }
}

impl Div<f64> for &Hyperparameter {
    type Output = Hyperparameter;

    /// Division by zero saturates through the constraint rather than
    /// escaping the coordinate window.
    fn div(self, rhs: f64) -> Hyperparameter {
        self.derive(self.normalized / rhs)
    }
}

impl fmt::Display for Hyperparameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v: {}, n: {:.3} U({},{})",
            self.value(),
            self.normalized,
            self.lower_bound(),
            self.upper_bound()
        )
    }
}

/// An insertion-ordered named group of hyperparameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    entries: Vec<(String, Hyperparameter)>,
}

impl ParamGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name; insertion order is preserved.
    pub fn insert(&mut self, name: impl Into<String>, hp: Hyperparameter) -> &mut Self {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = hp;
        } else {
            self.entries.push((name, hp));
        }
        self
    }

    /// Builder-style insert for literal group definitions.
    pub fn with(mut self, name: impl Into<String>, hp: Hyperparameter) -> Self {
        self.insert(name, hp);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Hyperparameter> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Hyperparameter> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Hyperparameter)> {
        self.entries.iter().map(|(n, h)| (n.as_str(), h))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Hyperparameter)> {
        self.entries.iter_mut().map(|(n, h)| (n.as_str(), h))
    }
}

/// The full hyperparameter vector of a member: three ordered groups
/// (`general`, `model`, `optimizer`), iterated group-by-group in insertion
/// order. Addressable flat by integer or by `"group/name"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    general: ParamGroup,
    model: ParamGroup,
    optimizer: ParamGroup,
}

impl Hyperparameters {
    pub fn new(general: ParamGroup, model: ParamGroup, optimizer: ParamGroup) -> Result<Self> {
        if general.is_empty() && model.is_empty() && optimizer.is_empty() {
            return Err(PbtError::Configuration(
                "at least one hyperparameter group must be non-empty".into(),
            ));
        }
        Ok(Self {
            general,
            model,
            optimizer,
        })
    }

    fn groups(&self) -> [(&'static str, &ParamGroup); 3] {
        [
            ("general", &self.general),
            ("model", &self.model),
            ("optimizer", &self.optimizer),
        ]
    }

    fn groups_mut(&mut self) -> [(&'static str, &mut ParamGroup); 3] {
        [
            ("general", &mut self.general),
            ("model", &mut self.model),
            ("optimizer", &mut self.optimizer),
        ]
    }

    pub fn len(&self) -> usize {
        self.general.len() + self.model.len() + self.optimizer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat iteration: group order, then insertion order within the group.
    pub fn iter(&self) -> impl Iterator<Item = (String, &Hyperparameter)> {
        self.groups().into_iter().flat_map(|(group, params)| {
            params
                .entries
                .iter()
                .map(move |(name, hp)| (format!("{group}/{name}"), hp))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (String, &mut Hyperparameter)> {
        self.groups_mut().into_iter().flat_map(|(group, params)| {
            params
                .entries
                .iter_mut()
                .map(move |(name, hp)| (format!("{group}/{name}"), hp))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|(key, _)| key)
    }

    fn split_key<'k>(key: &'k str) -> Result<(&'k str, &'k str)> {
        let mut parts = key.splitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(group), Some(name)) if !group.is_empty() && !name.is_empty() => {
                Ok((group, name))
            }
            _ => Err(PbtError::Configuration(format!(
                "bad hyperparameter key '{key}', use 'group/name'"
            ))),
        }
    }

    fn group(&self, name: &str) -> Result<&ParamGroup> {
        match name {
            "general" => Ok(&self.general),
            "model" => Ok(&self.model),
            "optimizer" => Ok(&self.optimizer),
            other => Err(PbtError::Configuration(format!(
                "no hyperparameter group named '{other}'"
            ))),
        }
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut ParamGroup> {
        match name {
            "general" => Ok(&mut self.general),
            "model" => Ok(&mut self.model),
            "optimizer" => Ok(&mut self.optimizer),
            other => Err(PbtError::Configuration(format!(
                "no hyperparameter group named '{other}'"
            ))),
        }
    }

    /// Look up by `"group/name"`.
    pub fn get(&self, key: &str) -> Result<&Hyperparameter> {
        let (group, name) = Self::split_key(key)?;
        self.group(group)?.get(name).ok_or_else(|| {
            PbtError::Configuration(format!("hyperparameter '{name}' does not exist in '{group}'"))
        })
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut Hyperparameter> {
        let (group, name) = Self::split_key(key)?;
        self.group_mut(group)?.get_mut(name).ok_or_else(|| {
            PbtError::Configuration(format!("hyperparameter '{name}' does not exist in '{group}'"))
        })
    }

    /// Flat integer indexing over the deterministic iteration order.
    pub fn get_index(&self, index: usize) -> Option<&Hyperparameter> {
        self.iter().nth(index).map(|(_, hp)| hp)
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut Hyperparameter> {
        self.iter_mut().nth(index).map(|(_, hp)| hp)
    }

    /// Redraw every coordinate uniformly.
    pub fn sample_uniform<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for (_, hp) in self.iter_mut() {
            hp.sample_uniform(rng);
        }
    }

    /// The normalized coordinates in iteration order; the vector evolvers
    /// operate on.
    pub fn vector(&self) -> Vec<f64> {
        self.iter().map(|(_, hp)| hp.normalized()).collect()
    }

    /// Write back a coordinate vector, re-applying each parameter's own
    /// constraint. The arity must match.
    pub fn set_vector(&mut self, coordinates: &[f64]) -> Result<()> {
        if coordinates.len() != self.len() {
            return Err(PbtError::Configuration(format!(
                "coordinate vector of arity {} does not match {} hyperparameters",
                coordinates.len(),
                self.len()
            )));
        }
        for ((_, hp), &coordinate) in self.iter_mut().zip(coordinates) {
            hp.set_normalized(coordinate)?;
        }
        Ok(())
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, hp) in self.iter() {
            writeln!(f, "{key}: {hp}")?;
        }
        Ok(())
    }
}
