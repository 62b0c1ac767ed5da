//! Runtime values produced by extraction and consumed by the formula compiler.
//!
//! Mirrors the shape of `imacs::spec::ConditionValue` from the teacher
//! crate (an untagged, serde-friendly sum type) but adds the sorts the
//! Extraction Engine actually produces: dates and enum labels.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A declared variable sort. Only these three reach the solver; string,
/// date, enum-label and list values are extraction-time conveniences that
/// must be coerced or defaulted before a constraint can bind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    Bool,
    Int,
    Real,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "bool"),
            Sort::Int => write!(f, "int"),
            Sort::Real => write!(f, "real"),
        }
    }
}

/// A value produced by the Extraction Engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    String(String),
    Date(NaiveDate),
    /// The matched label of an `enum` extractor.
    EnumLabel(String),
    List(Vec<Value>),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::EnumLabel(s) => write!(f, "{s}"),
            Value::List(items) => {
                let parts: Vec<_> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Null => write!(f, "null"),
        }
    }
}

impl Value {
    /// Coerce to the declared sort, per spec.md §4.1:
    /// bool→Bool; int→Int (float truncated, bool→0/1); real→Real
    /// (bool→0/1, int→real). Returns `None` when there is no coercion
    /// path (strings, nulls, dates, lists to numeric/boolean sorts).
    pub fn coerce(&self, sort: Sort) -> Option<CoercedValue> {
        match (sort, self) {
            (Sort::Bool, Value::Bool(b)) => Some(CoercedValue::Bool(*b)),
            (Sort::Int, Value::Int(i)) => Some(CoercedValue::Int(*i)),
            (Sort::Int, Value::Real(r)) => Some(CoercedValue::Int(r.trunc() as i64)),
            (Sort::Int, Value::Bool(b)) => Some(CoercedValue::Int(if *b { 1 } else { 0 })),
            (Sort::Real, Value::Real(r)) => Some(CoercedValue::Real(*r)),
            (Sort::Real, Value::Int(i)) => Some(CoercedValue::Real(*i as f64)),
            (Sort::Real, Value::Bool(b)) => Some(CoercedValue::Real(if *b { 1.0 } else { 0.0 })),
            _ => None,
        }
    }

    /// The typed default for a sort, used when extraction misses or
    /// coercion fails (spec.md §4.3 step 1).
    pub fn default_for(sort: Sort) -> CoercedValue {
        match sort {
            Sort::Bool => CoercedValue::Bool(false),
            Sort::Int => CoercedValue::Int(0),
            Sort::Real => CoercedValue::Real(0.0),
        }
    }
}

/// A [`Value`] that has been successfully coerced to a solver sort.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoercedValue {
    Bool(bool),
    Int(i64),
    Real(f64),
}

impl CoercedValue {
    pub fn sort(&self) -> Sort {
        match self {
            CoercedValue::Bool(_) => Sort::Bool,
            CoercedValue::Int(_) => Sort::Int,
            CoercedValue::Real(_) => Sort::Real,
        }
    }
}

/// A warning produced when a variable could not be extracted or coerced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    pub variable: String,
    pub reason: String,
}

impl Warning {
    pub fn new(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            reason: reason.into(),
        }
    }
}

/// The per-request binding from variable name to [`Value`], plus the
/// warnings accumulated while producing it (spec.md §3, "Environment").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub values: HashMap<String, Value>,
    pub warnings: Vec<Warning>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn warn(&mut self, variable: impl Into<String>, reason: impl Into<String>) {
        self.warnings.push(Warning::new(variable, reason));
    }

    /// Resolve a declared variable to a solver-ready value, substituting
    /// the typed default and recording a warning on any miss or
    /// coercion failure. This is the environment-restriction step used
    /// by both the compiler (to report free variables) and the verifier
    /// (spec.md §4.3 step 1).
    pub fn resolve(&mut self, name: &str, sort: Sort) -> CoercedValue {
        match self.values.get(name) {
            Some(value) => match value.coerce(sort) {
                Some(coerced) => coerced,
                None => {
                    self.warn(
                        name,
                        format!("extracted value {value} is not compatible with sort {sort}"),
                    );
                    Value::default_for(sort)
                }
            },
            None => {
                self.warn(name, "no value extracted for this variable");
                Value::default_for(sort)
            }
        }
    }
}
