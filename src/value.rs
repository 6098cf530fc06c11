//! Cell values flowing through every pipeline stage.
//!
//! A cell is a [`TableValue`]: a present scalar, a multiselect list, one of
//! two missing markers, or an error that travels with the data until it is
//! reported at persistence time.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Runtime type of a scalar value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Str,
    Int,
    Real,
    Bool,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Str => "str",
            ValueType::Int => "int",
            ValueType::Real => "real",
            ValueType::Bool => "bool",
        };
        write!(f, "{}", name)
    }
}

/// A scalar held by a cell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::Str,
            Value::Int(_) => ValueType::Int,
            Value::Real(_) => ValueType::Real,
            Value::Bool(_) => ValueType::Bool,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Position of the variant in the total order across types
    fn rank(&self) -> u8 {
        match self {
            Value::Str(_) => 0,
            Value::Int(_) => 1,
            Value::Real(_) => 2,
            Value::Bool(_) => 3,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Str(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Real(r) => r.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Why a cell holds an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ColumnNotFoundInRow,
    LookupSanitizerMiss,
    IncorrectType,
    MissingCode,
    ValuesAlreadyExistInRow,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ColumnNotFoundInRow => "ColumnNotFoundInRow",
            ErrorKind::LookupSanitizerMiss => "LookupSanitizerMiss",
            ErrorKind::IncorrectType => "IncorrectType",
            ErrorKind::MissingCode => "MissingCode",
            ErrorKind::ValuesAlreadyExistInRow => "ValuesAlreadyExistInRow",
        };
        write!(f, "{}", name)
    }
}

/// Error carried inside a cell
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl CellError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

/// The universal cell type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TableValue {
    /// A single present value
    Some(Value),
    /// Several values, e.g. the checked boxes of a multiselect question
    Multi(Vec<Value>),
    /// No answer was given
    Omitted,
    /// A value exists but was deliberately erased
    Redacted,
    /// Something went wrong producing this cell
    Error(CellError),
}

impl TableValue {
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        TableValue::Error(CellError::new(kind, detail))
    }

    /// `Some(text)` for non-empty text, otherwise the given missing marker
    pub fn text_or(text: &str, missing: TableValue) -> Self {
        if text.is_empty() {
            missing
        } else {
            TableValue::Some(Value::Str(text.to_string()))
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TableValue::Error(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TableValue::Error(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Short variant name used in error details
    pub fn variant_name(&self) -> &'static str {
        match self {
            TableValue::Some(_) => "Some",
            TableValue::Multi(_) => "Multi",
            TableValue::Omitted => "Omitted",
            TableValue::Redacted => "Redacted",
            TableValue::Error(_) => "Error",
        }
    }

    /// Merge two cells.
    ///
    /// Errors win (left first). Present values merge into `Multi`. Mixing a
    /// missing marker with anything else is an `IncorrectType` error.
    pub fn combine(&self, other: &TableValue) -> TableValue {
        match (self, other) {
            (TableValue::Error(_), _) => self.clone(),
            (_, TableValue::Error(_)) => other.clone(),
            (TableValue::Omitted, TableValue::Omitted) => TableValue::Omitted,
            (TableValue::Redacted, TableValue::Redacted) => TableValue::Redacted,
            (
                TableValue::Some(_) | TableValue::Multi(_),
                TableValue::Some(_) | TableValue::Multi(_),
            ) => {
                let mut members = self.members();
                members.extend(other.members());
                TableValue::Multi(members)
            }
            _ => TableValue::error(
                ErrorKind::IncorrectType,
                format!(
                    "cannot combine {} with {}",
                    self.variant_name(),
                    other.variant_name()
                ),
            ),
        }
    }

    fn members(&self) -> Vec<Value> {
        match self {
            TableValue::Some(v) => vec![v.clone()],
            TableValue::Multi(vs) => vs.clone(),
            _ => Vec::new(),
        }
    }

    /// Type-checked monadic bind.
    ///
    /// `f` only ever sees values of `expected` type. `Multi` is mapped
    /// element-wise and stays a `Multi`; missing markers and errors pass
    /// through untouched.
    pub fn bind<F>(&self, f: F, expected: ValueType) -> TableValue
    where
        F: Fn(&Value) -> TableValue,
    {
        let apply = |v: &Value| {
            if v.value_type() == expected {
                f(v)
            } else {
                TableValue::error(
                    ErrorKind::IncorrectType,
                    format!("expected {} but found {}", expected, v.value_type()),
                )
            }
        };

        match self {
            TableValue::Some(v) => apply(v),
            TableValue::Multi(vs) => vs
                .iter()
                .fold(TableValue::Multi(Vec::new()), |acc, v| acc.combine(&apply(v))),
            _ => self.clone(),
        }
    }

    /// Map values through `map`; keys missing from the map are `MissingCode`
    pub fn lookup(&self, map: &HashMap<Value, Value>, expected: ValueType) -> TableValue {
        self.bind(
            |v| match map.get(v) {
                Some(mapped) => TableValue::Some(mapped.clone()),
                None => TableValue::error(ErrorKind::MissingCode, format!("no code for '{}'", v)),
            },
            expected,
        )
    }

    /// Map values through `map`; keys missing from the map pass through
    pub fn lookup_with_default(&self, map: &HashMap<Value, Value>, expected: ValueType) -> TableValue {
        self.bind(
            |v| TableValue::Some(map.get(v).unwrap_or(v).clone()),
            expected,
        )
    }

    /// Require a single value of the given type
    pub fn assert_type(&self, expected: ValueType) -> TableValue {
        match self {
            TableValue::Some(v) if v.value_type() == expected => self.clone(),
            TableValue::Some(v) => TableValue::error(
                ErrorKind::IncorrectType,
                format!("expected {} but found {}", expected, v.value_type()),
            ),
            TableValue::Multi(_) => TableValue::error(
                ErrorKind::IncorrectType,
                format!("expected a single {} but found a list", expected),
            ),
            _ => self.clone(),
        }
    }

    /// Require a list of values of the given type; a lone value becomes a list of one
    pub fn assert_type_seq(&self, expected: ValueType) -> TableValue {
        match self {
            TableValue::Some(v) if v.value_type() == expected => TableValue::Multi(vec![v.clone()]),
            TableValue::Multi(vs) => match vs.iter().find(|v| v.value_type() != expected) {
                Some(bad) => TableValue::error(
                    ErrorKind::IncorrectType,
                    format!("expected a list of {} but found {}", expected, bad.value_type()),
                ),
                None => self.clone(),
            },
            TableValue::Some(v) => TableValue::error(
                ErrorKind::IncorrectType,
                format!("expected a list of {} but found {}", expected, v.value_type()),
            ),
            _ => self.clone(),
        }
    }
}

impl From<Value> for TableValue {
    fn from(v: Value) -> Self {
        TableValue::Some(v)
    }
}
