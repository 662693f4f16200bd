//! Runtime values read from a managed resource.
//!
//! Reads return a [`Value`] whose shape is only known at runtime. The path
//! resolver and the numeric coercion both operate purely over this union;
//! [`ObjectValue`] is the single adapter for arbitrary objects whose fields
//! can only be reached through generic field access.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A runtime value of a managed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    BigInteger(ExactNumber),
    BigDecimal(ExactNumber),
    String(String),
    /// Structured value with named fields.
    Composite(CompositeValue),
    /// A type descriptor returned in place of data.
    OpenType(String),
    /// Arbitrary object reachable only through generic field access.
    Object(ObjectValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_composite(&self) -> Option<&CompositeValue> {
        match self {
            Self::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// Short runtime type name, used in diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "Boolean",
            Self::Byte(_) => "Byte",
            Self::Short(_) => "Short",
            Self::Int(_) => "Integer",
            Self::Long(_) => "Long",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::BigInteger(_) => "BigInteger",
            Self::BigDecimal(_) => "BigDecimal",
            Self::String(_) => "String",
            Self::Composite(_) => "CompositeData",
            Self::OpenType(_) => "OpenType",
            Self::Object(o) => &o.class_name,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<CompositeValue> for Value {
    fn from(v: CompositeValue) -> Self {
        Self::Composite(v)
    }
}

/// Structured value: named fields plus the name of its type descriptor.
///
/// The key set of the type descriptor is the set of field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeValue {
    pub type_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl CompositeValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field names declared by the type descriptor, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// An object outside the open-type system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub class_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl ObjectValue {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Generic field access by declared field name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Arbitrary-precision decimal number kept in its exact textual form.
///
/// Accepts an optional sign, digits, an optional fraction and an optional
/// exponent (`-12`, `3.50`, `1.2E+7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExactNumber(String);

impl ExactNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Nearest `f64`, for consumers that cannot carry exact numbers.
    pub fn to_f64(&self) -> f64 {
        self.0.parse().unwrap_or(f64::NAN)
    }
}

impl FromStr for ExactNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
        let (mantissa, exponent) = match digits.split_once(['e', 'E']) {
            Some((m, e)) => (m, Some(e)),
            None => (digits, None),
        };
        let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));

        let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        let valid_exponent = exponent.is_none_or(|e| {
            let e = e.strip_prefix(['-', '+']).unwrap_or(e);
            !e.is_empty() && all_digits(e)
        });

        if (int.is_empty() && frac.is_empty()) || !all_digits(int) || !all_digits(frac) || !valid_exponent
        {
            return Err(format!("not a decimal number: '{s}'"));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ExactNumber {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExactNumber> for String {
    fn from(n: ExactNumber) -> Self {
        n.0
    }
}

impl fmt::Display for ExactNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
