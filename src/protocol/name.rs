//! Structured resource names (`domain:key=value,...`).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the server delegate that broadcasts registration notifications.
pub const DELEGATE_NAME: &str = "JMImplementation:type=MBeanServerDelegate";

/// Errors produced while parsing a [`ResourceName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameParseError {
    #[error("missing ':' domain separator in '{0}'")]
    MissingDomain(String),

    #[error("no key properties in '{0}'")]
    MissingProperties(String),

    #[error("invalid key property '{property}' in '{name}'")]
    InvalidProperty { name: String, property: String },

    #[error("duplicate key '{key}' in '{name}'")]
    DuplicateKey { name: String, key: String },
}

/// An immutable resource identifier with ordered key properties.
///
/// Equality, ordering and hashing use the canonical form, where the key
/// properties are sorted by key. `java.lang:type=GarbageCollector,name=G1`
/// and `java.lang:name=G1,type=GarbageCollector` are the same resource.
///
/// A name is a *pattern* when its domain or a property value contains `*` or
/// `?`, or when its property list ends with `,*`. Patterns are used as
/// discovery queries via [`ResourceName::matches`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName {
    domain: String,
    properties: Vec<(String, String)>,
    property_pattern: bool,
    canonical: String,
}

impl ResourceName {
    /// Parse a resource name or pattern.
    pub fn parse(input: &str) -> Result<Self, NameParseError> {
        let (domain, props) = input
            .split_once(':')
            .ok_or_else(|| NameParseError::MissingDomain(input.to_string()))?;

        let mut properties: Vec<(String, String)> = Vec::new();
        let mut property_pattern = false;

        let entries: Vec<&str> = props.split(',').collect();
        for (i, entry) in entries.iter().enumerate() {
            let entry = entry.trim();
            if entry == "*" && i + 1 == entries.len() {
                property_pattern = true;
                continue;
            }

            let (key, value) = entry
                .split_once('=')
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| NameParseError::InvalidProperty {
                    name: input.to_string(),
                    property: entry.to_string(),
                })?;

            if properties.iter().any(|(k, _)| k == key) {
                return Err(NameParseError::DuplicateKey {
                    name: input.to_string(),
                    key: key.to_string(),
                });
            }
            properties.push((key.to_string(), value.to_string()));
        }

        if properties.is_empty() && !property_pattern {
            return Err(NameParseError::MissingProperties(input.to_string()));
        }

        let canonical = canonical_form(domain, &properties, property_pattern);
        Ok(Self {
            domain: domain.to_string(),
            properties,
            property_pattern,
            canonical,
        })
    }

    /// The server delegate name.
    pub fn delegate() -> Self {
        // The constant is a well-formed name; parsing cannot fail.
        Self::parse(DELEGATE_NAME).unwrap_or_else(|_| Self {
            domain: "JMImplementation".to_string(),
            properties: vec![("type".to_string(), "MBeanServerDelegate".to_string())],
            property_pattern: false,
            canonical: DELEGATE_NAME.to_string(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Key properties in the order they were written.
    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Value of a key property, if present.
    pub fn key_property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Canonical string form (key properties sorted by key).
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn is_pattern(&self) -> bool {
        self.property_pattern
            || has_wildcard(&self.domain)
            || self.properties.iter().any(|(_, v)| has_wildcard(v))
    }

    /// Whether `name` is selected by this pattern.
    ///
    /// A non-pattern name only matches itself.
    pub fn matches(&self, name: &ResourceName) -> bool {
        if !glob_match(&self.domain, &name.domain) {
            return false;
        }

        if !self.property_pattern && self.properties.len() != name.properties.len() {
            return false;
        }

        self.properties.iter().all(|(key, pattern)| {
            name.key_property(key)
                .is_some_and(|value| glob_match(pattern, value))
        })
    }
}

fn canonical_form(domain: &str, properties: &[(String, String)], pattern: bool) -> String {
    let mut sorted: Vec<&(String, String)> = properties.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = format!("{domain}:");
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&joined);
    if pattern {
        if !joined.is_empty() {
            out.push(',');
        }
        out.push('*');
    }
    out
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?'])
}

/// Glob match supporting `*` (any run) and `?` (any single char).
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

impl FromStr for ResourceName {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = NameParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.to_string()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        for (i, (k, v)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        if self.property_pattern {
            if !self.properties.is_empty() {
                f.write_str(",")?;
            }
            f.write_str("*")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceName({self})")
    }
}

impl PartialEq for ResourceName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ResourceName {}

impl Hash for ResourceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for ResourceName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}
