//! Declarative attribute queries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::DataSet;
use crate::poller::PollError;
use crate::protocol::ResourceName;

/// Default plugin name reported when a query names none.
pub const DEFAULT_PLUGIN: &str = "FastJMX";

/// Dot-separated path to one sub-value: the attribute (or zero-argument
/// operation) name, followed by field names inside structured values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttributePath {
    segments: Vec<String>,
}

impl AttributePath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Attribute or operation read from the resource.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }
}

impl FromStr for AttributePath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(format!("invalid attribute path '{s}': empty segment"));
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for AttributePath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttributePath> for String {
    fn from(value: AttributePath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// A declarative query: which resources to match, which sub-values to read
/// from each and how to name the resulting samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeQuery {
    /// Unique name, referenced by hosts.
    pub name: String,
    /// Resource name or pattern matched on discovery.
    pub resource: ResourceName,
    /// One path per sub-value, in declared order.
    pub attributes: Vec<AttributePath>,
    /// Pivot structured sub-values into one sample per field.
    #[serde(default, alias = "composite")]
    pub table: bool,
    /// Sample type and one data source kind per sub-value.
    pub dataset: DataSet,
    #[serde(default)]
    pub plugin_name: Option<String>,
    /// Key properties feeding the plugin instance, in order.
    #[serde(default)]
    pub instance_from: Vec<String>,
    #[serde(default)]
    pub instance_prefix: Option<String>,
    /// Key properties feeding the type instance, in order.
    #[serde(default)]
    pub value_instance_from: Vec<String>,
    #[serde(default)]
    pub value_instance_prefix: Option<String>,
}

impl AttributeQuery {
    /// Create a scalar query reading `attributes` from resources matching `resource`.
    pub fn new(
        name: impl Into<String>,
        resource: ResourceName,
        attributes: Vec<AttributePath>,
        dataset: DataSet,
    ) -> Self {
        Self {
            name: name.into(),
            resource,
            attributes,
            table: false,
            dataset,
            plugin_name: None,
            instance_from: Vec::new(),
            instance_prefix: None,
            value_instance_from: Vec::new(),
            value_instance_prefix: None,
        }
    }

    /// Set table mode.
    pub fn with_table(mut self, table: bool) -> Self {
        self.table = table;
        self
    }

    /// Set the plugin name.
    pub fn with_plugin_name(mut self, plugin: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin.into());
        self
    }

    /// Set the plugin instance naming rule.
    pub fn with_instance_from<I, S>(mut self, prefix: Option<&str>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_prefix = prefix.map(str::to_string);
        self.instance_from = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Set the type instance naming rule.
    pub fn with_value_instance_from<I, S>(mut self, prefix: Option<&str>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_instance_prefix = prefix.map(str::to_string);
        self.value_instance_from = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Plugin name reported on samples.
    pub fn plugin(&self) -> &str {
        self.plugin_name.as_deref().unwrap_or(DEFAULT_PLUGIN)
    }

    /// Validate the query.
    ///
    /// # Errors
    /// Returns `PollError::Config` if the name is empty, no sub-value is
    /// declared, or the data set does not declare one kind per sub-value.
    pub fn validate(&self) -> Result<(), PollError> {
        if self.name.trim().is_empty() {
            return Err(PollError::Config("query name must not be empty".into()));
        }
        if self.attributes.is_empty() {
            return Err(PollError::Config(format!(
                "query '{}' declares no attributes",
                self.name
            )));
        }
        if self.dataset.sources.len() != self.attributes.len() {
            return Err(PollError::Config(format!(
                "query '{}' reads {} attributes but data set '{}' declares {} sources",
                self.name,
                self.attributes.len(),
                self.dataset.type_name,
                self.dataset.sources.len()
            )));
        }
        Ok(())
    }
}
