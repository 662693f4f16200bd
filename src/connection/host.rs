//! Remote host identity.

use std::fmt;

use crate::protocol::{Credentials, ServiceUrl};

/// Identity of one remote management endpoint.
///
/// Equality and hashing cover every field, so two hosts sharing a URL but
/// differing in credentials or instance prefix are distinct.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RemoteHost {
    pub url: ServiceUrl,
    /// Host name reported on every sample.
    pub hostname: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Leading segment of every plugin instance polled from this host.
    pub instance_prefix: Option<String>,
}

impl RemoteHost {
    pub fn new(url: ServiceUrl, hostname: impl Into<String>) -> Self {
        Self {
            url,
            hostname: hostname.into(),
            username: None,
            password: None,
            instance_prefix: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_instance_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.instance_prefix = Some(prefix.into());
        self
    }

    pub fn raw_url(&self) -> &str {
        self.url.as_str()
    }

    /// Credentials to present, only when both username and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("url", &self.url.as_str())
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("instance_prefix", &self.instance_prefix)
            .finish()
    }
}
