//! Proxy authentication settings
//!
//! Only the configuration values live here; credential checks happen in
//! the frontend that accepts client connections.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A user allowed to connect through the proxy
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUser {
    pub password: String,
    /// Schemas this user may use; empty means all
    #[serde(default)]
    pub authorized_schemas: BTreeSet<String>,
}

impl ProxyUser {
    pub fn new(password: impl Into<String>, authorized_schemas: impl IntoIterator<Item = String>) -> Self {
        Self {
            password: password.into(),
            authorized_schemas: authorized_schemas.into_iter().collect(),
        }
    }

    pub fn is_authorized(&self, schema: &str) -> bool {
        self.authorized_schemas.is_empty() || self.authorized_schemas.contains(schema)
    }
}

impl fmt::Debug for ProxyUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyUser")
            .field("password", &"****")
            .field("authorized_schemas", &self.authorized_schemas)
            .finish()
    }
}

/// Users known to the proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default)]
    pub users: BTreeMap<String, ProxyUser>,
}

impl Authentication {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: impl Into<String>, user: ProxyUser) -> Self {
        self.users.insert(name.into(), user);
        self
    }

    pub fn find_user(&self, name: &str) -> Option<&ProxyUser> {
        self.users.get(name)
    }

    pub fn user_names(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }
}
