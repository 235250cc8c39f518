//! Test environment factory
//!
//! Reads the connection string from `TEST_CSM_ORGID_AUTHENTICATION`
//! (`SubscriptionId=...;AADTenant=...;BaseUri=...;RawToken=...`) and turns
//! it into a [`TestEnvironment`]. Initialize hooks may override any key.

use std::collections::BTreeMap;

/// Environment variable holding the connection string
pub const CONNECTION_STRING_ENV: &str = "TEST_CSM_ORGID_AUTHENTICATION";

pub const SUBSCRIPTION_ID: &str = "SubscriptionId";
pub const TENANT_ID: &str = "AADTenant";
pub const BASE_URI: &str = "BaseUri";
pub const RAW_TOKEN: &str = "RawToken";
pub const USER_ID: &str = "UserId";

const DEFAULT_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
const DEFAULT_TENANT: &str = "common";
const DEFAULT_BASE_URI: &str = "https://management.azure.com/";

/// Credentials and endpoints the clients are built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEnvironment {
    pub subscription_id: String,
    pub tenant_id: String,
    pub base_uri: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
}

/// Produces test environments from a connection string plus overrides
#[derive(Debug, Clone, Default)]
pub struct EnvironmentFactory {
    values: BTreeMap<String, String>,
}

impl EnvironmentFactory {
    /// Factory populated from `TEST_CSM_ORGID_AUTHENTICATION`, if set
    pub fn from_env() -> Self {
        match std::env::var(CONNECTION_STRING_ENV) {
            Ok(s) => Self::from_connection_string(&s),
            Err(_) => Self::default(),
        }
    }

    pub fn from_connection_string(connection_string: &str) -> Self {
        Self {
            values: parse_connection_string(connection_string),
        }
    }

    /// Override a connection string key
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(canonical_key(key), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&canonical_key(key)).map(String::as_str)
    }

    /// Build the environment, filling unset keys with placeholders
    pub fn environment(&self) -> TestEnvironment {
        let mut base_uri = self.get(BASE_URI).unwrap_or(DEFAULT_BASE_URI).to_string();
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }

        TestEnvironment {
            subscription_id: self
                .get(SUBSCRIPTION_ID)
                .unwrap_or(DEFAULT_SUBSCRIPTION)
                .to_string(),
            tenant_id: self.get(TENANT_ID).unwrap_or(DEFAULT_TENANT).to_string(),
            base_uri,
            token: self.get(RAW_TOKEN).map(str::to_string),
            user_id: self.get(USER_ID).map(str::to_string),
        }
    }
}

/// Keys are case-insensitive; store them lowercase
fn canonical_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

fn parse_connection_string(s: &str) -> BTreeMap<String, String> {
    s.split(';')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (canonical_key(key), value.trim().to_string()))
        .collect()
}
