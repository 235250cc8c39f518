//! Record matching policy
//!
//! Requests are matched against recorded entries by method and URI. Some
//! providers are called with whatever api-version the installed SDK picks,
//! so for those the `api-version` query parameter is dropped before the
//! key is computed.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::record::HttpRequest;
use crate::common::config::MatcherConfig;

const API_VERSION: &str = "api-version";

/// Which request fields are ignored when matching recorded traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherPolicy {
    ignore_resources_client: bool,
    /// Provider namespace (lowercase) -> api-version, `None` = any version
    ignored_providers: BTreeMap<String, Option<String>>,
    /// User-agent fragment -> api-version
    api_exclusions: BTreeMap<String, String>,
}

impl Default for MatcherPolicy {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}

impl MatcherPolicy {
    /// Build a policy from the `[matcher]` config section
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self {
            ignore_resources_client: config.ignore_resources_client,
            ignored_providers: config
                .ignored_providers
                .iter()
                .map(|(ns, version)| {
                    let version = (!version.trim().is_empty()).then(|| version.trim().to_string());
                    (ns.to_ascii_lowercase(), version)
                })
                .collect(),
            api_exclusions: config.api_exclusions.clone(),
        }
    }

    /// A policy that ignores nothing
    pub fn strict() -> Self {
        Self {
            ignore_resources_client: false,
            ignored_providers: BTreeMap::new(),
            api_exclusions: BTreeMap::new(),
        }
    }

    /// Key under which a request is stored and looked up
    pub fn matching_key(&self, request: &HttpRequest) -> String {
        let uri = self.normalized_uri(request);
        format!(
            "{} {}",
            request.method.to_ascii_uppercase(),
            STANDARD.encode(uri.as_bytes())
        )
    }

    /// The request URI with ignored parts removed
    pub fn normalized_uri(&self, request: &HttpRequest) -> String {
        let (path, query) = match request.uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request.uri.as_str(), None),
        };
        let Some(query) = query else {
            return request.uri.clone();
        };

        let api_version = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| name.eq_ignore_ascii_case(API_VERSION))
            .map(|(_, value)| value);

        let Some(api_version) = api_version else {
            return request.uri.clone();
        };

        if !self.ignores_api_version(path, api_version, request.header_value("User-Agent")) {
            return request.uri.clone();
        }

        let remaining: Vec<&str> = query
            .split('&')
            .filter(|pair| {
                let name = pair.split_once('=').map(|(n, _)| n).unwrap_or(pair);
                !name.eq_ignore_ascii_case(API_VERSION)
            })
            .collect();

        if remaining.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, remaining.join("&"))
        }
    }

    fn ignores_api_version(&self, path: &str, api_version: &str, user_agent: Option<&str>) -> bool {
        let lower = path.to_ascii_lowercase();

        match provider_namespace(&lower) {
            Some(namespace) => {
                if let Some(version) = self.ignored_providers.get(namespace) {
                    if version.as_deref().map_or(true, |v| v == api_version) {
                        return true;
                    }
                }
            }
            // Subscription and resource group calls made by the resources client
            None => {
                if self.ignore_resources_client && lower.contains("/subscriptions/") {
                    return true;
                }
            }
        }

        if let Some(agent) = user_agent {
            return self
                .api_exclusions
                .iter()
                .any(|(fragment, version)| agent.contains(fragment.as_str()) && version == api_version);
        }

        false
    }
}

/// Namespace segment following the last `/providers/` in a lowercase path
///
/// For an extension resource (`.../providers/A/x/y/providers/B/locks`) the
/// last provider owns the resource type, so its namespace decides whether the
/// api-version is ignored. The parent's provider plays no part.
fn provider_namespace(lower_path: &str) -> Option<&str> {
    let (_, rest) = lower_path.rsplit_once("/providers/")?;
    rest.split('/').next().filter(|ns| !ns.is_empty())
}
