//! Recorded HTTP interactions and the fixture file format
//!
//! A fixture is a JSON document with PascalCase keys:
//! ```text
//! { "Entries": [...], "Names": { "<test>": ["name1", ...] }, "Variables": { "SubscriptionId": "..." } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::common::{short_class_name, Error, Result};

/// An outgoing request as seen by the session context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpRequest {
    pub fn new(method: &str, uri: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            uri: uri.into(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response returned to a client, live or replayed
///
/// Headers keep every value of a repeated name, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl HttpResponse {
    /// First value of a header, case-insensitive
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// One recorded request/response pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RecordEntry {
    pub request_uri: String,
    pub encoded_request_uri: String,
    pub request_method: String,
    #[serde(default)]
    pub request_body: String,
    #[serde(default)]
    pub request_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub response_body: String,
    pub status_code: u16,
}

impl RecordEntry {
    pub fn new(request: &HttpRequest, response: &HttpResponse) -> Self {
        Self {
            request_uri: request.uri.clone(),
            encoded_request_uri: STANDARD.encode(request.uri.as_bytes()),
            request_method: request.method.clone(),
            request_body: request.body.clone(),
            request_headers: multi_valued(&request.headers),
            response_headers: response.headers.clone(),
            response_body: response.body.clone(),
            status_code: response.status,
        }
    }

    /// Rebuild the request this entry was recorded from
    pub fn request(&self) -> HttpRequest {
        HttpRequest {
            method: self.request_method.clone(),
            uri: self.request_uri.clone(),
            headers: single_valued(&self.request_headers),
            body: self.request_body.clone(),
        }
    }

    /// Rebuild the recorded response
    pub fn response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status_code,
            headers: self.response_headers.clone(),
            body: self.response_body.clone(),
        }
    }
}

fn multi_valued(headers: &BTreeMap<String, String>) -> BTreeMap<String, Vec<String>> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), vec![v.clone()]))
        .collect()
}

fn single_valued(headers: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), v.join(", ")))
        .collect()
}

/// Contents of one fixture file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub entries: Vec<RecordEntry>,
    /// Generated asset names, per session
    #[serde(default)]
    pub names: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl SessionRecord {
    /// Read a fixture file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::fixture_read(path, e))?;
        serde_json::from_str(&content).map_err(|e| Error::fixture_read(path, e))
    }

    /// Write the fixture, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Location of the fixture for a (calling class, session) pair
///
/// `<records_dir>/<ShortClass>/<session>.json`
pub fn fixture_path(records_dir: &Path, calling_class: &str, session_name: &str) -> PathBuf {
    records_dir
        .join(short_class_name(calling_class))
        .join(format!("{}.json", session_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_path_uses_short_class() {
        let path = fixture_path(Path::new("/records"), "Foo.Bar.BazTests", "TestGetItems");
        assert_eq!(path, PathBuf::from("/records/BazTests/TestGetItems.json"));
    }

    #[test]
    fn test_record_entry_keeps_request_and_response() {
        let request = HttpRequest::new("get", "https://management.azure.com/subscriptions/1")
            .header("User-Agent", "tests");
        let response = HttpResponse {
            status: 200,
            headers: BTreeMap::from([(
                "Set-Cookie".to_string(),
                vec!["a=1".to_string(), "b=2".to_string()],
            )]),
            body: "{}".to_string(),
        };

        let entry = RecordEntry::new(&request, &response);
        assert_eq!(entry.response_headers["Set-Cookie"], vec!["a=1", "b=2"]);
        assert_eq!(entry.request_method, "GET");
        assert_eq!(
            STANDARD.decode(&entry.encoded_request_uri).unwrap(),
            request.uri.as_bytes()
        );
        assert_eq!(entry.request(), request);
        assert_eq!(entry.response(), response);
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse {
            status: 201,
            headers: BTreeMap::from([(
                "Content-Type".to_string(),
                vec!["application/json".to_string()],
            )]),
            body: r#"{"name":"PsTestRsVault"}"#.to_string(),
        };
        assert!(response.is_success());
        assert_eq!(response.header_value("content-type"), Some("application/json"));
        assert_eq!(response.json().unwrap()["name"], "PsTestRsVault");

        let missing = HttpResponse {
            status: 404,
            headers: BTreeMap::new(),
            body: "not json".to_string(),
        };
        assert!(!missing.is_success());
        assert!(missing.header_value("Content-Type").is_none());
        assert!(matches!(missing.json(), Err(Error::Json(_))));
    }

    #[test]
    fn test_session_record_file_format() {
        let json = r#"{
            "Entries": [{
                "RequestUri": "/subscriptions/1?api-version=2016-06-01",
                "EncodedRequestUri": "",
                "RequestMethod": "GET",
                "StatusCode": 404
            }],
            "Variables": { "SubscriptionId": "1" }
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.entries[0].status_code, 404);
        assert!(record.names.is_empty());
        assert_eq!(record.variables["SubscriptionId"], "1");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Nested").join("Session.json");
        let mut record = SessionRecord::default();
        record
            .variables
            .insert("SubscriptionId".to_string(), "sub".to_string());

        record.save(&path).unwrap();
        assert_eq!(SessionRecord::load(&path).unwrap(), record);
    }

    #[test]
    fn test_load_missing_fixture_is_fixture_error() {
        let err = SessionRecord::load(Path::new("/nonexistent/fixture.json")).unwrap_err();
        assert!(matches!(err, Error::FixtureRead { .. }));
    }
}
