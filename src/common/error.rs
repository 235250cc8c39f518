//! Error types for the scenario harness
//!
//! Messages are written to be read in a test report, with enough context
//! (fixture path, script, category) to locate the failing piece.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scenario harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Unknown provider category '{0}'. Expected one of: {1}")]
    UnknownCategory(String, String),

    // === Recording Errors ===
    #[error("Failed to read fixture '{path}': {error}")]
    FixtureRead { path: String, error: String },

    #[error("No recorded entry left for {method} {uri} in fixture '{fixture}'")]
    RecordNotFound {
        method: String,
        uri: String,
        fixture: String,
    },

    #[error("No recorded asset name left for prefix '{prefix}' in fixture '{fixture}'")]
    NameNotRecorded { prefix: String, fixture: String },

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Session context for '{0}' has already been released")]
    ContextReleased(String),

    // === Script Errors ===
    #[error("Script interpreter '{0}' not found in PATH")]
    InterpreterNotFound(String),

    #[error("Script '{script}' failed with exit code {code:?}")]
    ScriptFailed { script: String, code: Option<i32> },

    #[error("Script run timed out after {0} seconds")]
    ScriptTimeout(u64),

    // === Hook Errors ===
    #[error("{hook} hook failed: {message}")]
    HookFailed { hook: &'static str, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),
}

impl Error {
    /// Create a hook failure from anything displayable
    pub fn hook_failed(hook: &'static str, message: impl std::fmt::Display) -> Self {
        Self::HookFailed {
            hook,
            message: message.to_string(),
        }
    }

    /// Create a fixture read error
    pub fn fixture_read(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FixtureRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
