//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::paths::{config_path, default_base_dir};
use super::{Error, Result};

/// Environment variable that overrides the configured HTTP mode
pub const HTTP_MODE_ENV: &str = "SCENARIO_HTTP_MODE";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Filesystem layout of scripts, modules and fixtures
    #[serde(default)]
    pub paths: PathsConfig,

    /// External script interpreter settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Record matching rules
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Record/replay settings
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,
}

/// How HTTP traffic is handled for a session
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HttpMode {
    /// Replay when a fixture exists for the session, record otherwise
    #[default]
    Auto,
    /// Always send live traffic and overwrite the fixture
    Record,
    /// Always replay; a missing fixture is an error
    Playback,
}

impl fmt::Display for HttpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMode::Auto => write!(f, "auto"),
            HttpMode::Record => write!(f, "record"),
            HttpMode::Playback => write!(f, "playback"),
        }
    }
}

impl FromStr for HttpMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(HttpMode::Auto),
            "record" => Ok(HttpMode::Record),
            "playback" | "replay" => Ok(HttpMode::Playback),
            other => Err(Error::Config(format!(
                "Unknown HTTP mode '{}'. Supported modes: 'auto', 'record', 'playback'",
                other
            ))),
        }
    }
}

/// Filesystem layout
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Directory that relative paths are resolved against (default: cwd)
    pub base_dir: Option<PathBuf>,

    /// Fixture root
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,

    /// Root of the per-category script folders
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Directory holding the platform modules
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    /// File name of the profile module
    #[serde(default = "default_profile_module")]
    pub profile_module: String,

    /// File name of the backup module
    #[serde(default = "default_backup_module")]
    pub backup_module: String,

    /// File name of the recovery services module
    #[serde(default = "default_recovery_services_module")]
    pub recovery_services_module: String,

    /// Extension of test scripts, without the dot
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            records_dir: default_records_dir(),
            scripts_dir: default_scripts_dir(),
            modules_dir: default_modules_dir(),
            profile_module: default_profile_module(),
            backup_module: default_backup_module(),
            recovery_services_module: default_recovery_services_module(),
            script_extension: default_script_extension(),
        }
    }
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("SessionRecords")
}
fn default_scripts_dir() -> PathBuf {
    PathBuf::from("ScenarioTests")
}
fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}
fn default_profile_module() -> String {
    "AzureRM.Profile.psd1".to_string()
}
fn default_backup_module() -> String {
    "AzureRM.RecoveryServices.Backup.psd1".to_string()
}
fn default_recovery_services_module() -> String {
    "AzureRM.RecoveryServices.psd1".to_string()
}
fn default_script_extension() -> String {
    "ps1".to_string()
}

/// External script interpreter settings
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Interpreter executable, looked up in PATH when not absolute
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the generated command text
    #[serde(default = "default_program_args")]
    pub args: Vec<String>,

    /// Kill the interpreter after this many seconds
    pub timeout_secs: Option<u64>,

    /// First line of the generated command text
    #[serde(default = "default_preamble")]
    pub preamble: Option<String>,

    /// Line that loads a script file; `{path}` is replaced
    #[serde(default = "default_source_template")]
    pub source_template: String,

    /// Line that loads a module file; `{path}` is replaced
    #[serde(default = "default_module_template")]
    pub module_template: String,

    /// Extensions loaded with `module_template` instead of `source_template`
    #[serde(default = "default_module_extensions")]
    pub module_extensions: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_program_args(),
            timeout_secs: None,
            preamble: default_preamble(),
            source_template: default_source_template(),
            module_template: default_module_template(),
            module_extensions: default_module_extensions(),
        }
    }
}

fn default_program() -> String {
    "pwsh".to_string()
}
fn default_program_args() -> Vec<String> {
    vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-Command".to_string(),
    ]
}

fn default_preamble() -> Option<String> {
    Some("$ErrorActionPreference = 'Stop'".to_string())
}
fn default_source_template() -> String {
    ". '{path}'".to_string()
}
fn default_module_template() -> String {
    "Import-Module '{path}'".to_string()
}
fn default_module_extensions() -> Vec<String> {
    vec!["psd1".to_string(), "psm1".to_string()]
}

/// Record matching rules
#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    /// Ignore api-version on resource group and subscription level calls
    #[serde(default = "default_true")]
    pub ignore_resources_client: bool,

    /// Provider namespaces whose api-version is ignored when matching.
    /// An empty version ignores every version.
    #[serde(default = "default_ignored_providers")]
    pub ignored_providers: BTreeMap<String, String>,

    /// User agents whose requests at the given api-version ignore it
    #[serde(default = "default_api_exclusions")]
    pub api_exclusions: BTreeMap<String, String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ignore_resources_client: true,
            ignored_providers: default_ignored_providers(),
            api_exclusions: default_api_exclusions(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ignored_providers() -> BTreeMap<String, String> {
    [
        "Microsoft.Resources",
        "Microsoft.Features",
        "Microsoft.Authorization",
        "Microsoft.Compute",
    ]
    .into_iter()
    .map(|ns| (ns.to_string(), String::new()))
    .collect()
}

fn default_api_exclusions() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "Microsoft.Azure.Management.Resources.ResourceManagementClient".to_string(),
        "2016-02-01".to_string(),
    )])
}

/// Record/replay settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RecordingConfig {
    /// Record/replay selection
    #[serde(default)]
    pub mode: HttpMode,
}

/// Default settings
#[derive(Debug, Deserialize, Clone)]
pub struct Defaults {
    /// Resource namespace exported to scripts
    #[serde(default = "default_resource_namespace")]
    pub resource_namespace: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            resource_namespace: default_resource_namespace(),
        }
    }
}

fn default_resource_namespace() -> String {
    "Microsoft.RecoveryServices".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::read(&path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply environment overrides on top of the file values
    fn apply_env(&mut self) -> Result<()> {
        self.apply_mode_override(std::env::var(HTTP_MODE_ENV).ok().as_deref())
    }

    /// Override `recording.mode`; a blank value keeps the current mode
    fn apply_mode_override(&mut self, mode: Option<&str>) -> Result<()> {
        match mode.map(str::trim) {
            Some(mode) if !mode.is_empty() => {
                self.recording.mode = mode.parse()?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Directory relative paths are resolved against
    pub fn base_dir(&self) -> PathBuf {
        self.paths.base_dir.clone().unwrap_or_else(default_base_dir)
    }

    /// Resolve a configured path against the base directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Absolute fixture root
    pub fn records_dir(&self) -> PathBuf {
        self.resolve(&self.paths.records_dir)
    }
}
