//! Environment setup helper
//!
//! Collects what a script run needs (clients, module list, session details)
//! and hands it to the configured [`ScriptRunner`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::clients::ClientSet;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::testing::{ScriptEnvironment, ScriptRunner, SessionInfo};

pub struct EnvironmentSetupHelper {
    modules_dir: PathBuf,
    profile_module: String,
    runner: Arc<dyn ScriptRunner>,
    clients: Option<ClientSet>,
    session: Option<SessionInfo>,
    modules: Vec<PathBuf>,
}

impl EnvironmentSetupHelper {
    pub fn new(config: &Config, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            modules_dir: config.resolve(&config.paths.modules_dir),
            profile_module: config.paths.profile_module.clone(),
            runner,
            clients: None,
            session: None,
            modules: Vec::new(),
        }
    }

    /// Register the session's clients with the script environment
    pub fn setup_management_clients(&mut self, clients: ClientSet) {
        tracing::debug!(count = clients.len(), "Registered management clients");
        self.clients = Some(clients);
    }

    pub fn setup_environment(&mut self, session: SessionInfo) {
        self.session = Some(session);
    }

    /// Path of the profile module every script run loads
    pub fn rm_profile_module(&self) -> PathBuf {
        self.modules_dir.join(&self.profile_module)
    }

    /// Path of a named resource manager module
    pub fn rm_module_path(&self, module: &str) -> PathBuf {
        self.modules_dir.join(module)
    }

    /// Set the ordered list of files loaded before scripts run
    pub fn setup_modules(&mut self, modules: Vec<PathBuf>) {
        self.modules = modules;
    }

    pub fn modules(&self) -> &[PathBuf] {
        &self.modules
    }

    /// Run `scripts` with the prepared environment
    pub async fn run_script_test(&self, scripts: &[String]) -> Result<()> {
        let clients = self.clients.clone().ok_or_else(|| {
            Error::Config("Management clients must be set up before running scripts".to_string())
        })?;
        let session = self.session.clone().ok_or_else(|| {
            Error::Config("Session environment must be set up before running scripts".to_string())
        })?;

        let environment = ScriptEnvironment {
            session,
            clients,
            modules: self.modules.clone(),
        };

        tracing::info!(
            scripts = ?scripts,
            modules = self.modules.len(),
            "Running scenario scripts"
        );
        self.runner.run(&environment, scripts).await
    }
}
