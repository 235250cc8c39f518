//! Script runner implementations
//!
//! A runner receives the prepared [`ScriptEnvironment`] and the script
//! identifiers to execute. The shell runner starts the configured
//! interpreter once, loads every manifest entry, then invokes each
//! identifier in order.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use crate::clients::ClientSet;
use crate::common::config::RunnerConfig;
use crate::common::{Error, Result};
use crate::recorder::{ContextProxy, SessionMode};

/// Endpoint scripts send management requests to
pub const BASE_URI_ENV: &str = "SCENARIO_BASE_URI";

/// The real endpoint behind [`BASE_URI_ENV`], for display only
pub const UPSTREAM_BASE_URI_ENV: &str = "SCENARIO_UPSTREAM_BASE_URI";

/// Details of the running session exported to scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub class_name: String,
    pub session_name: String,
    pub mode: SessionMode,
    pub fixture: PathBuf,
    pub resource_namespace: String,
    pub subscription_id: String,
    pub tenant_id: String,
    pub base_uri: String,
    pub working_dir: PathBuf,
}

/// Everything a runner gets to work with
#[derive(Debug, Clone)]
pub struct ScriptEnvironment {
    pub session: SessionInfo,
    pub clients: ClientSet,
    pub modules: Vec<PathBuf>,
}

impl ScriptEnvironment {
    /// Environment variables describing the session
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let s = &self.session;
        vec![
            ("SCENARIO_CLASS", s.class_name.clone()),
            ("SCENARIO_SESSION", s.session_name.clone()),
            ("SCENARIO_HTTP_MODE", s.mode.to_string()),
            ("SCENARIO_FIXTURE", s.fixture.display().to_string()),
            ("SCENARIO_RESOURCE_NAMESPACE", s.resource_namespace.clone()),
            ("SCENARIO_SUBSCRIPTION_ID", s.subscription_id.clone()),
            ("SCENARIO_TENANT_ID", s.tenant_id.clone()),
            (BASE_URI_ENV, s.base_uri.clone()),
        ]
    }
}

/// Executes script identifiers against a prepared environment
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, environment: &ScriptEnvironment, scripts: &[String]) -> Result<()>;
}

/// Runs scripts through an external interpreter process
///
/// For the duration of the run a [`ContextProxy`] serves the session
/// context on a loopback port, and `SCENARIO_BASE_URI` points there instead
/// of at the service. Scripts that build request URLs from it are recorded
/// and replayed like in-process clients.
#[derive(Debug, Clone)]
pub struct ShellScriptRunner {
    config: RunnerConfig,
}

impl ShellScriptRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Locate the interpreter, searching PATH for bare names
    fn interpreter(&self) -> Result<PathBuf> {
        let program = Path::new(&self.config.program);
        if program.components().count() > 1 {
            return Ok(program.to_path_buf());
        }
        which::which(&self.config.program)
            .map_err(|_| Error::InterpreterNotFound(self.config.program.clone()))
    }

    /// Build the command text handed to the interpreter
    pub fn command_text(&self, modules: &[PathBuf], scripts: &[String]) -> String {
        let mut lines = Vec::with_capacity(modules.len() + scripts.len() + 1);

        if let Some(preamble) = self.config.preamble.as_deref().filter(|p| !p.is_empty()) {
            lines.push(preamble.to_string());
        }

        for module in modules {
            let is_module = module
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| {
                    self.config
                        .module_extensions
                        .iter()
                        .any(|m| m.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false);
            let template = if is_module {
                &self.config.module_template
            } else {
                &self.config.source_template
            };
            // Single quotes are doubled for single-quoted string literals
            let path = module.display().to_string().replace('\'', "''");
            lines.push(template.replace("{path}", &path));
        }

        lines.extend(scripts.iter().cloned());
        lines.join("\n")
    }
}

#[async_trait]
impl ScriptRunner for ShellScriptRunner {
    async fn run(&self, environment: &ScriptEnvironment, scripts: &[String]) -> Result<()> {
        let program = self.interpreter()?;
        let text = self.command_text(&environment.modules, scripts);

        tracing::debug!(program = %program.display(), "Starting script interpreter");
        tracing::trace!("Command text:\n{}", text);

        // Script traffic reaches the service only through the session context
        let proxy =
            ContextProxy::start(environment.clients.context().clone(), &environment.session.base_uri)
                .await?;

        let mut child = TokioCommand::new(&program)
            .args(&self.config.args)
            .arg(&text)
            .current_dir(&environment.session.working_dir)
            .envs(environment.env_vars())
            .env(BASE_URI_ENV, proxy.base_url())
            .env(UPSTREAM_BASE_URI_ENV, &environment.session.base_uri)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let status = match self.config.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(Error::ScriptTimeout(secs));
                }
            },
            None => child.wait().await?,
        };
        proxy.shutdown().await;

        if !status.success() {
            return Err(Error::ScriptFailed {
                script: scripts.join(", "),
                code: status.code(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_text_orders_modules_then_scripts() {
        let runner = ShellScriptRunner::new(RunnerConfig::default());
        let modules = vec![
            PathBuf::from("/t/IaasVm/Common.ps1"),
            PathBuf::from("/t/IaasVm/ItemTests.ps1"),
            PathBuf::from("/m/AzureRM.Profile.psd1"),
        ];
        let text = runner.command_text(&modules, &["Test-GetItem".to_string()]);

        assert_eq!(
            text,
            "$ErrorActionPreference = 'Stop'\n\
             . '/t/IaasVm/Common.ps1'\n\
             . '/t/IaasVm/ItemTests.ps1'\n\
             Import-Module '/m/AzureRM.Profile.psd1'\n\
             Test-GetItem"
        );
    }

    #[test]
    fn test_command_text_quotes_paths() {
        let runner = ShellScriptRunner::new(RunnerConfig::default());
        let text = runner.command_text(&[PathBuf::from("/t/o'neil.ps1")], &[]);
        assert!(text.ends_with(". '/t/o''neil.ps1'"));
    }

    #[test]
    fn test_missing_interpreter() {
        let runner = ShellScriptRunner::new(RunnerConfig {
            program: "definitely-not-a-real-interpreter".to_string(),
            ..RunnerConfig::default()
        });
        assert!(matches!(
            runner.interpreter(),
            Err(Error::InterpreterNotFound(_))
        ));
    }
}
