//! Script manifest resolution
//!
//! For a provider category and calling class the manifest is, in order:
//! 1. `<scripts_dir>/<Category>/Common.<ext>` when that file exists
//! 2. `<scripts_dir>/<Category>/<ShortClass>.<ext>`
//! 3. the profile, backup and recovery services modules

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::common::config::Config;
use crate::common::{short_class_name, Error, Result};
use crate::environment::EnvironmentSetupHelper;

/// Backup management provider; selects the script folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ProviderCategory {
    /// IaaS virtual machines
    IaasVm,
    AzureSql,
    AzureFiles,
    /// SQL/SAP workloads inside VMs
    AzureWorkload,
    /// Recovery services agent
    Mab,
    /// Data protection manager
    Dpm,
}

impl ProviderCategory {
    pub const ALL: [ProviderCategory; 6] = [
        ProviderCategory::IaasVm,
        ProviderCategory::AzureSql,
        ProviderCategory::AzureFiles,
        ProviderCategory::AzureWorkload,
        ProviderCategory::Mab,
        ProviderCategory::Dpm,
    ];

    /// Name of the script folder for this category
    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::IaasVm => "IaasVm",
            Self::AzureSql => "AzureSql",
            Self::AzureFiles => "AzureFiles",
            Self::AzureWorkload => "AzureWorkload",
            Self::Mab => "Mab",
            Self::Dpm => "Dpm",
        }
    }
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

impl FromStr for ProviderCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.folder_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.folder_name()).collect();
                Error::UnknownCategory(wanted.to_string(), known.join(", "))
            })
    }
}

impl TryFrom<String> for ProviderCategory {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Ordered script files for one test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptManifest {
    common: Option<PathBuf>,
    test_script: PathBuf,
    modules: Vec<PathBuf>,
}

impl ScriptManifest {
    /// Resolve the manifest for `calling_class` under `category`
    ///
    /// Only the common script is existence-checked; the test script is
    /// expected to exist and a missing one surfaces when the runner loads it.
    pub fn resolve(
        config: &Config,
        helper: &EnvironmentSetupHelper,
        category: ProviderCategory,
        calling_class: &str,
    ) -> Self {
        let folder = config
            .resolve(&config.paths.scripts_dir)
            .join(category.folder_name());
        let extension = &config.paths.script_extension;

        let common = folder.join(format!("Common.{}", extension));
        let common = if common.is_file() {
            Some(common)
        } else {
            tracing::debug!(path = %common.display(), "No common script for category");
            None
        };

        let test_script = folder.join(format!("{}.{}", short_class_name(calling_class), extension));

        let modules = vec![
            helper.rm_profile_module(),
            helper.rm_module_path(&config.paths.backup_module),
            helper.rm_module_path(&config.paths.recovery_services_module),
        ];

        Self {
            common,
            test_script,
            modules,
        }
    }

    pub fn common_script(&self) -> Option<&Path> {
        self.common.as_deref()
    }

    pub fn test_script(&self) -> &Path {
        &self.test_script
    }

    pub fn modules(&self) -> &[PathBuf] {
        &self.modules
    }

    /// All entries in load order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.common
            .iter()
            .chain(std::iter::once(&self.test_script))
            .chain(self.modules.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ShellScriptRunner;
    use std::sync::Arc;

    fn setup(base: &Path) -> (Config, EnvironmentSetupHelper) {
        let mut config = Config::default();
        config.paths.base_dir = Some(base.to_path_buf());
        let helper = EnvironmentSetupHelper::new(
            &config,
            Arc::new(ShellScriptRunner::new(config.runner.clone())),
        );
        (config, helper)
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("iaasvm".parse::<ProviderCategory>().unwrap(), ProviderCategory::IaasVm);
        assert_eq!("Dpm".parse::<ProviderCategory>().unwrap(), ProviderCategory::Dpm);
        let err = "Tape".parse::<ProviderCategory>().unwrap_err();
        assert!(matches!(err, Error::UnknownCategory(..)));
    }

    #[test]
    fn test_manifest_with_common_script() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("ScenarioTests").join("IaasVm");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("Common.ps1"), "").unwrap();

        let (config, helper) = setup(dir.path());
        let manifest =
            ScriptManifest::resolve(&config, &helper, ProviderCategory::IaasVm, "Foo.Bar.BazTests");

        let paths = manifest.paths();
        assert_eq!(paths.len(), 5);
        assert_eq!(paths[0], folder.join("Common.ps1"));
        assert_eq!(paths[1], folder.join("BazTests.ps1"));
        assert_eq!(paths[2], dir.path().join("modules").join("AzureRM.Profile.psd1"));
        assert_eq!(
            paths[3],
            dir.path().join("modules").join("AzureRM.RecoveryServices.Backup.psd1")
        );
        assert_eq!(
            paths[4],
            dir.path().join("modules").join("AzureRM.RecoveryServices.psd1")
        );
    }

    #[test]
    fn test_manifest_without_common_script_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let (config, helper) = setup(dir.path());
        let manifest =
            ScriptManifest::resolve(&config, &helper, ProviderCategory::AzureSql, "Foo.Bar.BazTests");

        assert!(manifest.common_script().is_none());
        let paths = manifest.paths();
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0], manifest.test_script());
        assert_eq!(&paths[1..], manifest.modules());
        assert!(paths[0].ends_with("AzureSql/BazTests.ps1"));
    }
}
