//! CLI command handling
//!
//! Loads configuration, dispatches commands and formats output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, HttpMode};
use crate::common::{short_class_name, Error, Result};
use crate::controller::TestController;
use crate::environment::EnvironmentSetupHelper;
use crate::recorder::SessionRecord;
use crate::testing::{run_plan, ProviderCategory, ScriptManifest, ShellScriptRunner, TestPlan};

/// Load the config file given on the command line, or the default one
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let mut config = load_config(config_path)?;

    match command {
        Commands::Run {
            category,
            class,
            name,
            mode,
            resource_namespace,
            scripts,
        } => {
            let category: ProviderCategory = category.parse()?;
            apply_mode(&mut config, mode.as_deref())?;

            let mut controller = TestController::new(config);
            if let Some(ns) = resource_namespace {
                controller.set_resource_namespace(ns);
            }

            let summary = controller
                .run_workflow(category, move || scripts, None, None, &class, &name)
                .await?;

            println!(
                "{} {} ({}, {} entries, {} replayed)",
                "✓".green(),
                summary.session_name,
                summary.mode,
                summary.entries,
                summary.replayed
            );
            if verbose {
                println!("  fixture: {}", summary.fixture.display());
            }
            Ok(())
        }

        Commands::Plan { path, mode } => {
            apply_mode(&mut config, mode.as_deref())?;
            let plan = TestPlan::load(&path)?;
            let controller = TestController::new(config);

            let results = run_plan(&controller, &plan, verbose).await;
            let failed = results.iter().filter(|r| !r.passed).count();
            if failed > 0 {
                return Err(Error::TestAssertion(format!(
                    "{} of {} sessions failed",
                    failed,
                    results.len()
                )));
            }
            Ok(())
        }

        Commands::Manifest { category, class } => {
            let category: ProviderCategory = category.parse()?;
            let helper = EnvironmentSetupHelper::new(
                &config,
                Arc::new(ShellScriptRunner::new(config.runner.clone())),
            );
            let manifest = ScriptManifest::resolve(&config, &helper, category, &class);

            println!("Manifest for {} ({}):", short_class_name(&class), category);
            for path in manifest.paths() {
                if path.exists() {
                    println!("  {}", path.display());
                } else {
                    println!("  {} {}", path.display(), "(missing)".yellow());
                }
            }
            Ok(())
        }

        Commands::Fixtures { class } => {
            let records_dir = config.records_dir();
            let fixtures = list_fixtures(&records_dir, class.as_deref())?;

            if fixtures.is_empty() {
                println!("No fixtures under {}", records_dir.display());
                return Ok(());
            }

            println!("Fixtures under {}:", records_dir.display());
            for (path, record) in &fixtures {
                let relative = path.strip_prefix(&records_dir).unwrap_or(path);
                println!(
                    "  {} {}",
                    relative.display(),
                    format!("({} entries)", record.entries.len()).dimmed()
                );
            }
            Ok(())
        }
    }
}

fn apply_mode(config: &mut Config, mode: Option<&str>) -> Result<()> {
    if let Some(mode) = mode {
        config.recording.mode = mode.parse::<HttpMode>()?;
    }
    Ok(())
}

/// Fixture files under `records_dir`, sorted by path
pub fn list_fixtures(
    records_dir: &Path,
    class: Option<&str>,
) -> Result<Vec<(PathBuf, SessionRecord)>> {
    let mut fixtures = Vec::new();
    if !records_dir.is_dir() {
        return Ok(fixtures);
    }

    let wanted = class.map(short_class_name);

    for class_dir in std::fs::read_dir(records_dir)? {
        let class_dir = class_dir?.path();
        if !class_dir.is_dir() {
            continue;
        }
        if let Some(wanted) = wanted {
            if class_dir.file_name().and_then(|n| n.to_str()) != Some(wanted) {
                continue;
            }
        }

        for entry in std::fs::read_dir(&class_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record = SessionRecord::load(&path)?;
            fixtures.push((path, record));
        }
    }

    fixtures.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(fixtures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_fixtures_filters_by_class() {
        let dir = tempfile::tempdir().unwrap();
        SessionRecord::default()
            .save(&dir.path().join("ItemTests").join("TestB.json"))
            .unwrap();
        SessionRecord::default()
            .save(&dir.path().join("ItemTests").join("TestA.json"))
            .unwrap();
        SessionRecord::default()
            .save(&dir.path().join("PolicyTests").join("TestC.json"))
            .unwrap();
        std::fs::write(dir.path().join("ItemTests").join("notes.txt"), "").unwrap();

        let all = list_fixtures(dir.path(), None).unwrap();
        assert_eq!(all.len(), 3);

        let items = list_fixtures(dir.path(), Some("Backup.Test.ItemTests")).unwrap();
        let names: Vec<_> = items
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["TestA.json", "TestB.json"]);
    }

    #[test]
    fn test_list_fixtures_missing_dir() {
        let fixtures = list_fixtures(Path::new("/nonexistent/records"), None).unwrap();
        assert!(fixtures.is_empty());
    }

    #[test]
    fn test_apply_mode() {
        let mut config = Config::default();
        apply_mode(&mut config, Some("record")).unwrap();
        assert_eq!(config.recording.mode, HttpMode::Record);
        assert!(apply_mode(&mut config, Some("bogus")).is_err());
    }
}
