//! Test plans
//!
//! A plan is a YAML file listing scenario sessions to run in sequence:
//!
//! ```yaml
//! name: IaaS VM backup
//! description: Item and policy scenarios
//! cases:
//!   - category: IaasVm
//!     class: RecoveryServices.Backup.Test.ItemTests
//!     name: TestGetItems
//!     scripts: [Test-GetItems]
//! ```

use std::path::Path;

use colored::Colorize;
use serde::Deserialize;

use crate::common::{Error, Result};
use crate::controller::TestController;
use crate::recorder::SessionSummary;

use super::ProviderCategory;

/// A complete test plan loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestPlan {
    /// Name of the plan
    pub name: String,
    /// Optional description of what the plan covers
    pub description: Option<String>,
    /// Sessions to run, in order
    pub cases: Vec<TestCase>,
}

/// One scenario session in a plan
#[derive(Deserialize, Debug)]
pub struct TestCase {
    /// Script folder
    pub category: ProviderCategory,
    /// Fully qualified calling class
    pub class: String,
    /// Session (fixture) name
    pub name: String,
    /// Script identifiers; an empty list only exercises setup and teardown
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// Outcome of one case
#[derive(Debug)]
pub struct CaseResult {
    pub name: String,
    pub passed: bool,
    pub summary: Option<SessionSummary>,
    pub error: Option<String>,
}

impl TestPlan {
    /// Load and parse a plan file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read test plan '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Run every case of `plan`, continuing past failures
pub async fn run_plan(controller: &TestController, plan: &TestPlan, verbose: bool) -> Vec<CaseResult> {
    println!(
        "\n{} {}",
        "Running Plan:".blue().bold(),
        plan.name.white().bold()
    );
    if let Some(desc) = &plan.description {
        println!("  {}", desc.dimmed());
    }
    println!();

    let mut results = Vec::with_capacity(plan.cases.len());

    for case in &plan.cases {
        let scripts = case.scripts.clone();
        let outcome = controller
            .run_workflow(case.category, move || scripts, None, None, &case.class, &case.name)
            .await;

        let result = match outcome {
            Ok(summary) => {
                let detail = format!(
                    "{}, {} entries",
                    summary.mode, summary.entries
                );
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    case.name,
                    detail.dimmed()
                );
                if verbose {
                    println!("      fixture: {}", summary.fixture.display().to_string().dimmed());
                }
                CaseResult {
                    name: case.name.clone(),
                    passed: true,
                    summary: Some(summary),
                    error: None,
                }
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), case.name, e);
                CaseResult {
                    name: case.name.clone(),
                    passed: false,
                    summary: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed == 0 {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            format!("{} sessions passed", results.len()).green().bold()
        );
    } else {
        println!(
            "\n{} {}\n",
            "✗".red().bold(),
            format!("{} of {} sessions failed", failed, results.len()).red().bold()
        );
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan() {
        let plan: TestPlan = serde_yaml::from_str(
            r#"
name: Vault scenarios
cases:
  - category: IaasVm
    class: RecoveryServices.Backup.Test.ItemTests
    name: TestGetItems
    scripts: [Test-GetItems, Test-GetItemsFiltered]
  - category: azuresql
    class: SqlTests
    name: TestSetup
"#,
        )
        .unwrap();

        assert_eq!(plan.cases.len(), 2);
        assert_eq!(plan.cases[0].category, ProviderCategory::IaasVm);
        assert_eq!(plan.cases[0].scripts.len(), 2);
        assert_eq!(plan.cases[1].category, ProviderCategory::AzureSql);
        assert!(plan.cases[1].scripts.is_empty());
        assert!(plan.description.is_none());
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let result: std::result::Result<TestPlan, _> = serde_yaml::from_str(
            r#"
name: Bad
cases:
  - category: Tape
    class: T
    name: N
"#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Tape"), "{}", err);
    }
}
