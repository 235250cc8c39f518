//! Scenario scripts
//!
//! Resolves which script files a test loads, runs them through a
//! [`ScriptRunner`], and executes YAML test plans made of many sessions.

mod manifest;
mod plan;
mod runner;

pub use manifest::{ProviderCategory, ScriptManifest};
pub use plan::{run_plan, CaseResult, TestCase, TestPlan};
pub use runner::{
    ScriptEnvironment, ScriptRunner, SessionInfo, ShellScriptRunner, BASE_URI_ENV,
    UPSTREAM_BASE_URI_ENV,
};
