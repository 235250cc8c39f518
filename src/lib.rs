//! Backup Scenarios - record/replay scenario test harness
//!
//! Opens a record/replay HTTP context per test, binds the backup management
//! clients to it, resolves the test's script manifest and runs the scripts,
//! releasing the context on every exit path.

pub mod cli;
pub mod clients;
pub mod commands;
pub mod common;
pub mod controller;
pub mod environment;
pub mod recorder;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use controller::{CallingTest, CleanupHook, InitializeHook, TestController};
pub use testing::ProviderCategory;
