//! Scenario session controller
//!
//! Runs one scenario test: opens the record/replay context, builds the
//! clients, resolves the script manifest, runs the scripts and tears down.
//! Cleanup and context release happen on every path out of a session.

use std::sync::Arc;

use crate::clients::ClientSet;
use crate::common::config::Config;
use crate::common::{short_class_name, Result};
use crate::environment::{EnvironmentFactory, EnvironmentSetupHelper, TestEnvironment};
use crate::recorder::{
    ContextHandle, MockContext, RecorderSettings, ReqwestTransport, SessionMode, SessionSummary,
    Transport,
};
use crate::testing::{ProviderCategory, ScriptManifest, ScriptRunner, SessionInfo, ShellScriptRunner};

/// Fixture variable holding the recorded subscription
const SUBSCRIPTION_VARIABLE: &str = "SubscriptionId";

/// Hook run before the clients are built
pub type InitializeHook = Box<dyn FnOnce(&mut EnvironmentFactory) -> Result<()> + Send>;

/// Hook run after the scripts, whatever their outcome
pub type CleanupHook = Box<dyn FnOnce() -> Result<()> + Send>;

/// Identity of the test invoking the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingTest {
    pub class_name: String,
    pub method_name: String,
}

impl CallingTest {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    /// Build from the type name of an item declared inside a test function
    ///
    /// Drops the item itself and any closure or async block segments.
    pub fn from_item_type_name(type_name: &str) -> Self {
        let mut path = type_name.rsplit_once("::").map_or(type_name, |(parent, _)| parent);
        while let Some((parent, last)) = path.rsplit_once("::") {
            if !last.starts_with('{') {
                break;
            }
            path = parent;
        }
        Self::from_function_path(path)
    }

    /// Split `module::path::function` into class (module path) and method
    pub fn from_function_path(path: &str) -> Self {
        match path.rsplit_once("::") {
            Some((module, function)) => Self::new(module, function),
            None => Self::new(path, path),
        }
    }
}

/// Identity of the enclosing test function
///
/// The module path becomes the calling class and the function name the
/// session name.
#[macro_export]
macro_rules! calling_test {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::controller::CallingTest::from_item_type_name(type_name_of(f))
    }};
}

/// Drives scenario sessions
pub struct TestController {
    config: Config,
    runner: Arc<dyn ScriptRunner>,
    transport: Arc<dyn Transport>,
    resource_namespace: String,
}

impl TestController {
    /// Controller with the shell runner and live reqwest transport
    pub fn new(config: Config) -> Self {
        let runner = Arc::new(ShellScriptRunner::new(config.runner.clone()));
        let resource_namespace = config.defaults.resource_namespace.clone();
        Self {
            config,
            runner,
            transport: Arc::new(ReqwestTransport::new()),
            resource_namespace,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resource_namespace(&self) -> &str {
        &self.resource_namespace
    }

    pub fn set_resource_namespace(&mut self, namespace: impl Into<String>) {
        self.resource_namespace = namespace.into();
    }

    /// Matching policy and fixture root every session starts from
    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings::from_config(&self.config)
    }

    /// Run `scripts` for the calling test, without hooks
    pub async fn run_test(
        &self,
        category: ProviderCategory,
        caller: &CallingTest,
        scripts: &[&str],
    ) -> Result<SessionSummary> {
        let scripts: Vec<String> = scripts.iter().map(|s| s.to_string()).collect();
        self.run_workflow(
            category,
            move || scripts,
            None,
            None,
            &caller.class_name,
            &caller.method_name,
        )
        .await
    }

    /// Run one scenario session
    ///
    /// Errors from the initialize hook, the scripts or the cleanup hook are
    /// returned after the context has been released. When the scripts and
    /// the cleanup hook both fail, the script error wins and the cleanup
    /// error is logged. A panicking runner still gets the cleanup hook and
    /// the context release as the session unwinds.
    pub async fn run_workflow<F>(
        &self,
        category: ProviderCategory,
        script_provider: F,
        initialize: Option<InitializeHook>,
        cleanup: Option<CleanupHook>,
        calling_class: &str,
        session_name: &str,
    ) -> Result<SessionSummary>
    where
        F: FnOnce() -> Vec<String>,
    {
        let settings = self.recorder_settings();
        let mut context = MockContext::start(
            &settings,
            calling_class,
            session_name,
            Arc::clone(&self.transport),
        )?;

        let outcome = self
            .run_in_context(
                &context,
                category,
                script_provider,
                initialize,
                cleanup,
                calling_class,
                session_name,
            )
            .await;

        let released = context.release();
        match (outcome, released) {
            (Ok(()), released) => released,
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(release_error)) => {
                tracing::warn!("Failed to release session context: {}", release_error);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_in_context<F>(
        &self,
        context: &MockContext,
        category: ProviderCategory,
        script_provider: F,
        initialize: Option<InitializeHook>,
        cleanup: Option<CleanupHook>,
        calling_class: &str,
        session_name: &str,
    ) -> Result<()>
    where
        F: FnOnce() -> Vec<String>,
    {
        let handle = context.handle();

        let mut factory = EnvironmentFactory::from_env();
        if let Some(initialize) = initialize {
            initialize(&mut factory)?;
        }

        let environment = bind_subscription(&handle, EnvironmentFactory::from_env().environment());
        let legacy = factory.environment();

        let clients = ClientSet::new(&handle, &environment, &legacy);
        let mut helper = EnvironmentSetupHelper::new(&self.config, Arc::clone(&self.runner));
        helper.setup_management_clients(clients);
        let cleanup = CleanupGuard::new(cleanup);

        let manifest = ScriptManifest::resolve(&self.config, &helper, category, calling_class);
        tracing::debug!(
            class = short_class_name(calling_class),
            entries = ?manifest.paths(),
            "Resolved script manifest"
        );
        helper.setup_modules(manifest.paths());
        helper.setup_environment(SessionInfo {
            class_name: calling_class.to_string(),
            session_name: session_name.to_string(),
            mode: context.mode(),
            fixture: context.fixture_path(),
            resource_namespace: self.resource_namespace.clone(),
            subscription_id: environment.subscription_id.clone(),
            tenant_id: environment.tenant_id.clone(),
            base_uri: environment.base_uri.clone(),
            working_dir: self.config.base_dir(),
        });

        let scripts = script_provider();
        let script_result = if scripts.is_empty() {
            tracing::debug!(session = session_name, "No scripts to run");
            Ok(())
        } else {
            helper.run_script_test(&scripts).await
        };

        let cleanup_result = cleanup.run();

        match (script_result, cleanup_result) {
            (Ok(()), cleanup_result) => cleanup_result,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                tracing::warn!("Cleanup hook failed after script failure: {}", cleanup_error);
                Err(e)
            }
        }
    }
}

/// Owns the cleanup hook once clients are set up
///
/// The hook runs exactly once: through [`CleanupGuard::run`] on the normal
/// path, or on drop when a runner panics or the session future is dropped.
struct CleanupGuard {
    hook: Option<CleanupHook>,
}

impl CleanupGuard {
    fn new(hook: Option<CleanupHook>) -> Self {
        Self { hook }
    }

    fn run(mut self) -> Result<()> {
        match self.hook.take() {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            tracing::warn!("Script run interrupted, running cleanup hook");
            if let Err(e) = hook() {
                tracing::warn!("Cleanup hook failed: {}", e);
            }
        }
    }
}

/// Make the environment agree with the fixture's subscription
///
/// Playback uses the recorded subscription so replayed URIs match; record
/// mode stores the live one.
fn bind_subscription(handle: &ContextHandle, mut environment: TestEnvironment) -> TestEnvironment {
    match handle.mode() {
        SessionMode::Playback => {
            if let Some(recorded) = handle.variable(SUBSCRIPTION_VARIABLE) {
                environment.subscription_id = recorded;
            }
        }
        SessionMode::Record => {
            if handle.variable(SUBSCRIPTION_VARIABLE).is_none() {
                handle.set_variable(SUBSCRIPTION_VARIABLE, &environment.subscription_id);
            }
        }
    }
    environment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calling_test_from_function_path() {
        let caller = CallingTest::from_function_path("scenarios::iaas_vm::test_get_items");
        assert_eq!(caller.class_name, "scenarios::iaas_vm");
        assert_eq!(caller.method_name, "test_get_items");
        assert_eq!(short_class_name(&caller.class_name), "iaas_vm");
    }

    #[test]
    fn test_calling_test_from_item_type_name() {
        let caller = CallingTest::from_item_type_name("suite::vault_tests::test_get::{{closure}}::f");
        assert_eq!(caller, CallingTest::new("suite::vault_tests", "test_get"));
    }

    #[test]
    fn test_calling_test_macro() {
        let caller = crate::calling_test!();
        assert_eq!(caller.method_name, "test_calling_test_macro");
        assert!(caller.class_name.ends_with("controller::tests"));
    }

    #[tokio::test]
    async fn test_calling_test_macro_in_async_test() {
        let caller = crate::calling_test!();
        assert_eq!(caller.method_name, "test_calling_test_macro_in_async_test");
    }

    #[test]
    fn test_cleanup_guard_runs_hook_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let hook = |calls: &Arc<AtomicUsize>| -> Option<CleanupHook> {
            let calls = Arc::clone(calls);
            Some(Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        };

        CleanupGuard::new(hook(&calls)).run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(CleanupGuard::new(hook(&calls)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(CleanupGuard::new(None).run().is_ok());
    }

    #[test]
    fn test_resource_namespace_default_and_override() {
        let mut controller = TestController::new(Config::default());
        assert_eq!(controller.resource_namespace(), "Microsoft.RecoveryServices");
        controller.set_resource_namespace("Microsoft.DataProtection");
        assert_eq!(controller.resource_namespace(), "Microsoft.DataProtection");
    }
}
