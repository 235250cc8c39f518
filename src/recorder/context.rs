//! Session context - scoped record/replay of HTTP traffic for one test
//!
//! A [`MockContext`] is opened per (calling class, session name) pair. While
//! it is open, every client bound to it sends requests through a
//! [`ContextHandle`]: in playback mode the response comes from the fixture,
//! in record mode it comes from the live transport and is appended to the
//! fixture. Releasing the context writes the fixture (record mode) and
//! detaches all handles. Release happens once, either explicitly or on drop.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::config::{Config, HttpMode};
use crate::common::{Error, Result};

use super::matcher::MatcherPolicy;
use super::record::{fixture_path, HttpRequest, HttpResponse, RecordEntry, SessionRecord};
use super::transport::Transport;

/// Request headers never written to a fixture
const REDACTED_HEADERS: &[&str] = &["authorization"];

/// Resolved mode of an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Record,
    Playback,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => write!(f, "record"),
            Self::Playback => write!(f, "playback"),
        }
    }
}

/// Everything a context needs to know before it starts
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub records_dir: PathBuf,
    pub mode: HttpMode,
    pub policy: MatcherPolicy,
}

impl RecorderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            records_dir: config.records_dir(),
            mode: config.recording.mode,
            policy: MatcherPolicy::from_config(&config.matcher),
        }
    }
}

/// What a released session did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub class_name: String,
    pub session_name: String,
    pub mode: SessionMode,
    pub fixture: PathBuf,
    /// Entries written (record) or available (playback)
    pub entries: usize,
    /// Entries consumed during playback
    pub replayed: usize,
}

struct ContextState {
    class_name: String,
    session_name: String,
    mode: SessionMode,
    fixture: PathBuf,
    policy: MatcherPolicy,
    /// Playback queues keyed by matching key, in recorded order
    pending: HashMap<String, VecDeque<RecordEntry>>,
    /// Names and variables (both modes), entries (record mode)
    record: SessionRecord,
    fixture_entries: usize,
    name_cursor: usize,
    replayed: usize,
    released: bool,
}

impl ContextState {
    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(Error::ContextReleased(self.session_name.clone()));
        }
        Ok(())
    }

    fn take_recorded(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        let key = self.policy.matching_key(request);
        match self.pending.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(entry) => {
                self.replayed += 1;
                Ok(entry.response())
            }
            None => Err(Error::RecordNotFound {
                method: request.method.clone(),
                uri: request.uri.clone(),
                fixture: self.fixture.display().to_string(),
            }),
        }
    }

    fn push_recorded(&mut self, request: &HttpRequest, response: &HttpResponse) {
        let mut entry = RecordEntry::new(request, response);
        entry
            .request_headers
            .retain(|name, _| !REDACTED_HEADERS.contains(&name.to_ascii_lowercase().as_str()));
        self.record.entries.push(entry);
    }
}

/// Cloneable handle that clients use to reach the open context
#[derive(Clone)]
pub struct ContextHandle {
    state: Arc<Mutex<ContextState>>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ContextHandle")
            .field("session", &state.session_name)
            .field("mode", &state.mode)
            .field("released", &state.released)
            .finish()
    }
}

impl ContextHandle {
    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send a request through the session
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mode = {
            let state = self.state();
            state.ensure_open()?;
            state.mode
        };

        match mode {
            SessionMode::Playback => {
                let response = self.state().take_recorded(&request)?;
                tracing::trace!(method = %request.method, uri = %request.uri, "Replayed");
                Ok(response)
            }
            SessionMode::Record => {
                let response = self.transport.send(&request).await?;
                let mut state = self.state();
                state.ensure_open()?;
                state.push_recorded(&request, &response);
                Ok(response)
            }
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.state().mode
    }

    pub fn session_name(&self) -> String {
        self.state().session_name.clone()
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    /// A variable stored with the fixture
    pub fn variable(&self, name: &str) -> Option<String> {
        self.state().record.variables.get(name).cloned()
    }

    /// Store a variable; only persisted in record mode
    pub fn set_variable(&self, name: &str, value: &str) {
        self.state()
            .record
            .variables
            .insert(name.to_string(), value.to_string());
    }

    /// Generate a unique asset name, or replay the one recorded at this position
    pub fn generate_name(&self, prefix: &str) -> Result<String> {
        let mut state = self.state();
        state.ensure_open()?;
        let session = state.session_name.clone();

        match state.mode {
            SessionMode::Record => {
                let suffix = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_nanos() % 10_000)
                    .unwrap_or_default();
                let name = format!("{}{}{}", prefix, state.name_cursor, suffix);
                state.name_cursor += 1;
                state
                    .record
                    .names
                    .entry(session)
                    .or_default()
                    .push(name.clone());
                Ok(name)
            }
            SessionMode::Playback => {
                let cursor = state.name_cursor;
                let recorded = state
                    .record
                    .names
                    .get(&session)
                    .and_then(|names| names.get(cursor))
                    .cloned();
                match recorded {
                    Some(name) => {
                        state.name_cursor += 1;
                        Ok(name)
                    }
                    None => Err(Error::NameNotRecorded {
                        prefix: prefix.to_string(),
                        fixture: state.fixture.display().to_string(),
                    }),
                }
            }
        }
    }
}

/// Scoped record/replay context for one test session
pub struct MockContext {
    handle: ContextHandle,
}

impl MockContext {
    /// Open the context for `calling_class` / `session_name`
    ///
    /// With [`HttpMode::Auto`] the mode depends on whether the fixture file
    /// already exists on disk.
    pub fn start(
        settings: &RecorderSettings,
        calling_class: &str,
        session_name: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let fixture = fixture_path(&settings.records_dir, calling_class, session_name);
        let mode = match settings.mode {
            HttpMode::Auto if fixture.exists() => SessionMode::Playback,
            HttpMode::Auto | HttpMode::Record => SessionMode::Record,
            HttpMode::Playback => SessionMode::Playback,
        };

        let mut record = match mode {
            SessionMode::Playback => SessionRecord::load(&fixture)?,
            SessionMode::Record => SessionRecord::default(),
        };

        let fixture_entries = record.entries.len();
        let mut pending: HashMap<String, VecDeque<RecordEntry>> = HashMap::new();
        for entry in record.entries.drain(..) {
            let key = settings.policy.matching_key(&entry.request());
            pending.entry(key).or_default().push_back(entry);
        }

        tracing::info!(
            class = calling_class,
            session = session_name,
            %mode,
            fixture = %fixture.display(),
            "Session context started"
        );

        let state = ContextState {
            class_name: calling_class.to_string(),
            session_name: session_name.to_string(),
            mode,
            fixture,
            policy: settings.policy.clone(),
            pending,
            record,
            fixture_entries,
            name_cursor: 0,
            replayed: 0,
            released: false,
        };

        Ok(Self {
            handle: ContextHandle {
                state: Arc::new(Mutex::new(state)),
                transport,
            },
        })
    }

    /// Handle for binding clients to this context
    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    pub fn mode(&self) -> SessionMode {
        self.handle.mode()
    }

    pub fn fixture_path(&self) -> PathBuf {
        self.handle.state().fixture.clone()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Release the context, writing the fixture in record mode
    ///
    /// Handles stop working once this returns, whether or not the write
    /// succeeded. A second call fails with [`Error::ContextReleased`].
    pub fn release(&mut self) -> Result<SessionSummary> {
        let mut state = self.handle.state();
        state.ensure_open()?;
        state.released = true;

        let entries = match state.mode {
            SessionMode::Record => {
                state.record.save(&state.fixture)?;
                state.record.entries.len()
            }
            SessionMode::Playback => state.fixture_entries,
        };

        let summary = SessionSummary {
            class_name: state.class_name.clone(),
            session_name: state.session_name.clone(),
            mode: state.mode,
            fixture: state.fixture.clone(),
            entries,
            replayed: state.replayed,
        };

        tracing::info!(
            session = %summary.session_name,
            mode = %summary.mode,
            entries = summary.entries,
            replayed = summary.replayed,
            "Session context released"
        );

        Ok(summary)
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        if self.handle.is_released() {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release session context: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: format!("{{\"call\":{},\"uri\":\"{}\"}}", n, request.uri),
            })
        }
    }

    fn settings(dir: &std::path::Path, mode: HttpMode) -> RecorderSettings {
        RecorderSettings {
            records_dir: dir.to_path_buf(),
            mode,
            policy: MatcherPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(CountingTransport::default());
        let uri = "https://management.azure.com/subscriptions/s/providers/Microsoft.Compute/vms?api-version=2017-03-30";

        let mut context =
            MockContext::start(&settings(dir.path(), HttpMode::Auto), "A.B.VmTests", "TestList", transport.clone())
                .unwrap();
        assert_eq!(context.mode(), SessionMode::Record);
        let handle = context.handle();
        let first = handle
            .send(HttpRequest::new("GET", uri).header("Authorization", "Bearer secret"))
            .await
            .unwrap();
        let summary = context.release().unwrap();
        assert_eq!(summary.entries, 1);
        assert!(summary.fixture.ends_with("VmTests/TestList.json"));

        let saved = std::fs::read_to_string(&summary.fixture).unwrap();
        assert!(!saved.contains("secret"));

        // Fixture exists now, so auto mode replays without the transport
        let mut replay =
            MockContext::start(&settings(dir.path(), HttpMode::Auto), "A.B.VmTests", "TestList", transport.clone())
                .unwrap();
        assert_eq!(replay.mode(), SessionMode::Playback);
        let other_version = uri.replace("2017-03-30", "2018-06-01");
        let replayed = replay
            .handle()
            .send(HttpRequest::new("GET", other_version))
            .await
            .unwrap();
        assert_eq!(replayed, first);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let summary = replay.release().unwrap();
        assert_eq!(summary.replayed, 1);
    }

    #[tokio::test]
    async fn test_playback_exhausts_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(CountingTransport::default());
        let uri = "https://management.azure.com/subscriptions/s/resourceGroups/rg/providers/Microsoft.RecoveryServices/vaults/v?api-version=2016-06-01";

        let mut context =
            MockContext::start(&settings(dir.path(), HttpMode::Record), "VaultTests", "TestGet", transport.clone())
                .unwrap();
        let first = context.handle().send(HttpRequest::new("GET", uri)).await.unwrap();
        let second = context.handle().send(HttpRequest::new("GET", uri)).await.unwrap();
        context.release().unwrap();

        let replay =
            MockContext::start(&settings(dir.path(), HttpMode::Playback), "VaultTests", "TestGet", transport)
                .unwrap();
        let handle = replay.handle();
        assert_eq!(handle.send(HttpRequest::new("GET", uri)).await.unwrap(), first);
        assert_eq!(handle.send(HttpRequest::new("GET", uri)).await.unwrap(), second);

        let err = handle.send(HttpRequest::new("GET", uri)).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));

        // Backup provider api-version is significant
        let err = handle
            .send(HttpRequest::new("GET", uri.replace("2016-06-01", "2016-12-01")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));
    }

    #[test]
    fn test_forced_playback_without_fixture_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = MockContext::start(
            &settings(dir.path(), HttpMode::Playback),
            "VaultTests",
            "Missing",
            Arc::new(CountingTransport::default()),
        );
        assert!(matches!(result, Err(Error::FixtureRead { .. })));
    }

    #[tokio::test]
    async fn test_release_is_single_and_detaches_handles() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = MockContext::start(
            &settings(dir.path(), HttpMode::Record),
            "VaultTests",
            "TestRelease",
            Arc::new(CountingTransport::default()),
        )
        .unwrap();
        let handle = context.handle();

        context.release().unwrap();
        assert!(handle.is_released());
        assert!(matches!(context.release(), Err(Error::ContextReleased(_))));
        assert!(matches!(
            handle.send(HttpRequest::new("GET", "https://x/")).await,
            Err(Error::ContextReleased(_))
        ));
    }

    #[test]
    fn test_drop_releases_and_writes_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let handle = {
            let context = MockContext::start(
                &settings(dir.path(), HttpMode::Record),
                "VaultTests",
                "TestDrop",
                Arc::new(CountingTransport::default()),
            )
            .unwrap();
            context.handle()
        };
        assert!(handle.is_released());
        assert!(dir.path().join("VaultTests").join("TestDrop.json").exists());
    }

    #[test]
    fn test_generated_names_are_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn Transport> = Arc::new(CountingTransport::default());

        let mut context =
            MockContext::start(&settings(dir.path(), HttpMode::Record), "VaultTests", "TestNames", transport.clone())
                .unwrap();
        let handle = context.handle();
        let first = handle.generate_name("vault").unwrap();
        let second = handle.generate_name("vault").unwrap();
        assert!(first.starts_with("vault"));
        assert_ne!(first, second);
        handle.set_variable("SubscriptionId", "sub-1");
        context.release().unwrap();

        let replay =
            MockContext::start(&settings(dir.path(), HttpMode::Playback), "VaultTests", "TestNames", transport)
                .unwrap();
        let handle = replay.handle();
        assert_eq!(handle.variable("SubscriptionId").as_deref(), Some("sub-1"));
        assert_eq!(handle.generate_name("vault").unwrap(), first);
        assert_eq!(handle.generate_name("vault").unwrap(), second);
        assert!(matches!(
            handle.generate_name("vault"),
            Err(Error::NameNotRecorded { .. })
        ));
    }
}
