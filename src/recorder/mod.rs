//! HTTP record/replay
//!
//! Fixtures, the matching policy, the live transport, the scoped session
//! context that ties them together, and a loopback proxy onto the context
//! for script processes.

mod context;
mod matcher;
mod proxy;
mod record;
mod transport;

pub use context::{ContextHandle, MockContext, RecorderSettings, SessionMode, SessionSummary};
pub use matcher::MatcherPolicy;
pub use proxy::ContextProxy;
pub use record::{fixture_path, HttpRequest, HttpResponse, RecordEntry, SessionRecord};
pub use transport::{ReqwestTransport, Transport};
