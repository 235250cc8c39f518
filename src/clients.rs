//! Management clients bound to a session context
//!
//! Each client is a thin handle: an endpoint, credentials, the api-version
//! and user agent of the SDK client it stands in for, and the context handle
//! its traffic goes through. Building a client never touches the network.

use std::collections::BTreeMap;
use std::fmt;

use crate::environment::TestEnvironment;
use crate::recorder::{ContextHandle, HttpRequest, HttpResponse};
use crate::common::Result;

/// Logical role of a client in the set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientRole {
    /// Recovery services backup client
    BackupService,
    /// Recovery services vault client
    RecoveryVault,
    /// Resource manager client
    ResourceManager,
    /// Resource manager client built from the (possibly customized) environment factory
    LegacyResourceManager,
}

impl ClientRole {
    pub const ALL: [ClientRole; 4] = [
        ClientRole::BackupService,
        ClientRole::RecoveryVault,
        ClientRole::ResourceManager,
        ClientRole::LegacyResourceManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackupService => "backup-service",
            Self::RecoveryVault => "recovery-vault",
            Self::ResourceManager => "resource-manager",
            Self::LegacyResourceManager => "legacy-resource-manager",
        }
    }

    /// User agent of the SDK client this role stands in for
    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::BackupService => {
                "Microsoft.Azure.Management.RecoveryServices.Backup.RecoveryServicesBackupClient"
            }
            Self::RecoveryVault => "Microsoft.Azure.Management.RecoveryServices.RecoveryServicesClient",
            Self::ResourceManager => "Microsoft.Azure.Management.ResourceManager.ResourceManagementClient",
            Self::LegacyResourceManager => {
                "Microsoft.Azure.Management.Resources.ResourceManagementClient"
            }
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Self::BackupService => "2016-12-01",
            Self::RecoveryVault => "2016-06-01",
            Self::ResourceManager => "2017-05-10",
            Self::LegacyResourceManager => "2016-02-01",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client handle bound to the active context
#[derive(Debug, Clone)]
pub struct ServiceClient {
    role: ClientRole,
    environment: TestEnvironment,
    handle: ContextHandle,
}

impl ServiceClient {
    pub fn new(role: ClientRole, environment: TestEnvironment, handle: ContextHandle) -> Self {
        Self {
            role,
            environment,
            handle,
        }
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    pub fn environment(&self) -> &TestEnvironment {
        &self.environment
    }

    pub fn context(&self) -> &ContextHandle {
        &self.handle
    }

    /// Absolute URI for a path relative to the subscription
    ///
    /// `{subscriptionId}` in the path is substituted; the role's api-version
    /// is appended unless the path already carries one.
    pub fn uri(&self, path: &str) -> String {
        let path = path
            .trim_start_matches('/')
            .replace("{subscriptionId}", &self.environment.subscription_id);
        let separator = if path.contains('?') { '&' } else { '?' };
        if path.contains("api-version=") {
            format!("{}{}", self.environment.base_uri, path)
        } else {
            format!(
                "{}{}{}api-version={}",
                self.environment.base_uri,
                path,
                separator,
                self.role.api_version()
            )
        }
    }

    /// Send a request through the session context
    pub async fn send(&self, method: &str, path: &str, body: Option<&str>) -> Result<HttpResponse> {
        let mut request = HttpRequest::new(method, self.uri(path))
            .header("User-Agent", self.role.user_agent())
            .header("x-ms-client-request-id", self.handle.session_name());
        if let Some(token) = &self.environment.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json; charset=utf-8")
                .body(body);
        }

        tracing::debug!(role = %self.role, method = %request.method, uri = %request.uri, "Client request");
        self.handle.send(request).await
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.send("GET", path, None).await
    }

    pub async fn put(&self, path: &str, body: &str) -> Result<HttpResponse> {
        self.send("PUT", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.send("DELETE", path, None).await
    }
}

/// The fixed set of clients for one session
#[derive(Debug, Clone)]
pub struct ClientSet {
    clients: BTreeMap<ClientRole, ServiceClient>,
}

impl ClientSet {
    /// Build every role against `handle`
    ///
    /// The legacy resource manager uses `legacy` (the environment from the
    /// factory the initialize hook saw); the other clients use `environment`.
    pub fn new(handle: &ContextHandle, environment: &TestEnvironment, legacy: &TestEnvironment) -> Self {
        let clients = ClientRole::ALL
            .iter()
            .map(|&role| {
                let env = match role {
                    ClientRole::LegacyResourceManager => legacy.clone(),
                    _ => environment.clone(),
                };
                (role, ServiceClient::new(role, env, handle.clone()))
            })
            .collect();
        Self { clients }
    }

    pub fn get(&self, role: ClientRole) -> &ServiceClient {
        // Every role is inserted by `new`
        &self.clients[&role]
    }

    pub fn backup(&self) -> &ServiceClient {
        self.get(ClientRole::BackupService)
    }

    pub fn vault(&self) -> &ServiceClient {
        self.get(ClientRole::RecoveryVault)
    }

    pub fn resource_manager(&self) -> &ServiceClient {
        self.get(ClientRole::ResourceManager)
    }

    pub fn legacy_resource_manager(&self) -> &ServiceClient {
        self.get(ClientRole::LegacyResourceManager)
    }

    /// The session context every client in the set is bound to
    pub fn context(&self) -> &ContextHandle {
        self.backup().context()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceClient> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
