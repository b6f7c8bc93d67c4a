//! Director (control-plane) client.
//!
//! [`DirectorClient`] is the seam the orchestrator consumes;
//! [`HttpDirectorClient`] implements it over the Director's REST API using
//! [`reqwest`] with basic authentication.

use std::fmt;

use async_trait::async_trait;
use bbr_core::instance::InstanceIdentity;
use serde::Deserialize;

/// Errors from the Director layer.
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Director request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The Director returned a non-2xx status code.
    #[error("Director responded with non-successful status code: {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response parsed but is not usable.
    #[error("Invalid Director response: {0}")]
    InvalidResponse(String),

    /// The client could not be configured (bad CA certificate, ...).
    #[error("Director client configuration error: {0}")]
    Config(String),
}

/// Control-plane operations the orchestrator needs.
#[async_trait]
pub trait DirectorClient: Send + Sync {
    /// Every instance of `deployment`, in Director order.
    async fn list_instances(&self, deployment: &str)
        -> Result<Vec<InstanceIdentity>, DirectorError>;

    /// The deployment manifest as raw YAML.
    async fn download_manifest(&self, deployment: &str) -> Result<String, DirectorError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One entry of `GET /deployments/<name>/vms`.
#[derive(Debug, Deserialize)]
pub struct VmResponse {
    pub job: Option<String>,
    pub index: Option<u32>,
    pub id: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeploymentResponse {
    manifest: String,
}

impl VmResponse {
    /// Convert to an [`InstanceIdentity`], rejecting incomplete entries.
    pub fn into_instance(self) -> Result<InstanceIdentity, DirectorError> {
        let group = self
            .job
            .ok_or_else(|| DirectorError::InvalidResponse("VM without an instance group".into()))?;
        let index = self.index.ok_or_else(|| {
            DirectorError::InvalidResponse(format!("VM in group '{group}' has no index"))
        })?;
        let address = self.ips.into_iter().next().ok_or_else(|| {
            DirectorError::InvalidResponse(format!("VM {group}/{index} has no IP address"))
        })?;
        Ok(InstanceIdentity {
            id: self.id.unwrap_or_else(|| format!("{group}-{index}")),
            group,
            index,
            address,
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// HTTP client for a Director.
pub struct HttpDirectorClient {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl fmt::Debug for HttpDirectorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDirectorClient")
            .field("url", &self.url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl HttpDirectorClient {
    /// Create a client for the Director at `url`.
    ///
    /// * `ca_cert_pem` - optional PEM bundle trusted in addition to the
    ///   system roots.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        ca_cert_pem: Option<&[u8]>,
    ) -> Result<Self, DirectorError> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| DirectorError::Config(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| DirectorError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, DirectorError> {
        let response = self
            .client
            .get(format!("{}{path}", self.url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectorError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DirectorClient for HttpDirectorClient {
    async fn list_instances(
        &self,
        deployment: &str,
    ) -> Result<Vec<InstanceIdentity>, DirectorError> {
        let vms: Vec<VmResponse> = self
            .get(&format!("/deployments/{deployment}/vms"))
            .await?
            .json()
            .await?;
        tracing::debug!(deployment, vm_count = vms.len(), "Fetched deployment VMs");
        vms.into_iter().map(VmResponse::into_instance).collect()
    }

    async fn download_manifest(&self, deployment: &str) -> Result<String, DirectorError> {
        let body: DeploymentResponse = self
            .get(&format!("/deployments/{deployment}"))
            .await?
            .json()
            .await?;
        Ok(body.manifest)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
