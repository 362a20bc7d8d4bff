//! HTTP transport to one server
//!
//! A thin typed wrapper over `reqwest`: endpoint construction under the
//! protocol-major path prefix, the node user-agent, and decoding of the
//! structured error payload on non-2xx responses.

use std::time::Duration;

use replid_core::domain::version::protocol_major;
use replid_core::{ErrorPayload, HeartbeatRequest, IdentifyRequest, Snapshot, VersionInfo};
use reqwest::{Client, Response};
use tracing::debug;

use crate::error::TransportError;

/// Per-request timeout; a hung server must not stall the loops forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to one replication server.
#[derive(Debug, Clone)]
pub struct Connection {
    address: String,
    client: Client,
}

impl Connection {
    /// Creates a connection to `address` (base URL, e.g.
    /// `http://server-a:8080`).
    pub fn new(address: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("replid-node/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            address: address.into(),
            client,
        }
    }

    /// The server's base address.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/v{}{}",
            self.address.trim_end_matches('/'),
            protocol_major(),
            endpoint
        )
    }

    fn http_error(&self, source: reqwest::Error) -> TransportError {
        TransportError::Http {
            address: self.address.clone(),
            source,
        }
    }

    /// Turns a non-2xx response into [`TransportError::Api`], decoding the
    /// structured payload when the server sent one.
    async fn check(&self, response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorPayload>(&body)
            .map(|payload| payload.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        Err(TransportError::Api {
            address: self.address.clone(),
            status: status.as_u16(),
            message,
        })
    }

    /// `GET /version` - unversioned, pre-identify.
    pub async fn request_version(&self) -> Result<VersionInfo, TransportError> {
        debug!(server = %self.address, "requesting version");
        let response = self
            .client
            .get(format!("{}/version", self.address.trim_end_matches('/')))
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        let response = self.check(response).await?;
        response.json().await.map_err(|e| TransportError::Malformed {
            address: self.address.clone(),
            detail: e.to_string(),
        })
    }

    /// `POST /v<major>/identify`.
    pub async fn identify(&self, request: &IdentifyRequest) -> Result<(), TransportError> {
        debug!(server = %self.address, uuid = %request.uuid, "identifying");
        let response = self
            .client
            .post(self.url("/identify"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        self.check(response).await.map(|_| ())
    }

    /// `POST /v<major>/heartbeat`.
    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url("/heartbeat"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        self.check(response).await.map(|_| ())
    }

    /// `GET /v<major>/index?uuid&dir` - the server's snapshot of `dir`.
    pub async fn request_index(
        &self,
        uuid: &str,
        dir: &str,
    ) -> Result<Snapshot, TransportError> {
        debug!(server = %self.address, dir, "requesting index");
        let response = self
            .client
            .get(self.url("/index"))
            .query(&[("uuid", uuid), ("dir", dir)])
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        let response = self.check(response).await?;
        response.json().await.map_err(|e| TransportError::Malformed {
            address: self.address.clone(),
            detail: e.to_string(),
        })
    }

    /// `GET /v<major>/sync?uuid&grab` for a single file.
    pub async fn fetch_file(&self, uuid: &str, path: &str) -> Result<Vec<u8>, TransportError> {
        debug!(server = %self.address, path, "fetching file");
        let response = self
            .client
            .get(self.url("/sync"))
            .query(&[("uuid", uuid), ("grab", path)])
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        let response = self.check(response).await?;
        let bytes = response.bytes().await.map_err(|e| self.http_error(e))?;
        Ok(bytes.to_vec())
    }

    /// `GET /v<major>/sync?uuid&grab` for a directory: the tar stream.
    pub async fn fetch_dir(&self, uuid: &str, path: &str) -> Result<Vec<u8>, TransportError> {
        debug!(server = %self.address, path, "fetching directory");
        self.fetch_file(uuid, path).await
    }
}
