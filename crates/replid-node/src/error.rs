//! Transport and orchestration errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors talking to one server.
///
/// Transport errors drive the missed-heartbeat accounting; they are never
/// fatal to the process on their own.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never completed (connect, timeout, broken stream).
    #[error("http error talking to {address}: {source}")]
    Http {
        /// The server's base address.
        address: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a structured error payload.
    #[error("{address} returned {status}: {message}")]
    Api {
        /// The server's base address.
        address: String,
        /// HTTP status from the payload.
        status: u16,
        /// Message from the payload.
        message: String,
    },

    /// The response body did not decode as the expected type.
    #[error("malformed response from {address}: {detail}")]
    Malformed {
        /// The server's base address.
        address: String,
        /// What failed to decode.
        detail: String,
    },
}

impl TransportError {
    /// True for an authorization rejection (unknown peer id).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Api { status: 401, .. })
    }
}

/// Errors that stop the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The node was started without any configured server.
    #[error("no servers configured")]
    NoServers,

    /// Every configured server is flagged offline; there is nothing left
    /// to converge against.
    #[error("all configured servers are offline")]
    AllServersOffline,

    /// A server speaks an incompatible protocol major and the node is not
    /// configured to ignore the mismatch.
    #[error("protocol version mismatch with {address}: local {local}, remote {remote}")]
    VersionMismatch {
        /// The server's base address.
        address: String,
        /// Our protocol version.
        local: String,
        /// The server's protocol version.
        remote: String,
    },

    /// The node's persisted uuid could not be read or written.
    #[error("identity file error at {path}: {source}")]
    Identity {
        /// The uuid file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
