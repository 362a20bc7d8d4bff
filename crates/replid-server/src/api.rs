//! API endpoints and the accept loop
//!
//! Routes, all JSON unless noted:
//!
//! - `GET /version` - protocol/build info, unauthenticated
//! - `POST /v<major>/identify` - register a peer
//! - `POST /v<major>/heartbeat` - liveness + synced report
//! - `GET /v<major>/index?uuid&dir` - snapshot of a served directory
//! - `GET /v<major>/sync?uuid&grab` - file bytes, or a tar stream for a
//!   directory
//! - `GET /v<major>/nodes?uuid` - registry snapshot, only when enabled
//!
//! Identify-gated endpoints reject unknown peer ids with 401 before doing
//! any filesystem work.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use replid_archive::TAR_CONTENT_TYPE;
use replid_core::domain::version::protocol_major;
use replid_core::{HeartbeatRequest, IdentifyRequest, PeerMetadata, PeerRecord, VersionInfo};
use replid_index::{IndexError, Snapshotter};
use replid_registry::PeerRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::error_response;

/// Shared state every request handler sees.
pub struct ServerContext {
    registry: Arc<PeerRegistry>,
    snapshotter: Snapshotter,
    registry_path: PathBuf,
    expose_peer_list: bool,
}

impl ServerContext {
    /// Creates the context for a serving root and registry.
    pub fn new(
        registry: Arc<PeerRegistry>,
        snapshotter: Snapshotter,
        registry_path: PathBuf,
        expose_peer_list: bool,
    ) -> Self {
        Self {
            registry,
            snapshotter,
            registry_path,
            expose_peer_list,
        }
    }

}

/// The API server: a bound listener plus its shared context.
pub struct ApiServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl ApiServer {
    /// Binds the listener. Use `"127.0.0.1:0"` in tests to get an
    /// ephemeral port back from [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str, context: ServerContext) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    /// The address the server is actually listening on.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until the cancellation token fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(addr = %self.listener.local_addr()?, "API server listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, remote) = result?;
                    let io = TokioIo::new(stream);
                    let context = Arc::clone(&self.context);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let context = Arc::clone(&context);
                            async move { Ok::<_, hyper::Error>(route(req, context, remote).await) }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            warn!(remote = %remote, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("API server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Dispatches one request and logs its outcome.
async fn route(
    req: Request<Incoming>,
    context: Arc<ServerContext>,
    remote: SocketAddr,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let prefix = format!("/v{}", protocol_major());

    let response = if method == Method::GET && path == "/version" {
        serve_version()
    } else if let Some(endpoint) = path.strip_prefix(&prefix) {
        match (method.clone(), endpoint) {
            (Method::POST, "/identify") => identify(req, &context, remote).await,
            (Method::POST, "/heartbeat") => heartbeat(req, &context).await,
            (Method::GET, "/index") => serve_index(&req, &context).await,
            (Method::GET, "/sync") => serve_sync(&req, &context).await,
            (Method::GET, "/nodes") if context.expose_peer_list => serve_nodes(&req, &context),
            _ => error_response(StatusCode::NOT_FOUND, "no such endpoint"),
        }
    } else {
        error_response(StatusCode::NOT_FOUND, "no such endpoint")
    };

    info!(
        method = %method,
        path = %path,
        remote = %remote,
        status = response.status().as_u16(),
        "request"
    );
    response
}

fn json_response<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(serialized) => {
            let mut response = Response::new(Full::new(Bytes::from(serialized)));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            error!(error = %e, "response serialization failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed")
        }
    }
}

fn ok_empty() -> Response<Full<Bytes>> {
    Response::new(Full::new(Bytes::new()))
}

/// Decodes the query string into a map.
fn query_params(req: &Request<Incoming>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Pulls a required, authenticated peer id out of the query; `Err` is the
/// ready-made error response.
fn required_peer(
    params: &HashMap<String, String>,
    context: &ServerContext,
) -> Result<String, Response<Full<Bytes>>> {
    let uuid = params
        .get("uuid")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "must specify uuid"))?;
    if !context.registry.contains(uuid) {
        return Err(error_response(StatusCode::UNAUTHORIZED, "unknown peer id"));
    }
    Ok(uuid.clone())
}

fn serve_version() -> Response<Full<Bytes>> {
    json_response(&VersionInfo::current())
}

async fn identify(
    req: Request<Incoming>,
    context: &ServerContext,
    remote: SocketAddr,
) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("unreadable body: {e}"));
        }
    };
    let request: IdentifyRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("malformed identify: {e}"));
        }
    };
    if let Err(e) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let record = PeerRecord::new(
        remote.to_string(),
        PeerMetadata {
            version: request.version,
            target: request.target,
        },
    );
    context.registry.register(&request.uuid, record);

    // Rewrite the on-disk registry off the request path's hot loop; the
    // in-memory registration already took effect either way.
    let registry = Arc::clone(&context.registry);
    let path = context.registry_path.clone();
    let persisted =
        tokio::task::spawn_blocking(move || registry.persist(&path)).await;
    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "failed to persist peer registry"),
        Err(e) => error!(error = %e, "registry persist task failed"),
    }

    ok_empty()
}

async fn heartbeat(req: Request<Incoming>, context: &ServerContext) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("unreadable body: {e}"));
        }
    };
    let request: HeartbeatRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("malformed heartbeat: {e}"));
        }
    };

    if context.registry.mark_heartbeat(&request.uuid, request.synced) {
        ok_empty()
    } else {
        error_response(StatusCode::UNAUTHORIZED, "unknown peer id")
    }
}

async fn serve_index(req: &Request<Incoming>, context: &ServerContext) -> Response<Full<Bytes>> {
    let params = query_params(req);
    let uuid = match required_peer(&params, context) {
        Ok(uuid) => uuid,
        Err(response) => return response,
    };
    let Some(dir) = params.get("dir").filter(|v| !v.is_empty()).cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "must specify dir");
    };
    context.registry.touch(&uuid);

    let snapshotter = context.snapshotter.clone();
    let walked = tokio::task::spawn_blocking(move || snapshotter.snapshot(&dir)).await;
    match walked {
        Ok(Ok(snapshot)) => json_response(&snapshot),
        Ok(Err(e)) => index_error_response(e),
        Err(e) => {
            error!(error = %e, "snapshot task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "snapshot failed")
        }
    }
}

async fn serve_sync(req: &Request<Incoming>, context: &ServerContext) -> Response<Full<Bytes>> {
    let params = query_params(req);
    let uuid = match required_peer(&params, context) {
        Ok(uuid) => uuid,
        Err(response) => return response,
    };
    let Some(grab) = params.get("grab").filter(|v| !v.is_empty()).cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "must specify grab");
    };
    context.registry.touch(&uuid);

    let (absolute, canonical) = match context.snapshotter.resolve(&grab) {
        Ok(resolved) => resolved,
        Err(e) => return index_error_response(e),
    };

    let metadata = match tokio::fs::metadata(&absolute).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(path = %absolute.display(), error = %e, "sync target unreadable");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "error reading target");
        }
    };

    if metadata.is_dir() {
        if canonical == "/" {
            return error_response(StatusCode::BAD_REQUEST, "must grab a path below the root");
        }
        let name = canonical.trim_start_matches('/').to_string();
        let packed = tokio::task::spawn_blocking(move || {
            let mut buffer = Vec::new();
            replid_archive::pack(&absolute, &name, &mut buffer).map(|()| buffer)
        })
        .await;
        match packed {
            Ok(Ok(buffer)) => {
                let mut response = Response::new(Full::new(Bytes::from(buffer)));
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(TAR_CONTENT_TYPE),
                );
                response
            }
            Ok(Err(e)) => {
                error!(error = %e, "packing directory failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "error packing directory")
            }
            Err(e) => {
                error!(error = %e, "pack task failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "error packing directory")
            }
        }
    } else {
        match tokio::fs::read(&absolute).await {
            Ok(content) => {
                let mut response = Response::new(Full::new(Bytes::from(content)));
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(e) => {
                warn!(path = %absolute.display(), error = %e, "sync read failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "error reading file")
            }
        }
    }
}

fn serve_nodes(req: &Request<Incoming>, context: &ServerContext) -> Response<Full<Bytes>> {
    let params = query_params(req);
    let uuid = match required_peer(&params, context) {
        Ok(uuid) => uuid,
        Err(response) => return response,
    };
    context.registry.touch(&uuid);
    json_response(&context.registry.snapshot())
}

fn index_error_response(error: IndexError) -> Response<Full<Bytes>> {
    match error {
        IndexError::InvalidPath(_) => error_response(StatusCode::BAD_REQUEST, error.to_string()),
        IndexError::NotFound(_) => error_response(StatusCode::NOT_FOUND, error.to_string()),
        IndexError::Io { .. } => {
            error!(error = %error, "walk failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "error walking directory")
        }
    }
}
