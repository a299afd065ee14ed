//! Prediction service.
//!
//! The service retrieves one bundle from the artifact store at startup and
//! keeps it resident for the process lifetime; there is no per-request
//! fetch and no reload. A retrieval failure aborts startup, so the HTTP
//! listener only ever exists with a fully decoded bundle behind it.
//!
//! Requests are answered by a small pool of blocking worker threads that
//! share the bundle through an `Arc`. `Bundle::predict` is pure, so no
//! locking is involved.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde_json::json;
use tiny_http::{Header, Request, Response, Server};

use crate::bundle::Bundle;
use crate::domain::RawRow;
use crate::error::{AppError, ErrorKind};
use crate::store::{ArtifactStore, ArtifactVersion};

/// Largest request body accepted by `/predict`.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// A status code and JSON body produced by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Reply {
    fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": code, "message": message }),
        }
    }
}

/// The resident bundle plus the version it came from.
#[derive(Debug)]
pub struct PredictionService {
    meta: ArtifactVersion,
    bundle: Arc<Bundle>,
}

impl PredictionService {
    /// Retrieve the latest version of `name` exactly once.
    pub fn start(store: &ArtifactStore, name: &str) -> Result<Self, AppError> {
        let retrieved = store.fetch(name, None)?;
        log::info!(
            "loaded {} v{} (trained {}, {} features)",
            retrieved.meta.name,
            retrieved.meta.version,
            retrieved.bundle.trained_at(),
            retrieved.bundle.pipeline().feature_names().len()
        );
        Ok(Self::new(retrieved.meta, retrieved.bundle))
    }

    pub fn new(meta: ArtifactVersion, bundle: Bundle) -> Self {
        Self {
            meta,
            bundle: Arc::new(bundle),
        }
    }

    pub fn meta(&self) -> &ArtifactVersion {
        &self.meta
    }

    /// Route one request. Pure with respect to the service state.
    pub fn handle(&self, method: &str, url: &str, body: &[u8]) -> Reply {
        let path = url.split('?').next().unwrap_or(url);
        match (method, path) {
            ("POST", "/predict") => self.predict(body),
            ("GET", "/ping") => Reply::ok(json!({ "status": "ok" })),
            ("GET", "/metadata") => Reply::ok(json!({
                "name": self.meta.name,
                "version": self.meta.version,
                "created_at": self.meta.created_at,
                "hash": self.meta.hash,
                "bundle": self.bundle.describe(),
            })),
            (_, "/predict" | "/ping" | "/metadata") => {
                Reply::error(405, "method_not_allowed", &format!("{method} is not supported on {path}"))
            }
            _ => Reply::error(404, "not_found", &format!("no route for {path}")),
        }
    }

    fn predict(&self, body: &[u8]) -> Reply {
        let rows: Vec<RawRow> = match serde_json::from_slice(body) {
            Ok(rows) => rows,
            Err(e) => {
                return Reply::error(400, "bad_request", &format!("expected a JSON array of row objects: {e}"));
            }
        };
        match self.bundle.predict(&rows) {
            Ok(preds) => Reply::ok(json!(preds)),
            Err(e) => {
                let status = match e.kind() {
                    ErrorKind::SchemaMismatch | ErrorKind::TransformError => 422,
                    _ => 500,
                };
                Reply::error(status, e.kind().code(), e.message())
            }
        }
    }

    /// Bind `addr` and answer requests on `workers` threads.
    pub fn spawn(self, addr: &str, workers: usize) -> Result<ServiceHandle, AppError> {
        let server = Server::http(addr)
            .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Cannot listen on {addr}: {e}")))?;
        let local = server.server_addr().to_ip().ok_or_else(|| {
            AppError::new(ErrorKind::InvalidInput, format!("{addr} is not an IP listen address"))
        })?;

        let server = Arc::new(server);
        let service = Arc::new(self);
        let workers = workers.max(1);
        let mut threads = Vec::with_capacity(workers);
        for i in 0..workers {
            let server = Arc::clone(&server);
            let service = Arc::clone(&service);
            let handle = std::thread::Builder::new()
                .name(format!("predict-{i}"))
                .spawn(move || {
                    for request in server.incoming_requests() {
                        service.respond(request);
                    }
                })
                .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Cannot start worker: {e}")))?;
            threads.push(handle);
        }

        log::info!(
            "serving {} v{} on http://{local} ({workers} workers)",
            service.meta.name,
            service.meta.version
        );
        Ok(ServiceHandle {
            server,
            threads,
            addr: local,
        })
    }

    fn respond(&self, mut request: Request) {
        let method = request.method().as_str().to_string();
        let url = request.url().to_string();

        let mut body = Vec::new();
        let read = request
            .as_reader()
            .take(MAX_BODY_BYTES + 1)
            .read_to_end(&mut body);
        let reply = match read {
            Err(e) => Reply::error(400, "bad_request", &format!("unreadable body: {e}")),
            Ok(_) if body.len() as u64 > MAX_BODY_BYTES => {
                Reply::error(413, "payload_too_large", "request body exceeds the size limit")
            }
            Ok(_) => self.handle(&method, &url, &body),
        };

        if reply.status >= 500 {
            log::warn!("{method} {url} -> {}: {}", reply.status, reply.body);
        } else if reply.status >= 400 {
            log::info!("{method} {url} -> {}", reply.status);
        } else {
            log::debug!("{method} {url} -> {}", reply.status);
        }

        let mut response = Response::from_data(reply.body.to_string().into_bytes()).with_status_code(reply.status);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
            response = response.with_header(header);
        }
        if let Err(e) = request.respond(response) {
            log::warn!("failed to write response for {method} {url}: {e}");
        }
    }
}

/// A running listener and its worker threads.
pub struct ServiceHandle {
    server: Arc<Server>,
    threads: Vec<JoinHandle<()>>,
    addr: SocketAddr,
}

impl ServiceHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until every worker exits. A worker that panicked is logged and
    /// turns the result into `Unavailable`.
    pub fn join(self) -> Result<(), AppError> {
        let mut crashed = 0usize;
        for t in self.threads {
            let name = t.thread().name().unwrap_or("predict").to_string();
            if t.join().is_err() {
                log::warn!("worker {name} exited abnormally");
                crashed += 1;
            }
        }
        if crashed > 0 {
            return Err(AppError::new(
                ErrorKind::Unavailable,
                format!("{crashed} prediction worker(s) exited abnormally"),
            ));
        }
        Ok(())
    }

    /// Stop accepting requests and wait for the workers.
    pub fn shutdown(self) -> Result<(), AppError> {
        for _ in 0..self.threads.len() {
            self.server.unblock();
        }
        self.join()
    }
}
