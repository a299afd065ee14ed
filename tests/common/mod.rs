//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::Utc;
use claim_freq::bundle::Bundle;
use claim_freq::data::generate_portfolio;
use claim_freq::glm::GlmOptions;
use claim_freq::preprocess::PipelineSpec;
use claim_freq::store::ArtifactVersion;
use claim_freq::store::remote::HASH_HEADER;
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server};

/// Bundle fitted on a seeded synthetic portfolio with the default columns.
pub fn portfolio_bundle(n: usize, seed: u64) -> Bundle {
    let data = generate_portfolio(n, seed).unwrap();
    Bundle::fit(&PipelineSpec::default(), &data, &GlmOptions::default()).unwrap()
}

type Versions = HashMap<String, Vec<(ArtifactVersion, Vec<u8>)>>;

/// In-process registry speaking the remote board wire format.
pub struct FakeRegistry {
    pub url: String,
    server: Arc<Server>,
    thread: Option<JoinHandle<()>>,
}

impl FakeRegistry {
    pub fn start(token: &str) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let expected = format!("Bearer {token}");
        let versions: Mutex<Versions> = Mutex::new(HashMap::new());

        let worker = Arc::clone(&server);
        let thread = std::thread::spawn(move || {
            for request in worker.incoming_requests() {
                handle(request, &expected, &versions);
            }
        });

        Self {
            url: format!("http://{addr}"),
            server,
            thread: Some(thread),
        }
    }
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn header(req: &Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn reply(req: Request, status: u16, body: serde_json::Value) {
    let ct = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
    let resp = Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(ct);
    let _ = req.respond(resp);
}

fn handle(mut req: Request, expected: &str, versions: &Mutex<Versions>) {
    if header(&req, "Authorization").as_deref() != Some(expected) {
        return reply(req, 401, json!({"error": "unauthorized"}));
    }

    let url = req.url().to_string();
    let parts: Vec<&str> = url.trim_start_matches('/').split('/').collect();
    let (name, selector) = match parts.as_slice() {
        ["v1", "artifacts", name, "versions"] => (name.to_string(), None),
        ["v1", "artifacts", name, "versions", sel] => (name.to_string(), Some(sel.to_string())),
        _ => return reply(req, 404, json!({"error": "no route"})),
    };

    let method = req.method().clone();
    match (method, selector) {
        (Method::Post, None) => {
            let mut payload = Vec::new();
            req.as_reader().read_to_end(&mut payload).unwrap();
            let hash = header(&req, HASH_HEADER).unwrap_or_default();
            let mut all = versions.lock().unwrap();
            let list = all.entry(name.clone()).or_default();
            let meta = ArtifactVersion {
                name,
                version: list.len() as u64 + 1,
                created_at: Utc::now(),
                hash,
                size: payload.len() as u64,
            };
            list.push((meta.clone(), payload));
            drop(all);
            reply(req, 201, serde_json::to_value(meta).unwrap());
        }
        (Method::Get, None) => {
            let all = versions.lock().unwrap();
            let metas: Vec<ArtifactVersion> = all
                .get(&name)
                .map(|l| l.iter().map(|(m, _)| m.clone()).collect())
                .unwrap_or_default();
            drop(all);
            reply(req, 200, serde_json::to_value(metas).unwrap());
        }
        (Method::Get, Some(sel)) => {
            let all = versions.lock().unwrap();
            let found = all.get(&name).and_then(|l| {
                if sel == "latest" {
                    l.last().cloned()
                } else {
                    let v: u64 = sel.parse().ok()?;
                    l.iter().find(|(m, _)| m.version == v).cloned()
                }
            });
            drop(all);
            match found {
                Some((meta, payload)) => reply(
                    req,
                    200,
                    json!({"meta": meta, "payload": String::from_utf8(payload).unwrap()}),
                ),
                None => reply(req, 404, json!({"error": "not found"})),
            }
        }
        _ => reply(req, 405, json!({"error": "method"})),
    }
}
