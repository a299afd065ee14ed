//! HTTPS registry board.
//!
//! Wire format (JSON unless noted):
//!
//! - `POST {endpoint}/v1/artifacts/{name}/versions` with the raw payload as
//!   body and `X-Content-Hash: <blake3 hex>`; the registry assigns the next
//!   version and answers `201` with the version metadata.
//! - `GET {endpoint}/v1/artifacts/{name}/versions` → `200 [metadata, ...]`
//! - `GET {endpoint}/v1/artifacts/{name}/versions/{version|latest}` →
//!   `200 {"meta": {...}, "payload": "<payload text>"}`
//!
//! Every request carries `Authorization: Bearer <credential>`.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;

use crate::error::{AppError, ErrorKind};
use crate::store::{ArtifactVersion, Board, Credential, StoredArtifact};

pub const HASH_HEADER: &str = "X-Content-Hash";

pub struct RemoteBoard {
    client: Client,
    base_url: String,
    credential: Credential,
}

#[derive(Debug, Deserialize)]
struct VersionBody {
    meta: ArtifactVersion,
    payload: String,
}

impl RemoteBoard {
    pub fn new(base_url: &str, credential: Credential, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn versions_url(&self, name: &str) -> String {
        format!("{}/v1/artifacts/{name}/versions", self.base_url)
    }

    fn send(&self, req: RequestBuilder, what: &str) -> Result<Response, AppError> {
        let resp = req
            .bearer_auth(self.credential.expose())
            .send()
            .map_err(|e| {
                let reason = if e.is_timeout() { "timed out" } else { "failed" };
                AppError::new(ErrorKind::Unavailable, format!("{what} {reason}: {e}"))
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(status_error(status, what))
    }
}

impl Board for RemoteBoard {
    fn put(&self, name: &str, payload: &[u8], hash: &str) -> Result<ArtifactVersion, AppError> {
        let req = self
            .client
            .post(self.versions_url(name))
            .header(HASH_HEADER, hash)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec());
        let resp = self.send(req, &format!("Publishing '{name}'"))?;
        resp.json().map_err(|e| {
            AppError::new(
                ErrorKind::Unavailable,
                format!("Registry sent an unreadable publish acknowledgement: {e}"),
            )
        })
    }

    fn get(&self, name: &str, version: Option<u64>) -> Result<StoredArtifact, AppError> {
        let selector = version.map_or_else(|| "latest".to_string(), |v| v.to_string());
        let url = format!("{}/{selector}", self.versions_url(name));
        let resp = self.send(self.client.get(url), &format!("Retrieving '{name}' ({selector})"))?;
        let body: VersionBody = resp.json().map_err(|e| {
            AppError::new(
                ErrorKind::CorruptArtifact,
                format!("Registry sent an unreadable artifact body: {e}"),
            )
        })?;
        Ok(StoredArtifact {
            meta: body.meta,
            payload: body.payload.into_bytes(),
        })
    }

    fn list(&self, name: &str) -> Result<Vec<ArtifactVersion>, AppError> {
        let resp = self.send(self.client.get(self.versions_url(name)), &format!("Listing '{name}'"))?;
        let mut versions: Vec<ArtifactVersion> = resp.json().map_err(|e| {
            AppError::new(ErrorKind::Unavailable, format!("Registry sent an unreadable version list: {e}"))
        })?;
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    fn location(&self) -> String {
        format!("registry {}", self.base_url)
    }
}

fn status_error(status: StatusCode, what: &str) -> AppError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthError,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            ErrorKind::InvalidInput
        }
        // 409 (lost a version race on the registry side), 5xx and anything else.
        _ => ErrorKind::Unavailable,
    };
    AppError::new(kind, format!("{what} failed with status {status}."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_error_kinds() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, "x").kind(), ErrorKind::AuthError);
        assert_eq!(status_error(StatusCode::FORBIDDEN, "x").kind(), ErrorKind::AuthError);
        assert_eq!(status_error(StatusCode::NOT_FOUND, "x").kind(), ErrorKind::NotFound);
        assert_eq!(status_error(StatusCode::CONFLICT, "x").kind(), ErrorKind::Unavailable);
        assert_eq!(status_error(StatusCode::BAD_GATEWAY, "x").kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn unreachable_registry_is_unavailable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let board = RemoteBoard::new(
            "http://127.0.0.1:9",
            Credential::new("k"),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = board.get("m", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
