//! Versioned artifact store for bundles.
//!
//! The store client serializes a `Bundle`, hands the bytes to a `Board`
//! (the backing service) and verifies them on the way back. Version
//! numbering and write atomicity belong to the board:
//!
//! - `RemoteBoard` talks to a registry over HTTPS with a bearer credential;
//!   the registry assigns versions.
//! - `FolderBoard` keeps versions in a local directory and publishes each one
//!   with an atomic directory rename.
//!
//! Versions for a name start at 1 and strictly increase. Retrieving without a
//! version resolves to the highest version at call time.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::error::{AppError, ErrorKind};

pub mod folder;
pub mod remote;

pub use folder::FolderBoard;
pub use remote::RemoteBoard;

/// Environment variable holding the registry address.
pub const ENV_ENDPOINT: &str = "CONNECT_SERVER";
/// Environment variable holding the registry bearer credential.
pub const ENV_CREDENTIAL: &str = "CONNECT_API_KEY";
/// Environment variable holding the default artifact name.
pub const ENV_NAME: &str = "CLAIM_FREQ_MODEL";

/// Network timeout applied to every registry call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_NAME_LEN: usize = 128;

/// Metadata of one published version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub name: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// blake3 hex digest of the payload.
    pub hash: String,
    pub size: u64,
}

/// A version's metadata plus its raw payload.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub meta: ArtifactVersion,
    pub payload: Vec<u8>,
}

/// A retrieved, verified and decoded bundle.
#[derive(Debug, Clone)]
pub struct RetrievedBundle {
    pub meta: ArtifactVersion,
    pub bundle: Bundle,
}

/// Backing storage for artifact versions.
///
/// Implementations must make `put` atomic: a version is either fully
/// readable or absent, and concurrent `put`s never share a version number.
pub trait Board: Send + Sync {
    /// Store `payload` under the next version of `name`.
    fn put(&self, name: &str, payload: &[u8], hash: &str) -> Result<ArtifactVersion, AppError>;

    /// Fetch a version (or the latest when `version` is `None`).
    fn get(&self, name: &str, version: Option<u64>) -> Result<StoredArtifact, AppError>;

    /// All versions of `name`, ascending.
    fn list(&self, name: &str) -> Result<Vec<ArtifactVersion>, AppError>;

    /// Short description for logs (never includes credentials).
    fn location(&self) -> String;
}

/// Secret bearer credential. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Read the credential from `CONNECT_API_KEY`, if set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var(ENV_CREDENTIAL)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Self)
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Remote(String),
    Folder(PathBuf),
}

impl Endpoint {
    /// `http(s)://` selects a remote registry; anything else is a local
    /// directory (an optional `file://` prefix is stripped).
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::new(
                ErrorKind::InvalidInput,
                format!("No artifact store endpoint configured (set {ENV_ENDPOINT} or --board)."),
            ));
        }
        if raw.starts_with("https://") || raw.starts_with("http://") {
            return Ok(Endpoint::Remote(raw.trim_end_matches('/').to_string()));
        }
        let path = raw.strip_prefix("file://").unwrap_or(raw);
        Ok(Endpoint::Folder(PathBuf::from(path)))
    }
}

/// Explicit store configuration: where, with which credential, which artifact.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: Endpoint,
    pub credential: Option<Credential>,
    pub name: String,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(endpoint: &str, credential: Option<Credential>, name: &str) -> Result<Self, AppError> {
        validate_name(name)?;
        Ok(Self {
            endpoint: Endpoint::parse(endpoint)?,
            credential,
            name: name.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }
}

/// Client for publishing and retrieving bundles.
pub struct ArtifactStore {
    board: Box<dyn Board>,
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("board", &self.board.location())
            .finish()
    }
}

impl ArtifactStore {
    /// Build the client for a configuration.
    ///
    /// A remote endpoint without a credential fails here with `AuthError`, so
    /// a misconfigured process stops before doing any work.
    pub fn open(config: &StoreConfig) -> Result<Self, AppError> {
        match &config.endpoint {
            Endpoint::Remote(url) => {
                let credential = config.credential.clone().ok_or_else(|| {
                    AppError::new(
                        ErrorKind::AuthError,
                        format!("{ENV_CREDENTIAL} is not set; the registry at {url} requires a credential."),
                    )
                })?;
                Ok(Self::with_board(RemoteBoard::new(url, credential, config.timeout)?))
            }
            Endpoint::Folder(path) => Ok(Self::with_board(FolderBoard::new(path)?)),
        }
    }

    pub fn with_board(board: impl Board + 'static) -> Self {
        Self { board: Box::new(board) }
    }

    /// Serialize and publish a bundle under the next version of `name`.
    pub fn publish(&self, name: &str, bundle: &Bundle) -> Result<ArtifactVersion, AppError> {
        validate_name(name)?;
        let payload = bundle.to_bytes()?;
        let hash = content_hash(&payload);
        let meta = self.board.put(name, &payload, &hash)?;
        if meta.name != name || meta.hash != hash {
            return Err(AppError::new(
                ErrorKind::CorruptArtifact,
                format!("Store acknowledged '{}' with a different name or hash.", meta.name),
            ));
        }
        log::info!(
            "published {name} v{} ({} bytes) to {}",
            meta.version,
            meta.size,
            self.board.location()
        );
        Ok(meta)
    }

    /// Retrieve a bundle by name, at `version` or the latest.
    pub fn retrieve(&self, name: &str, version: Option<u64>) -> Result<Bundle, AppError> {
        self.fetch(name, version).map(|r| r.bundle)
    }

    /// Retrieve a bundle together with its version metadata.
    pub fn fetch(&self, name: &str, version: Option<u64>) -> Result<RetrievedBundle, AppError> {
        validate_name(name)?;
        let stored = self.board.get(name, version)?;
        if let Some(requested) = version {
            if stored.meta.version != requested {
                return Err(AppError::new(
                    ErrorKind::CorruptArtifact,
                    format!("Asked for {name} v{requested} but got v{}.", stored.meta.version),
                ));
            }
        }
        let actual = content_hash(&stored.payload);
        if actual != stored.meta.hash {
            return Err(AppError::new(
                ErrorKind::CorruptArtifact,
                format!("{name} v{}: payload hash mismatch", stored.meta.version),
            ));
        }
        let bundle = Bundle::from_bytes(&stored.payload)?;
        log::debug!("retrieved {name} v{} from {}", stored.meta.version, self.board.location());
        Ok(RetrievedBundle {
            meta: stored.meta,
            bundle,
        })
    }

    /// Published versions of `name`, ascending.
    pub fn versions(&self, name: &str) -> Result<Vec<ArtifactVersion>, AppError> {
        validate_name(name)?;
        self.board.list(name)
    }
}

/// blake3 hex digest.
pub fn content_hash(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Artifact names become path segments and URL segments, so keep them plain.
pub fn validate_name(name: &str) -> Result<(), AppError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::InvalidInput,
            format!("Invalid artifact name '{name}' (use letters, digits, '.', '_' or '-')."),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::fitted_bundle;
    use std::sync::Mutex;

    #[test]
    fn endpoints_select_board_kind() {
        assert_eq!(
            Endpoint::parse("https://connect.example.com/").unwrap(),
            Endpoint::Remote("https://connect.example.com".into())
        );
        assert_eq!(
            Endpoint::parse("file:///var/boards").unwrap(),
            Endpoint::Folder(PathBuf::from("/var/boards"))
        );
        assert_eq!(Endpoint::parse("  ").unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn remote_endpoint_without_credential_is_auth_error() {
        let config = StoreConfig::new("https://connect.example.com", None, "freq").unwrap();
        let err = ArtifactStore::open(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthError);
    }

    #[test]
    fn credential_is_redacted() {
        let c = Credential::new("s3cr3t");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        let config = StoreConfig::new("https://x.example", Some(c), "freq").unwrap();
        assert!(!format!("{config:?}").contains("s3cr3t"));
    }

    #[test]
    fn names_are_restricted() {
        assert!(validate_name("claim_freq-glm.v2").is_ok());
        for bad in ["", "../etc", "a/b", ".hidden", "sp ace"] {
            assert_eq!(validate_name(bad).unwrap_err().kind(), ErrorKind::InvalidInput, "{bad}");
        }
    }

    /// Board that returns whatever it was last given, optionally corrupted.
    struct EchoBoard {
        stored: Mutex<Option<StoredArtifact>>,
        corrupt: bool,
    }

    impl Board for EchoBoard {
        fn put(&self, name: &str, payload: &[u8], hash: &str) -> Result<ArtifactVersion, AppError> {
            let meta = ArtifactVersion {
                name: name.to_string(),
                version: 1,
                created_at: Utc::now(),
                hash: hash.to_string(),
                size: payload.len() as u64,
            };
            let mut payload = payload.to_vec();
            if self.corrupt {
                payload.push(b' ');
            }
            *self.stored.lock().unwrap() = Some(StoredArtifact {
                meta: meta.clone(),
                payload,
            });
            Ok(meta)
        }

        fn get(&self, name: &str, _version: Option<u64>) -> Result<StoredArtifact, AppError> {
            self.stored
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AppError::new(ErrorKind::NotFound, name.to_string()))
        }

        fn list(&self, _name: &str) -> Result<Vec<ArtifactVersion>, AppError> {
            Ok(Vec::new())
        }

        fn location(&self) -> String {
            "echo".into()
        }
    }

    #[test]
    fn corrupted_payload_is_detected_on_retrieve() {
        let store = ArtifactStore::with_board(EchoBoard {
            stored: Mutex::new(None),
            corrupt: true,
        });
        store.publish("freq", &fitted_bundle()).unwrap();
        let err = store.retrieve("freq", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptArtifact);
    }

    #[test]
    fn wrong_version_from_board_is_rejected() {
        let store = ArtifactStore::with_board(EchoBoard {
            stored: Mutex::new(None),
            corrupt: false,
        });
        store.publish("freq", &fitted_bundle()).unwrap();
        assert!(store.retrieve("freq", Some(1)).is_ok());
        let err = store.retrieve("freq", Some(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptArtifact);
    }
}
