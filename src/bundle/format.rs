//! Bundle serialization.
//!
//! A serialized bundle is a JSON document with an explicit envelope:
//!
//! ```text
//! { "format": "claim-freq-bundle", "format_version": 1,
//!   "trained_at": "...", "pipeline": {...}, "model": {...} }
//! ```
//!
//! Decoding checks the envelope first so an unknown or newer payload fails
//! with a clear error instead of a field-level parse message, then rebuilds
//! the pipeline from its frozen parts and re-runs the schema check of
//! `Bundle::new`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::error::{AppError, ErrorKind};
use crate::glm::PoissonGlm;
use crate::preprocess::Pipeline;

pub const BUNDLE_FORMAT: &str = "claim-freq-bundle";
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct Envelope {
    format: String,
    format_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct BundleFile {
    format: String,
    format_version: u32,
    trained_at: DateTime<Utc>,
    pipeline: Pipeline,
    model: PoissonGlm,
}

impl Bundle {
    /// Serialize to the versioned JSON format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        let file = BundleFile {
            format: BUNDLE_FORMAT.to_string(),
            format_version: BUNDLE_FORMAT_VERSION,
            trained_at: self.trained_at,
            pipeline: self.pipeline.clone(),
            model: self.model.clone(),
        };
        serde_json::to_vec(&file)
            .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Failed to serialize bundle: {e}")))
    }

    /// Decode a serialized bundle.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| AppError::new(ErrorKind::CorruptArtifact, format!("Not a bundle payload: {e}")))?;
        if envelope.format != BUNDLE_FORMAT {
            return Err(AppError::new(
                ErrorKind::CorruptArtifact,
                format!("Unknown payload format '{}'.", envelope.format),
            ));
        }
        if envelope.format_version != BUNDLE_FORMAT_VERSION {
            return Err(AppError::new(
                ErrorKind::CorruptArtifact,
                format!(
                    "Unsupported bundle format version {} (this build reads {BUNDLE_FORMAT_VERSION}).",
                    envelope.format_version
                ),
            ));
        }

        let file: BundleFile = serde_json::from_slice(bytes)
            .map_err(|e| AppError::new(ErrorKind::CorruptArtifact, format!("Malformed bundle payload: {e}")))?;

        let pipeline = Pipeline::from_parts(file.pipeline.spec().clone(), file.pipeline.encoders().to_vec())
            .map_err(|e| AppError::new(ErrorKind::CorruptArtifact, e.message()))?;
        if pipeline.feature_names() != file.pipeline.feature_names() {
            return Err(AppError::new(
                ErrorKind::CorruptArtifact,
                "Stored pipeline features do not match its encoders.",
            ));
        }
        file.model.validate()?;
        Bundle::with_timestamp(pipeline, file.model, file.trained_at)
            .map_err(|e| AppError::new(ErrorKind::CorruptArtifact, e.message()))
    }
}
