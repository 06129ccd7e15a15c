//! Output references and the image resolution law.
//!
//! An executed job produces a list of [`OutputReference`]s. Two kinds exist:
//! artifacts addressed on the execution engine (which may live in temporary
//! storage) and assets already ingested into the application's own storage.
//! When both are present only the internal assets are displayed.

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::types::AssetId;

/// Engine source kind for artifacts that are deleted after a while.
pub const TRANSIENT_SOURCE_KIND: &str = "temp";

/// Default engine source kind when the payload omits it.
pub const DEFAULT_SOURCE_KIND: &str = "output";

fn default_source_kind() -> String {
    DEFAULT_SOURCE_KIND.to_string()
}

/// A single output of a generation job.
///
/// Wire form: `{"kind":"image","filename":"a.png","subfolder":"","type":"output"}`
/// or `{"kind":"asset","id":7}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputReference {
    /// Artifact addressed on the execution engine.
    Image {
        filename: String,
        #[serde(default)]
        subfolder: String,
        #[serde(rename = "type", default = "default_source_kind")]
        source_kind: String,
    },

    /// Durable asset in the application's own storage.
    #[serde(rename = "asset")]
    InternalAsset { id: AssetId },
}

impl OutputReference {
    pub fn image(filename: impl Into<String>) -> Self {
        OutputReference::Image {
            filename: filename.into(),
            subfolder: String::new(),
            source_kind: default_source_kind(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, OutputReference::InternalAsset { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, OutputReference::Image { source_kind, .. } if source_kind == TRANSIENT_SOURCE_KIND)
    }
}

/// Engine-native image entry inside an `executed` payload.
#[derive(Debug, Deserialize)]
struct EngineImage {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_source_kind")]
    source_kind: String,
}

#[derive(Debug, Deserialize)]
struct EngineAsset {
    id: AssetId,
}

/// Normalize a raw output payload into typed references.
///
/// Accepts either an array of tagged references or the engine's object form
/// `{"images": [{filename, subfolder, type}], "assets": [{id}]}`. Entries
/// that do not parse are skipped; any other shape yields nothing.
pub fn normalize_output(value: &serde_json::Value) -> Vec<OutputReference> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match OutputReference::deserialize(item) {
                Ok(reference) => Some(reference),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unrecognised output entry");
                    None
                }
            })
            .collect(),
        serde_json::Value::Object(map) => {
            let mut outputs = Vec::new();
            if let Some(serde_json::Value::Array(images)) = map.get("images") {
                outputs.extend(
                    images
                        .iter()
                        .filter_map(|v| EngineImage::deserialize(v).ok())
                        .map(|img| OutputReference::Image {
                            filename: img.filename,
                            subfolder: img.subfolder,
                            source_kind: img.source_kind,
                        }),
                );
            }
            if let Some(serde_json::Value::Array(assets)) = map.get("assets") {
                outputs.extend(
                    assets
                        .iter()
                        .filter_map(|v| EngineAsset::deserialize(v).ok())
                        .map(|asset| OutputReference::InternalAsset { id: asset.id }),
                );
            }
            outputs
        }
        _ => Vec::new(),
    }
}

/// Builds display URLs for output references against the REST base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUrls {
    base: String,
}

impl AssetUrls {
    /// * `base` - REST base URL, e.g. `http://host:8000`. A trailing slash is ignored.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// URL of an engine artifact: `{base}/view?filename=..&subfolder=..&type=..`.
    pub fn image_url(&self, filename: &str, subfolder: &str, source_kind: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("filename", filename)
            .append_pair("subfolder", subfolder)
            .append_pair("type", source_kind)
            .finish();
        format!("{}/view?{query}", self.base)
    }

    /// URL of an internal asset: `{base}/assets/{id}/file`.
    pub fn asset_url(&self, id: AssetId) -> String {
        format!("{}/assets/{id}/file", self.base)
    }

    /// Apply the resolution law to a list of outputs.
    ///
    /// If any internal asset is present, only internal assets are resolved.
    /// Otherwise engine artifacts are resolved, skipping transient ones.
    pub fn resolve(&self, outputs: &[OutputReference]) -> Vec<String> {
        let has_internal = outputs.iter().any(OutputReference::is_internal);

        outputs
            .iter()
            .filter_map(|output| match output {
                OutputReference::InternalAsset { id } => Some(self.asset_url(*id)),
                OutputReference::Image { .. } if has_internal || output.is_transient() => None,
                OutputReference::Image {
                    filename,
                    subfolder,
                    source_kind,
                } => Some(self.image_url(filename, subfolder, source_kind)),
            })
            .collect()
    }
}
