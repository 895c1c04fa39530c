//! Canonical model record shared by local storage, the catalog and downloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Tag marking a record as featured in the catalog
pub const FEATURED_TAG: &str = "featured";

/// Coarse ranking of whether a model is expected to run on this host
///
/// Variants are declared in ascending order so that `Ord` can be used to
/// compare and demote tiers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityTier {
    Incompatible,
    #[default]
    Unknown,
    PartiallyCompatible,
    FullyCompatible,
}

impl CompatibilityTier {
    /// One step down, saturating at `Incompatible`
    pub fn demoted(self) -> Self {
        match self {
            Self::FullyCompatible => Self::PartiallyCompatible,
            Self::PartiallyCompatible | Self::Unknown => Self::Incompatible,
            Self::Incompatible => Self::Incompatible,
        }
    }
}

impl std::fmt::Display for CompatibilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incompatible => write!(f, "incompatible"),
            Self::Unknown => write!(f, "unknown"),
            Self::PartiallyCompatible => write!(f, "partially_compatible"),
            Self::FullyCompatible => write!(f, "fully_compatible"),
        }
    }
}

/// Container formats whose leading bytes can be checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Gguf,
    Ggml,
}

impl ModelFormat {
    /// Detect the container format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "gguf" => Some(Self::Gguf),
            "ggml" => Some(Self::Ggml),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gguf => write!(f, "GGUF"),
            Self::Ggml => write!(f, "GGML"),
        }
    }
}

/// Description of a model, local or remote
///
/// This is also the on-disk sidecar format, so every field added later must
/// carry a serde default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Unique identifier (e.g., "TheBloke/Llama-2-7B-GGUF")
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Declared payload size in bytes
    pub size: u64,
    /// Human parameter count (e.g., "7B", "350M")
    #[serde(default)]
    pub parameters: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub is_loaded: bool,
    #[serde(default)]
    pub compatibility: CompatibilityTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub license: String,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Optional hex SHA-256 digest of the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ModelRecord {
    /// Create a remote record with the required fields
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author: String::new(),
            description: String::new(),
            size,
            parameters: String::new(),
            local_path: None,
            is_local: false,
            is_loaded: false,
            compatibility: CompatibilityTier::Unknown,
            download_url: None,
            tags: BTreeSet::new(),
            version: String::new(),
            license: String::new(),
            last_updated: Utc::now(),
            sha256: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn with_compatibility(mut self, tier: CompatibilityTier) -> Self {
        self.compatibility = tier;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// Case-insensitive tag membership
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_featured(&self) -> bool {
        self.has_tag(FEATURED_TAG)
    }

    /// Case-insensitive substring match over name, author and tags
    ///
    /// `needle` must already be lowercase.
    pub fn matches_query(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(needle)
            || self.author.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }

    /// Record the payload location after it lands in managed storage
    pub fn mark_local(&mut self, path: PathBuf) {
        self.local_path = Some(path);
        self.is_local = true;
        self.last_updated = Utc::now();
    }

    /// Container format of the payload, based on the local path or the download URL
    pub fn format(&self) -> Option<ModelFormat> {
        match &self.local_path {
            Some(path) => ModelFormat::from_path(path),
            None => ModelFormat::from_path(Path::new(&self.payload_file_name())),
        }
    }

    /// File name to use for the payload in managed storage
    ///
    /// Prefers the existing local file name, then the last segment of the
    /// download URL (without query string), then `model.bin`.
    pub fn payload_file_name(&self) -> String {
        if let Some(name) = self
            .local_path
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        {
            return name.to_string();
        }

        if let Some(url) = &self.download_url {
            let without_query = url.split(['?', '#']).next().unwrap_or_default();
            let without_scheme = without_query
                .split_once("://")
                .map_or(without_query, |(_, rest)| rest);
            // Everything before the first '/' is the host
            if let Some((_, path)) = without_scheme.split_once('/')
                && let Some(segment) = path.rsplit('/').next()
                && !segment.is_empty()
                && segment != "."
                && segment != ".."
            {
                return segment.to_string();
            }
        }

        "model.bin".to_string()
    }
}
