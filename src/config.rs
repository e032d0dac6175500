use crate::legacy::TypeDefinition;
use crate::link::{LinkOptions, VariantPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TARGET: &str = "#portal-root";
pub const DEFAULT_HEADER_TITLE: &str = "Portal";
pub const DEFAULT_LOADING_MESSAGE: &str = "Opening…";
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8080/";

/// Initialization options for a [`crate::Portal`].
///
/// Keys are camelCase in JSON, so configuration written for the browser
/// embedding (`readFlags`, `headerTitle`, ...) loads unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortalOptions {
    /// Selector of the element that receives cards and panels.
    pub target: String,
    /// Honour the `newtab` and `auto` query flags.
    pub read_flags: bool,
    /// Insert the shared header block when the page has none.
    pub header: bool,
    pub header_title: String,
    pub header_subject: Option<String>,
    pub loading_message: String,
    /// Origin of the embedding page; relative URLs resolve against it.
    pub origin: String,
    /// Fall back to the ambient `PORTAL_DATASET` bindings.
    pub ambient_fallback: bool,
    pub variant_policy: VariantPolicy,
    pub merge_variant_params: bool,
    pub types: BTreeMap<String, TypeDefinition>,
}

impl Default for PortalOptions {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            read_flags: true,
            header: true,
            header_title: DEFAULT_HEADER_TITLE.to_string(),
            header_subject: None,
            loading_message: DEFAULT_LOADING_MESSAGE.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            ambient_fallback: true,
            variant_policy: VariantPolicy::default(),
            merge_variant_params: false,
            types: BTreeMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PortalOptions {
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn link_options(&self) -> LinkOptions<'_> {
        LinkOptions {
            base: &self.origin,
            variant_policy: self.variant_policy,
            merge_variant_params: self.merge_variant_params,
        }
    }
}
