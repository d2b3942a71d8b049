use serde::{Deserialize, Serialize};

/// Chosen layout of a [`crate::ids::NodeId`] across the bundle/refs key
/// columns. Immutable for the lifetime of a store once chosen at
/// construction (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageModel {
    /// Single 16-byte column.
    BinaryKeys,
    /// Two 64-bit columns (high, low).
    SplitLong,
}

/// Recognized configuration options (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleStoreConfig {
    /// Driver identifier; opaque, forwarded to the connection factory.
    #[serde(default = "default_driver")]
    pub driver: String,
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Selects the DDL resource `<schema>.ddl`.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Prepended to every table name; sanitized at init (§4.5).
    #[serde(default)]
    pub schema_object_prefix: String,
    /// Bytes; BINARY values at or above this size are externalized.
    #[serde(default = "default_min_blob_size")]
    pub min_blob_size: u32,
    /// `true` selects the filesystem-resident blob backend, `false` the
    /// database-resident one.
    #[serde(default)]
    pub external_blobs: bool,
    #[serde(default)]
    pub consistency_check: bool,
    #[serde(default)]
    pub consistency_fix: bool,
    /// Single-character flags controlling per-error policy; consumed only
    /// by the codec (§4.1) and consistency checker (§4.6).
    #[serde(default)]
    pub error_handling: String,
    /// Storage model for node ids (§3). Not part of the source's XML
    /// config surface, but pinned at construction the same way.
    #[serde(default = "default_storage_model")]
    pub storage_model: StorageModel,
    /// Root directory for the filesystem blob backend; unused for
    /// DB-resident blobs.
    #[serde(default)]
    pub blob_fs_root: Option<std::path::PathBuf>,
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_schema() -> String {
    "default".to_string()
}

fn default_min_blob_size() -> u32 {
    4096
}

fn default_storage_model() -> StorageModel {
    StorageModel::BinaryKeys
}

impl Default for BundleStoreConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            url: ":memory:".to_string(),
            user: None,
            password: None,
            schema: default_schema(),
            schema_object_prefix: String::new(),
            min_blob_size: default_min_blob_size(),
            external_blobs: false,
            consistency_check: false,
            consistency_fix: false,
            error_handling: String::new(),
            storage_model: default_storage_model(),
            blob_fs_root: None,
        }
    }
}

impl BundleStoreConfig {
    /// `error_handling` exposes single-character flags; this checks
    /// whether the flag for "fail hard on soft decode issues" is set.
    pub fn fail_on_soft_errors(&self) -> bool {
        self.error_handling.contains('F')
    }
}
