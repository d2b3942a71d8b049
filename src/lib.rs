//! Bundle-oriented persistence engine for a hierarchical content
//! repository: node bundles (identity, properties, children, parent
//! pointer) encoded into a versioned binary format and persisted over a
//! relational substrate, with large binary values optionally externalized
//! into a content-addressed blob store.
//!
//! [`Engine`] is the entry point: `Engine::open` wires together the schema
//! bootstrapper, the name index, the blob backend, and the transactional
//! write driver; [`ChangeLog`] batches mutations applied atomically via
//! [`Engine::store`].

pub mod blob;
pub mod bundle_store;
pub mod codec;
pub mod config;
pub mod consistency;
pub mod engine;
pub mod error;
pub mod ids;
pub mod keys;
pub mod model;
pub mod name_index;
pub mod refs_store;
pub mod schema;
pub mod statement_pool;
pub mod varint;
pub mod writer;

pub use blob::{BlobStore, DbBlobStore, FsBlobStore};
pub use config::{BundleStoreConfig, StorageModel};
pub use consistency::ConsistencyReport;
pub use engine::Engine;
pub use error::{BundleResult, BundleStoreError};
pub use ids::{NodeId, QName};
pub use model::{
    BinaryValue, ChangeLog, ChildEntry, NodePropBundle, NodeReferences, PropertyEntry,
    PropertyType, Value,
};
