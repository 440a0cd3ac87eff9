//! basemerge core library — domain types, the store seam, config, errors.
//!
//! - [`types`] — rows, field descriptors, snapshots, newtypes
//! - [`store`] — the [`TableStore`] trait the sync pipeline runs against
//! - [`base`] — in-memory [`Base`] and its JSON file form
//! - [`config`] — `~/.basemerge/config.yaml` load / save / init
//! - [`error`] — [`ConfigError`], [`StoreError`]

pub mod base;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use base::Base;
pub use config::{SyncConfig, TargetConfig};
pub use error::{ConfigError, StoreError};
pub use store::TableStore;
pub use types::{
    FieldDescriptor, FieldType, ProvisionState, Record, RecordId, Row, TableName, TableSnapshot,
};
