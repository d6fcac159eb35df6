//! Seams to the remote BigDB store.
//!
//! The control plane manages access channels, the data plane authenticates
//! against one and hands back a [`RecordFetcher`]. Backends implement the
//! traits; the provisioner and the pipeline only see the traits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub mod fs;

pub type Record = serde_json::Value;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("access denied: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Outcome of a single record fetch that is not a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The key was in the snapshot but the store no longer has it.
    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    Transient(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    SharedSecret,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub delete: bool,
}

impl Permission {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub description: String,
    pub auth_method: AuthMethod,
    pub permissions: BTreeMap<String, Permission>,
    pub shared_secret: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
}

pub trait ControlPlane: Send + Sync {
    fn list_channels(&self) -> Result<Vec<ChannelInfo>, RemoteError>;

    fn create_channel(&self, spec: &ChannelSpec) -> Result<(), RemoteError>;

    fn delete_channel(&self, name: &str) -> Result<(), RemoteError>;

    fn list_tables(&self) -> Result<Vec<String>, RemoteError>;
}

/// Live connection through a channel; shared read-only by all workers.
pub trait RecordFetcher: Send + Sync {
    fn fetch(&self, table: &str, key: &str) -> Result<Record, FetchError>;
}

pub trait DataPlane: Send + Sync {
    fn authenticate(
        &self,
        channel: &str,
        credential: &str,
    ) -> Result<Arc<dyn RecordFetcher>, RemoteError>;
}
