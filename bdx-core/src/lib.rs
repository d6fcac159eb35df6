#![forbid(unsafe_code)]

pub mod cancel;
pub mod errlog;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod provision;
pub mod remote;
pub mod scan;
pub mod session;

pub mod crypto {
    pub mod secret;
}

// Re-exports: stable API surface
pub use cancel::CancelToken;
pub use pipeline::{ExportOptions, ExportPipeline, RunSummary, discover_archives};
pub use provision::{ChannelProvisioner, ProvisionerConfig, ReadyChannel};
pub use scan::{extract_keys, scan_archive};
pub use session::{Backend, LoginParams, Session, open_store};
