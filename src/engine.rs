//! Contract with the download engine adapter.
//!
//! The adapter owns the transport to the download daemon. It answers queries
//! about a job by gid and forwards the daemon's lifecycle notifications as
//! [`EngineEvent`]s on the channel handed to [`crate::Mirror::start`].

use crate::record::Gid;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("the download engine is not connected")]
    Disconnected,

    #[error("{0}")]
    Request(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Stopped,
    Completed,
    Failed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Started => "onDownloadStart",
            EventKind::Stopped => "onDownloadStop",
            EventKind::Completed => "onDownloadComplete",
            EventKind::Failed => "onDownloadError",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub gid: Gid,
}

impl EngineEvent {
    pub fn new(kind: EventKind, gid: impl Into<Gid>) -> Self {
        Self {
            kind,
            gid: gid.into(),
        }
    }
}

/// Live progress as reported by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStatus {
    /// Pre-rendered progress block shown in status messages.
    pub progress_text: String,
    /// Name of the file or top level directory. Empty while unknown.
    pub filename: String,
}

/// Answer to "was this job only fetching metadata?".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataVerdict {
    pub is_metadata: bool,
    /// The gid of the data job the metadata resolved to.
    pub resolved_gid: Option<Gid>,
}

#[async_trait]
pub trait DownloadEngine: Send + Sync {
    async fn add_uri(&self, url: &str, dir: &Path) -> Result<Gid, EngineError>;

    async fn stop_download(&self, gid: &Gid) -> Result<(), EngineError>;

    async fn get_status(&self, gid: &Gid) -> Result<EngineStatus, EngineError>;

    /// `None` when the job produced no file, e.g. a torrent's metadata phase.
    async fn get_file_path(&self, gid: &Gid) -> Result<Option<PathBuf>, EngineError>;

    async fn get_file_size(&self, gid: &Gid) -> Result<u64, EngineError>;

    async fn get_error(&self, gid: &Gid) -> Result<String, EngineError>;

    async fn metadata_job(&self, gid: &Gid) -> Result<MetadataVerdict, EngineError>;
}
