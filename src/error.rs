use crate::engine::EngineError;
use crate::record::Gid;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a download with gid {0} is already registered")]
    DuplicateGid(Gid),

    #[error("no download registered for gid {0}")]
    UnknownGid(Gid),
}

/// Why a mirror request was not turned into a job.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("Download failed. Blacklisted URL.")]
    BlockedUrl,

    #[error("Failed to start the download. {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
