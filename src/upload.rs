use crate::record::{ChatId, Gid};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Everything the upload service needs to push one finished download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadJob {
    pub gid: Gid,
    pub chat_id: ChatId,
    pub download_dir: PathBuf,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub is_tar: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Public link to the uploaded file.
    pub url: String,
    pub file_name: String,
    pub file_size: Option<u64>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to upload {}: {message}", file_path.display())]
pub struct UploadFailure {
    pub file_path: PathBuf,
    pub file_name: String,
    pub message: String,
}

#[async_trait]
pub trait UploadService: Send + Sync {
    /// Resolves once the upload has either finished or failed.
    async fn upload(&self, job: UploadJob) -> Result<UploadReceipt, UploadFailure>;
}
