use crate::upload::UploadReceipt;
use std::path::Path;

pub const NO_ACTIVE_DOWNLOADS: &str = "No active or queued downloads";
pub const DOWNLOAD_STOPPED: &str = "Download stopped.";
pub const BLACKLISTED_FILENAME: &str = "Blacklisted file name.";
pub const DOWNLOAD_FAILED: &str = "Failed to download.";
pub const UPLOAD_BLACKLISTED: &str = "Upload failed. Blacklisted file name.";
pub const UPLOAD_NO_FILES: &str = "Upload failed. Could not get downloaded files.";
pub const UPLOAD_NO_SIZE: &str = "Upload failed. Could not get file size.";
pub const UPLOAD_METADATA_CHECK: &str = "Upload failed. Could not check if the file is metadata.";
pub const UPLOAD_INCONSISTENT: &str = "Upload failed. Could not get files.";
pub const CANNOT_CANCEL_UPLOAD: &str = "Upload in progress. Cannot cancel.";
pub const CANCELED_ELSEWHERE: &str = "The download was canceled.";
pub const CANCEL_NOT_FOUND: &str = "Reply to the command message for the download that you want to cancel. Also make sure that the download is even active.";

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", size, UNITS[unit])
}

pub fn download_stopped(blacklisted: bool) -> String {
    if blacklisted {
        format!("{} {}", DOWNLOAD_STOPPED, BLACKLISTED_FILENAME)
    } else {
        DOWNLOAD_STOPPED.to_string()
    }
}

pub fn download_failed(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{} {}", DOWNLOAD_FAILED, reason),
        None => DOWNLOAD_FAILED.to_string(),
    }
}

pub fn uploaded_link(receipt: &UploadReceipt) -> String {
    match receipt.file_size {
        Some(size) if size > 0 => format!(
            "<a href='{}'>{}</a> ({})",
            receipt.url,
            receipt.file_name,
            format_size(size)
        ),
        _ => format!("<a href='{}'>{}</a>", receipt.url, receipt.file_name),
    }
}

pub fn upload_failed(file_name: &str, message: &str) -> String {
    format!("Failed to upload <code>{}</code> to Drive.{}", file_name, message)
}

pub fn uploading_line(filename: &str) -> String {
    format!("<i>{}</i> - Uploading", filename)
}

/// Name of the file (or top level directory) the engine produced.
pub fn file_name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
