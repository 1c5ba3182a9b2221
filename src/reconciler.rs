//! Matches engine lifecycle notifications to their download records.
//!
//! The engine can report a job before `add_uri` has returned its gid to us,
//! so a notification for an unknown gid is parked on a timer wheel and
//! retried a bounded number of times before being dropped.

use crate::engine::{EngineEvent, EventKind, MetadataVerdict};
use crate::format::{self, UPLOAD_BLACKLISTED, UPLOAD_INCONSISTENT, UPLOAD_METADATA_CHECK, UPLOAD_NO_FILES, UPLOAD_NO_SIZE};
use crate::mirror::Mirror;
use crate::record::{AllowanceState, Gid};
use crate::upload::{UploadFailure, UploadJob, UploadReceipt};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

pub const MAX_RETRIES: u32 = 8;
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct PendingEvent {
    event: EngineEvent,
    attempt: u32,
}

pub struct EventReconciler {
    mirror: Mirror,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    pending: DelayQueue<PendingEvent>,
}

impl EventReconciler {
    pub fn new(mirror: Mirror, events: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        Self {
            mirror,
            events,
            pending: DelayQueue::new(),
        }
    }

    /// Runs until the engine's event channel closes and no retries remain.
    pub async fn run(mut self) {
        let mut closed = false;
        loop {
            tokio::select! {
                event = self.events.recv(), if !closed => match event {
                    Some(event) => self.dispatch(PendingEvent { event, attempt: 1 }),
                    None => closed = true,
                },
                Some(expired) = self.pending.next(), if !self.pending.is_empty() => {
                    self.dispatch(expired.into_inner());
                }
                else => break,
            }
            if closed && self.pending.is_empty() {
                break;
            }
        }
        info!("Engine event stream closed");
    }

    fn dispatch(&mut self, pending: PendingEvent) {
        let PendingEvent { event, attempt } = pending;
        let known = self.mirror.registry().get_by_gid(&event.gid).is_some();

        if known {
            let mirror = self.mirror.clone();
            tokio::spawn(async move { mirror.apply(event).await });
        } else if attempt <= MAX_RETRIES {
            debug!("{}: no download for {} yet. {} / {}.", event.kind, event.gid, attempt, MAX_RETRIES);
            self.pending.insert(
                PendingEvent {
                    event,
                    attempt: attempt + 1,
                },
                RETRY_DELAY,
            );
        } else {
            warn!("{}: still no download for {}. Giving up.", event.kind, event.gid);
        }
    }
}

impl Mirror {
    pub(crate) async fn apply(&self, event: EngineEvent) {
        match event.kind {
            EventKind::Started => self.on_started(&event.gid).await,
            EventKind::Stopped => self.on_stopped(&event.gid).await,
            EventKind::Completed => self.on_completed(&event.gid).await,
            EventKind::Failed => self.on_failed(&event.gid).await,
        }
    }

    async fn on_started(&self, gid: &Gid) {
        let dir = self.registry().get_mut(gid).map(|record| {
            record.mark_downloading();
            record.download_dir.clone()
        });
        let Some(dir) = dir else {
            return;
        };
        info!("Started {}. Dir: {}.", gid, dir);
        self.broadcast(serde_json::json!({ "type": "download", "status": "started", "gid": gid }));
        self.ensure_refresh_cycle();
        self.refresh_status().await;

        match self.engine.get_status(gid).await {
            Ok(status) => {
                self.enforce_filename(gid, &status.filename);
            }
            Err(e) => debug!("onDownloadStart: no status for {}: {}", gid, e),
        }
    }

    pub(crate) async fn on_stopped(&self, gid: &Gid) {
        let blocked = self
            .registry()
            .get_by_gid(gid)
            .map(|record| record.allowance() == AllowanceState::Blocked);
        let Some(blocked) = blocked else {
            return;
        };
        info!("Stopped {}", gid);
        self.cleanup(gid, format::download_stopped(blocked), None).await;
    }

    async fn on_completed(&self, gid: &Gid) {
        if self.record(gid).is_none() {
            return;
        }
        match self.engine.get_file_path(gid).await {
            Err(e) => {
                error!("onDownloadComplete: Error getting file path for {}. {}", gid, e);
                self.cleanup(gid, UPLOAD_NO_FILES.to_string(), None).await;
            }
            Ok(Some(file)) => self.start_upload(gid, file).await,
            Ok(None) => self.resolve_metadata(gid).await,
        }
    }

    async fn start_upload(&self, gid: &Gid, file: PathBuf) {
        let file_size = match self.engine.get_file_size(gid).await {
            Ok(size) => size,
            Err(e) => {
                error!("onDownloadComplete: Error getting file size for {}. {}", gid, e);
                self.cleanup(gid, UPLOAD_NO_SIZE.to_string(), None).await;
                return;
            }
        };

        // The engine is done with this job, so a rejection here ends it
        // without a stop request.
        let file_name = format::file_name_from_path(&file);
        if !self.evaluate_filename(gid, &file_name).is_admitted() {
            info!("{} blacklisted. Filename: {}.", gid, file_name);
            self.cleanup(gid, UPLOAD_BLACKLISTED.to_string(), None).await;
            return;
        }

        let job = {
            let mut registry = self.registry();
            let Some(record) = registry.get_mut(gid) else {
                return;
            };
            record.mark_uploading();
            UploadJob {
                gid: gid.clone(),
                chat_id: record.chat_id,
                download_dir: self.scratch_path(&record.download_dir),
                file_path: file,
                file_size,
                is_tar: record.is_tar,
            }
        };

        info!("{} complete. Filename: {}. Starting upload.", gid, file_name);
        self.broadcast(serde_json::json!({ "type": "download", "status": "uploading", "gid": gid }));
        let outcome = self.uploader.upload(job).await;
        self.on_upload_complete(gid, outcome).await;
    }

    async fn on_upload_complete(&self, gid: &Gid, outcome: Result<UploadReceipt, UploadFailure>) {
        match outcome {
            Ok(receipt) => {
                info!("Uploaded {}", gid);
                let message = format::uploaded_link(&receipt);
                self.cleanup(gid, message, Some(receipt.url)).await;
            }
            Err(failure) => {
                error!(
                    "uploadFile: Failed to upload {} - {}: {}",
                    gid,
                    failure.file_path.display(),
                    failure.message
                );
                let message = format::upload_failed(&failure.file_name, &failure.message);
                self.cleanup(gid, message, None).await;
            }
        }
    }

    /// A completion without files is a metadata job handing over to the
    /// real download, which keeps the record under its new gid.
    async fn resolve_metadata(&self, gid: &Gid) {
        match self.engine.metadata_job(gid).await {
            Err(e) => {
                error!("onDownloadComplete: Failed to check if {} was a metadata download: {}", gid, e);
                self.cleanup(gid, UPLOAD_METADATA_CHECK.to_string(), None).await;
            }
            Ok(MetadataVerdict {
                is_metadata: true,
                resolved_gid: Some(new_gid),
            }) => {
                info!("Changing GID from {} to {}", gid, new_gid);
                let rekeyed = self.registry().rekey(gid, new_gid.clone());
                match rekeyed {
                    Ok(()) => self.broadcast(serde_json::json!({
                        "type": "download",
                        "status": "rekeyed",
                        "gid": new_gid,
                        "previous_gid": gid,
                    })),
                    Err(e) => {
                        error!("onDownloadComplete: {}", e);
                        self.cleanup(gid, UPLOAD_INCONSISTENT.to_string(), None).await;
                    }
                }
            }
            Ok(_) => {
                error!("onDownloadComplete: No files - not metadata.");
                self.cleanup(gid, UPLOAD_INCONSISTENT.to_string(), None).await;
            }
        }
    }

    async fn on_failed(&self, gid: &Gid) {
        if self.record(gid).is_none() {
            return;
        }
        let message = match self.engine.get_error(gid).await {
            Ok(reason) => {
                error!("{} failed. {}", gid, reason);
                format::download_failed(Some(&reason))
            }
            Err(e) => {
                error!("{} failed. Failed to get the error message. {}", gid, e);
                format::download_failed(None)
            }
        };
        self.cleanup(gid, message, None).await;
    }
}
