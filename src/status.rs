use crate::chat::ChatError;
use crate::format::{self, NO_ACTIVE_DOWNLOADS};
use crate::mirror::Mirror;
use crate::record::{DownloadRecord, MessageRef};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub message: String,
    pub count: usize,
}

/// Tracks the periodic status refresh task. At most one cycle is active;
/// each start bumps the generation so a stopped cycle notices and exits.
#[derive(Debug, Default)]
pub(crate) struct RefreshCycle {
    state: Mutex<CycleState>,
}

#[derive(Debug, Default)]
struct CycleState {
    generation: u64,
    active: bool,
}

impl RefreshCycle {
    fn begin(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.active {
            return None;
        }
        state.generation += 1;
        state.active = true;
        Some(state.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active && state.generation == generation
    }

    /// Stops the cycle if `idle` still holds once the cycle lock is taken,
    /// so a job that registers in between keeps it alive.
    fn stop_if(&self, idle: impl FnOnce() -> bool) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !idle() {
            return false;
        }
        state.active = false;
        true
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).active
    }
}

impl Mirror {
    /// One block per job in registration order, separated by blank lines.
    pub async fn build_summary(&self) -> StatusSummary {
        let records = self.records();
        let blocks = join_all(records.iter().map(|record| self.record_status(record))).await;

        if blocks.is_empty() {
            return StatusSummary {
                message: NO_ACTIVE_DOWNLOADS.to_string(),
                count: 0,
            };
        }
        StatusSummary {
            count: blocks.len(),
            message: blocks.join("\n\n"),
        }
    }

    pub async fn current_summary(&self) -> StatusSummary {
        self.build_summary().await
    }

    async fn record_status(&self, record: &DownloadRecord) -> String {
        match self.engine.get_status(record.gid()).await {
            Err(e) => format!("Error: {} - {}", record.gid(), e),
            Ok(status) if record.is_uploading() => format::uploading_line(&status.filename),
            Ok(status) => {
                // The name of a torrent may only show up after a few polls.
                self.enforce_filename(record.gid(), &status.filename);
                status.progress_text
            }
        }
    }

    /// Rebuilds the summary and edits it into every status message. Once
    /// nothing is left the refresh cycle ends and the status messages are
    /// deleted after a grace period.
    pub async fn refresh_status(&self) -> StatusSummary {
        let summary = self.build_summary().await;

        let mut handles = Vec::new();
        self.registry().for_each_status_handle(|handle| handles.push(*handle));
        for handle in &handles {
            if let Err(e) = self.chat.edit_message(handle, &summary.message).await {
                debug!("editMessage error: {}", e);
            }
        }

        if summary.count == 0 && self.refresh.stop_if(|| self.registry().is_empty()) {
            debug!("No more active or queued downloads, status refresh stopped");
            self.retire_status_handles();
        }
        summary
    }

    pub fn is_refresh_running(&self) -> bool {
        self.refresh.is_running()
    }

    pub(crate) fn ensure_refresh_cycle(&self) {
        if let Some(generation) = self.refresh.begin() {
            info!("Starting status refresh every {:?}", self.settings.status_interval());
            tokio::spawn(run_refresh_cycle(self.clone(), generation));
        }
    }

    fn retire_status_handles(&self) {
        let handles = self.registry().take_status_handles();
        if handles.is_empty() {
            return;
        }
        let chat = self.chat.clone();
        let delay = self.settings.status_delete_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for handle in handles {
                if let Err(e) = chat.delete_message(&handle).await {
                    debug!("deleteMessage error: {}", e);
                }
            }
        });
    }

    /// Replaces the chat's status message with a fresh one replying to `reply_to`.
    pub async fn send_status_message(&self, reply_to: MessageRef) -> Result<MessageRef, ChatError> {
        let previous = self.registry().clear_status_handle(reply_to.chat_id);
        if let Some(previous) = previous
            && let Err(e) = self.chat.delete_message(&previous).await
        {
            debug!("deleteMessage error: {}", e);
        }

        let summary = self.build_summary().await;
        let sent = self
            .chat
            .send_reply(reply_to.chat_id, Some(reply_to.message_id), &summary.message)
            .await?;

        {
            let mut registry = self.registry();
            registry.set_status_handle(reply_to.chat_id, sent);
            if let Some(record) = registry.get_by_origin_message_mut(reply_to) {
                record.status_message = Some(sent);
            }
        }
        if summary.count == 0 {
            self.retire_status_handles();
        }
        Ok(sent)
    }
}

async fn run_refresh_cycle(mirror: Mirror, generation: u64) {
    let period = mirror.settings.status_interval();
    let mut interval = interval_at(Instant::now() + period, period);
    loop {
        interval.tick().await;
        if !mirror.refresh.is_current(generation) {
            break;
        }
        mirror.refresh_status().await;
    }
    debug!("Status refresh cycle {} finished", generation);
}
