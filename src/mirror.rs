use crate::chat::ChatInterface;
use crate::config::Settings;
use crate::engine::{DownloadEngine, EngineEvent};
use crate::error::AdmitError;
use crate::notify::{ExternalNotifier, JobNotice};
use crate::policy::AdmissionPolicy;
use crate::reconciler::EventReconciler;
use crate::record::{ChatId, DownloadRecord, Gid, MessageId, MessageRef};
use crate::registry::DownloadRegistry;
use crate::status::RefreshCycle;
use crate::upload::UploadService;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// External services the mirror drives.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn DownloadEngine>,
    pub uploader: Arc<dyn UploadService>,
    pub chat: Arc<dyn ChatInterface>,
    pub notifier: Arc<dyn ExternalNotifier>,
    pub policy: Arc<dyn AdmissionPolicy>,
}

/// Shared handle to the reconciliation core. Cloning is cheap; every clone
/// sees the same registry.
#[derive(Clone)]
pub struct Mirror {
    pub settings: Arc<Settings>,
    pub tx: broadcast::Sender<String>,
    pub(crate) registry: Arc<Mutex<DownloadRegistry>>,
    pub(crate) refresh: Arc<RefreshCycle>,
    pub(crate) engine: Arc<dyn DownloadEngine>,
    pub(crate) uploader: Arc<dyn UploadService>,
    pub(crate) chat: Arc<dyn ChatInterface>,
    pub(crate) notifier: Arc<dyn ExternalNotifier>,
    pub(crate) policy: Arc<dyn AdmissionPolicy>,
}

impl Mirror {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            settings: Arc::new(settings),
            tx,
            registry: Arc::new(Mutex::new(DownloadRegistry::new())),
            refresh: Arc::new(RefreshCycle::default()),
            engine: collaborators.engine,
            uploader: collaborators.uploader,
            chat: collaborators.chat,
            notifier: collaborators.notifier,
            policy: collaborators.policy,
        }
    }

    /// Spawns the reconciler that consumes the engine's lifecycle notifications.
    pub fn start(&self, events: mpsc::UnboundedReceiver<EngineEvent>) -> JoinHandle<()> {
        let reconciler = EventReconciler::new(self.clone(), events);
        tokio::spawn(reconciler.run())
    }

    /// Never hold the returned guard across an `.await`.
    pub(crate) fn registry(&self) -> MutexGuard<'_, DownloadRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<DownloadRecord> {
        self.registry().records()
    }

    pub fn record(&self, gid: &Gid) -> Option<DownloadRecord> {
        self.registry().get_by_gid(gid).cloned()
    }

    pub fn scratch_path(&self, download_dir: &str) -> PathBuf {
        self.settings.download_root.join(download_dir)
    }

    /// Checks the URL against the policy and hands it to the engine. On
    /// success the job is registered and a status message for the chat is
    /// scheduled.
    pub async fn admit_job(
        &self,
        url: &str,
        chat_id: ChatId,
        origin_message_id: MessageId,
        is_tar: bool,
    ) -> Result<Gid, AdmitError> {
        if !self.policy.is_url_allowed(url) {
            warn!("Rejected blacklisted URL from chat {}: {}", chat_id, url);
            return Err(AdmitError::BlockedUrl);
        }

        let download_dir = Uuid::new_v4().to_string();
        let dir = self.scratch_path(&download_dir);
        let gid = match self.engine.add_uri(url, &dir).await {
            Ok(gid) => gid,
            Err(e) => {
                error!("Failed to start the download. {}", e);
                remove_scratch_dir(&dir).await;
                return Err(AdmitError::Engine(e));
            }
        };

        let added = self
            .registry()
            .add(gid.clone(), download_dir, chat_id, origin_message_id, is_tar)
            .map(|_| ());
        if let Err(e) = added {
            error!("Failed to register {}: {}", gid, e);
            if let Err(e) = self.engine.stop_download(&gid).await {
                warn!("Failed to stop {}: {}", gid, e);
            }
            remove_scratch_dir(&dir).await;
            return Err(e.into());
        }
        info!("download:{} gid:{}", url, gid);
        self.broadcast(serde_json::json!({
            "type": "download",
            "status": "added",
            "gid": gid,
            "chat_id": chat_id,
        }));

        self.schedule_status_message(MessageRef::new(chat_id, origin_message_id));
        Ok(gid)
    }

    /// Returns the chat's previous status handle, if one was replaced.
    pub fn register_status_handle(&self, chat_id: ChatId, handle: MessageRef) -> Option<MessageRef> {
        self.registry().set_status_handle(chat_id, handle)
    }

    /// Gives the engine a moment to queue the job, then posts one status
    /// message per chat no matter how many jobs arrive in the meantime.
    fn schedule_status_message(&self, reply_to: MessageRef) {
        if !self.registry().try_lock_status(reply_to.chat_id) {
            return;
        }
        let mirror = self.clone();
        let delay = self.settings.status_message_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mirror.registry().release_status_lock(reply_to.chat_id);
            if let Err(e) = mirror.send_status_message(reply_to).await {
                error!("Failed to send status message to {}: {}", reply_to.chat_id, e);
            }
        });
    }

    pub(crate) fn broadcast(&self, event: serde_json::Value) {
        let _ = self.tx.send(event.to_string());
    }

    pub(crate) async fn reply(&self, to: MessageRef, text: &str) {
        if let Err(e) = self.chat.send_reply(to.chat_id, Some(to.message_id), text).await {
            error!("sendMessage error: {}", e);
        }
    }

    /// The one exit path for every job, whatever ended it. Removes the
    /// record, tells the requesting chat and external listeners, refreshes
    /// status messages and deletes the scratch directory.
    pub(crate) async fn cleanup(&self, gid: &Gid, message: String, url: Option<String>) {
        let Some(record) = self.registry().remove(gid) else {
            warn!("cleanupDownload: no download registered for {}", gid);
            return;
        };

        self.reply(record.origin(), &message).await;
        self.notifier
            .notify(JobNotice {
                successful: url.is_some(),
                gid: gid.clone(),
                chat_id: record.chat_id,
                url: url.clone(),
            })
            .await;
        self.broadcast(serde_json::json!({
            "type": "download",
            "status": "finished",
            "gid": gid,
            "chat_id": record.chat_id,
            "message": message,
            "url": url,
        }));

        self.refresh_status().await;
        remove_scratch_dir(&self.scratch_path(&record.download_dir)).await;
    }
}

async fn remove_scratch_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!("Deleted {:?}", dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {:?}: {}", dir, e),
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{EngineError, EventKind};
    use crate::error::{AdmitError, RegistryError};
    use crate::record::{Gid, MessageRef};
    use crate::test_support::{Harness, settle};

    #[tokio::test(start_paused = true)]
    async fn test_admit_registers_job_and_schedules_status() {
        let h = Harness::new();
        h.engine.queue_gid("g1");
        h.engine.queue_gid("g2");
        h.engine.set_status("g1", "Downloading movie", "movie.mkv");
        h.engine.set_status("g2", "Downloading other", "other.iso");

        let gid = h.mirror.admit_job("https://files.example/u1", 7, 42, true).await.unwrap();
        assert_eq!(gid, Gid::from("g1"));

        let record = h.mirror.record(&gid).unwrap();
        assert!(record.is_tar);
        assert_eq!(record.origin(), MessageRef::new(7, 42));
        let added = h.engine.added();
        assert_eq!(added[0].0, "https://files.example/u1");
        assert_eq!(added[0].1, h.mirror.scratch_path(&record.download_dir));

        h.mirror.admit_job("https://files.example/u2", 7, 43, false).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let sent = h.chat.sent();
        assert_eq!(sent.len(), 1, "one status message per chat burst");
        assert_eq!(sent[0].1, Some(42));
        assert_eq!(sent[0].2, "Downloading movie\n\nDownloading other");
        let handle = h.mirror.registry().get_status_handle(7).unwrap();
        assert_eq!(h.mirror.record(&gid).unwrap().status_message, Some(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_rejects_blocked_url() {
        let h = Harness::new();
        let err = h
            .mirror
            .admit_job("https://blocked.example/x", 1, 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmitError::BlockedUrl));
        assert_eq!(err.to_string(), "Download failed. Blacklisted URL.");
        assert!(h.engine.added().is_empty());
        assert!(h.mirror.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_surfaces_engine_refusal() {
        let h = Harness::new();
        h.engine.state().add_error = Some(EngineError::Request("Invalid URI".into()));
        let err = h
            .mirror
            .admit_job("notaurl", 1, 1, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to start the download. Invalid URI");
        assert!(h.mirror.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_with_reused_gid_is_rolled_back() {
        let h = Harness::new();
        h.engine.queue_gid("g1");
        h.engine.queue_gid("g1");
        h.mirror.admit_job("https://files.example/a", 1, 1, false).await.unwrap();

        let err = h
            .mirror
            .admit_job("https://files.example/b", 1, 2, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmitError::Registry(RegistryError::DuplicateGid(ref gid)) if *gid == Gid::from("g1")
        ));
        assert_eq!(h.engine.stopped(), vec![Gid::from("g1")]);

        let added = h.engine.added();
        assert!(added[0].1.exists());
        assert!(!added[1].1.exists());
        assert_eq!(h.mirror.record(&Gid::from("g1")).unwrap().origin_message_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_once_per_job() {
        let h = Harness::new();
        h.engine.queue_gid("g1");
        h.engine.set_status("g1", "x", "");
        let gid = h.mirror.admit_job("https://files.example/a", 3, 9, false).await.unwrap();
        let dir = h.mirror.scratch_path(&h.mirror.record(&gid).unwrap().download_dir);
        assert!(dir.exists());

        h.mirror.cleanup(&gid, "done".to_string(), None).await;
        h.mirror.cleanup(&gid, "done again".to_string(), None).await;
        settle().await;

        assert!(!dir.exists());
        assert_eq!(h.notifier.notices().len(), 1);
        assert!(!h.notifier.notices()[0].successful);
        let replies: Vec<_> = h.chat.sent().into_iter().filter(|m| m.2.starts_with("done")).collect();
        assert_eq!(replies, vec![(3, Some(9), "done".to_string())]);

        // Late duplicate notifications find nothing to act on.
        h.send(EventKind::Stopped, "g1");
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(h.notifier.notices().len(), 1);
    }
}
