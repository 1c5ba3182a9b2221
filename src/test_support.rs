use crate::chat::{ChatError, ChatInterface};
use crate::config::Settings;
use crate::engine::{DownloadEngine, EngineError, EngineEvent, EngineStatus, EventKind, MetadataVerdict};
use crate::format::file_name_from_path;
use crate::mirror::{Collaborators, Mirror};
use crate::notify::{ExternalNotifier, JobNotice};
use crate::policy::PatternPolicy;
use crate::record::{ChatId, Gid, MessageId, MessageRef};
use crate::upload::{UploadFailure, UploadJob, UploadReceipt, UploadService};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Lets spawned effects run to completion under a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[derive(Default)]
pub struct EngineState {
    pub queued: VecDeque<Gid>,
    pub added: Vec<(String, PathBuf)>,
    pub stopped: Vec<Gid>,
    pub statuses: HashMap<Gid, EngineStatus>,
    pub files: HashMap<Gid, (PathBuf, u64)>,
    pub errors: HashMap<Gid, String>,
    pub metadata: HashMap<Gid, Gid>,
    pub add_error: Option<EngineError>,
    pub stop_error: Option<EngineError>,
    pub path_error: Option<EngineError>,
    pub size_error: Option<EngineError>,
    pub meta_error: Option<EngineError>,
}

#[derive(Default)]
pub struct MockEngine {
    state: Mutex<EngineState>,
}

impl MockEngine {
    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub fn queue_gid(&self, gid: &str) {
        self.state().queued.push_back(Gid::from(gid));
    }

    pub fn set_status(&self, gid: &str, progress: &str, filename: &str) {
        self.state().statuses.insert(
            Gid::from(gid),
            EngineStatus {
                progress_text: progress.to_string(),
                filename: filename.to_string(),
            },
        );
    }

    pub fn set_file(&self, gid: &str, path: PathBuf, size: u64) {
        self.state().files.insert(Gid::from(gid), (path, size));
    }

    pub fn set_error(&self, gid: &str, reason: &str) {
        self.state().errors.insert(Gid::from(gid), reason.to_string());
    }

    pub fn set_metadata(&self, gid: &str, resolved: &str) {
        self.state().metadata.insert(Gid::from(gid), Gid::from(resolved));
    }

    pub fn added(&self) -> Vec<(String, PathBuf)> {
        self.state().added.clone()
    }

    pub fn stopped(&self) -> Vec<Gid> {
        self.state().stopped.clone()
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn add_uri(&self, url: &str, dir: &Path) -> Result<Gid, EngineError> {
        let gid = {
            let mut state = self.state();
            if let Some(e) = state.add_error.clone() {
                return Err(e);
            }
            let gid = state
                .queued
                .pop_front()
                .ok_or_else(|| EngineError::Request("no gid queued".to_string()))?;
            state.added.push((url.to_string(), dir.to_path_buf()));
            gid
        };
        std::fs::create_dir_all(dir).map_err(|e| EngineError::Request(e.to_string()))?;
        Ok(gid)
    }

    async fn stop_download(&self, gid: &Gid) -> Result<(), EngineError> {
        let mut state = self.state();
        if let Some(e) = state.stop_error.clone() {
            return Err(e);
        }
        state.stopped.push(gid.clone());
        Ok(())
    }

    async fn get_status(&self, gid: &Gid) -> Result<EngineStatus, EngineError> {
        self.state()
            .statuses
            .get(gid)
            .cloned()
            .ok_or_else(|| EngineError::Request(format!("no status for {}", gid)))
    }

    async fn get_file_path(&self, gid: &Gid) -> Result<Option<PathBuf>, EngineError> {
        let state = self.state();
        if let Some(e) = state.path_error.clone() {
            return Err(e);
        }
        Ok(state.files.get(gid).map(|(path, _)| path.clone()))
    }

    async fn get_file_size(&self, gid: &Gid) -> Result<u64, EngineError> {
        let state = self.state();
        if let Some(e) = state.size_error.clone() {
            return Err(e);
        }
        state
            .files
            .get(gid)
            .map(|(_, size)| *size)
            .ok_or(EngineError::Disconnected)
    }

    async fn get_error(&self, gid: &Gid) -> Result<String, EngineError> {
        self.state()
            .errors
            .get(gid)
            .cloned()
            .ok_or(EngineError::Disconnected)
    }

    async fn metadata_job(&self, gid: &Gid) -> Result<MetadataVerdict, EngineError> {
        let state = self.state();
        if let Some(e) = state.meta_error.clone() {
            return Err(e);
        }
        Ok(match state.metadata.get(gid) {
            Some(resolved) => MetadataVerdict {
                is_metadata: true,
                resolved_gid: Some(resolved.clone()),
            },
            None => MetadataVerdict::default(),
        })
    }
}

#[derive(Default)]
pub struct MockUploader {
    jobs: Mutex<Vec<UploadJob>>,
    failure: Mutex<Option<String>>,
}

impl MockUploader {
    pub fn jobs(&self) -> Vec<UploadJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl UploadService for MockUploader {
    async fn upload(&self, job: UploadJob) -> Result<UploadReceipt, UploadFailure> {
        let file_name = file_name_from_path(&job.file_path);
        let count = {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.push(job.clone());
            jobs.len()
        };
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(UploadFailure {
                file_path: job.file_path,
                file_name,
                message,
            });
        }
        Ok(UploadReceipt {
            url: format!("https://x/{}", count),
            file_name,
            file_size: Some(job.file_size),
        })
    }
}

#[derive(Default)]
struct ChatLog {
    next_id: MessageId,
    sent: Vec<(ChatId, Option<MessageId>, String)>,
    edits: Vec<(MessageRef, String)>,
    deleted: Vec<MessageRef>,
}

#[derive(Default)]
pub struct MockChat {
    log: Mutex<ChatLog>,
}

impl MockChat {
    pub fn sent(&self) -> Vec<(ChatId, Option<MessageId>, String)> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn edits_of(&self, message: MessageRef) -> Vec<String> {
        let log = self.log.lock().unwrap();
        log.edits
            .iter()
            .filter(|(target, _)| *target == message)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.log.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ChatInterface for MockChat {
    async fn send_reply(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageRef, ChatError> {
        let mut log = self.log.lock().unwrap();
        log.next_id += 1;
        let id = 1000 + log.next_id;
        log.sent.push((chat_id, reply_to, text.to_string()));
        Ok(MessageRef::new(chat_id, id))
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError> {
        self.log.lock().unwrap().edits.push((*message, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError> {
        self.log.lock().unwrap().deleted.push(*message);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNotifier {
    notices: Mutex<Vec<JobNotice>>,
}

impl MockNotifier {
    pub fn notices(&self) -> Vec<JobNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalNotifier for MockNotifier {
    async fn notify(&self, notice: JobNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// A running mirror wired to in-memory collaborators and a scratch root
/// that lives as long as the harness.
pub struct Harness {
    pub mirror: Mirror,
    pub engine: Arc<MockEngine>,
    pub uploader: Arc<MockUploader>,
    pub chat: Arc<MockChat>,
    pub notifier: Arc<MockNotifier>,
    events: mpsc::UnboundedSender<EngineEvent>,
    _root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings {
            download_root: root.path().to_path_buf(),
            blocked_url_patterns: vec!["blocked.example".to_string()],
            blocked_filename_patterns: vec!["sample".to_string()],
            ..Settings::default()
        };
        let engine = Arc::new(MockEngine::default());
        let uploader = Arc::new(MockUploader::default());
        let chat = Arc::new(MockChat::default());
        let notifier = Arc::new(MockNotifier::default());
        let policy = Arc::new(PatternPolicy::from_settings(&settings));

        let mirror = Mirror::new(
            settings,
            Collaborators {
                engine: engine.clone(),
                uploader: uploader.clone(),
                chat: chat.clone(),
                notifier: notifier.clone(),
                policy,
            },
        );
        let (events, rx) = mpsc::unbounded_channel();
        mirror.start(rx);

        Self {
            mirror,
            engine,
            uploader,
            chat,
            notifier,
            events,
            _root: root,
        }
    }

    pub fn send(&self, kind: EventKind, gid: &str) {
        self.events.send(EngineEvent::new(kind, gid)).unwrap();
    }
}
