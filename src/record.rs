use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChatId = i64;
pub type MessageId = i32;

/// Job identifier assigned by the download engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(String);

impl Gid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gid {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Gid {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A chat message the bot can reply to, edit or delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// Filename admission latch. Leaves `Unknown` at most once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceState {
    #[default]
    Unknown,
    Allowed,
    Blocked,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Accepted by the engine, not yet confirmed started.
    #[default]
    Queued,
    Downloading,
    /// Handed off to the upload service. Past this point the job can't be cancelled.
    Uploading,
}

#[derive(Clone, Debug, Serialize)]
pub struct DownloadRecord {
    gid: Gid,
    pub download_dir: String,
    pub chat_id: ChatId,
    pub origin_message_id: MessageId,
    /// Status message posted in reply to this job's command. Status edits go
    /// through the per-chat handles; this is reported for observers only.
    pub status_message: Option<MessageRef>,
    pub is_tar: bool,
    phase: Phase,
    allowance: AllowanceState,
}

impl DownloadRecord {
    pub fn new(
        gid: Gid,
        download_dir: String,
        chat_id: ChatId,
        origin_message_id: MessageId,
        is_tar: bool,
    ) -> Self {
        Self {
            gid,
            download_dir,
            chat_id,
            origin_message_id,
            status_message: None,
            is_tar,
            phase: Phase::Queued,
            allowance: AllowanceState::Unknown,
        }
    }

    pub fn gid(&self) -> &Gid {
        &self.gid
    }

    pub fn origin(&self) -> MessageRef {
        MessageRef::new(self.chat_id, self.origin_message_id)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn allowance(&self) -> AllowanceState {
        self.allowance
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self.phase, Phase::Downloading | Phase::Uploading)
    }

    pub fn is_uploading(&self) -> bool {
        self.phase == Phase::Uploading
    }

    pub(crate) fn set_gid(&mut self, gid: Gid) {
        self.gid = gid;
    }

    pub(crate) fn mark_downloading(&mut self) {
        if self.phase == Phase::Queued {
            self.phase = Phase::Downloading;
        }
    }

    pub(crate) fn mark_uploading(&mut self) {
        self.phase = Phase::Uploading;
    }

    /// Returns true only when this call moved the latch out of `Unknown`.
    pub(crate) fn latch(&mut self, state: AllowanceState) -> bool {
        if self.allowance != AllowanceState::Unknown || state == AllowanceState::Unknown {
            return false;
        }
        self.allowance = state;
        true
    }
}
