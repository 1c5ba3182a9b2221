use crate::config::Settings;
use crate::mirror::Mirror;
use crate::record::{AllowanceState, DownloadRecord, Gid, Phase};
use tracing::info;

/// Prefix the engine gives to jobs that only fetch torrent metadata.
const METADATA_PREFIX: &str = "[METADATA]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilenameVerdict {
    Allowed,
    Blocked,
    /// Not enough is known about the name yet to decide.
    Indeterminate,
}

pub trait AdmissionPolicy: Send + Sync {
    fn is_url_allowed(&self, url: &str) -> bool;

    fn filename_verdict(&self, filename: &str) -> FilenameVerdict;
}

/// Case-insensitive substring blocklists for URLs and file names.
#[derive(Clone, Debug, Default)]
pub struct PatternPolicy {
    blocked_urls: Vec<String>,
    blocked_filenames: Vec<String>,
}

impl PatternPolicy {
    pub fn new(blocked_urls: Vec<String>, blocked_filenames: Vec<String>) -> Self {
        Self {
            blocked_urls: lowercase_all(blocked_urls),
            blocked_filenames: lowercase_all(blocked_filenames),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.blocked_url_patterns.clone(),
            settings.blocked_filename_patterns.clone(),
        )
    }
}

fn lowercase_all(patterns: Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

impl AdmissionPolicy for PatternPolicy {
    fn is_url_allowed(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        !self.blocked_urls.iter().any(|p| url.contains(p.as_str()))
    }

    fn filename_verdict(&self, filename: &str) -> FilenameVerdict {
        if filename.starts_with(METADATA_PREFIX) {
            return FilenameVerdict::Indeterminate;
        }
        let name = filename.to_lowercase();
        if self.blocked_filenames.iter().any(|p| name.contains(p.as_str())) {
            FilenameVerdict::Blocked
        } else {
            FilenameVerdict::Allowed
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    /// `cancel` is set when this rejection is fresh and the job is mid-download.
    Reject { cancel: bool },
}

impl GateDecision {
    pub fn is_admitted(self) -> bool {
        self == GateDecision::Admit
    }
}

/// Applies the filename policy to a record, latching its allowance on the
/// first definitive verdict. Safe to call on every status poll.
pub fn evaluate(
    record: &mut DownloadRecord,
    filename: &str,
    policy: &dyn AdmissionPolicy,
) -> GateDecision {
    match record.allowance() {
        AllowanceState::Allowed => return GateDecision::Admit,
        AllowanceState::Blocked => return GateDecision::Reject { cancel: false },
        AllowanceState::Unknown => {}
    }
    if filename.is_empty() {
        return GateDecision::Admit;
    }

    match policy.filename_verdict(filename) {
        FilenameVerdict::Indeterminate => GateDecision::Admit,
        FilenameVerdict::Allowed => {
            record.latch(AllowanceState::Allowed);
            GateDecision::Admit
        }
        FilenameVerdict::Blocked => {
            record.latch(AllowanceState::Blocked);
            GateDecision::Reject {
                cancel: record.phase() == Phase::Downloading,
            }
        }
    }
}

impl Mirror {
    /// Runs the gate against the live record. Unknown gids pass.
    pub(crate) fn evaluate_filename(&self, gid: &Gid, filename: &str) -> GateDecision {
        let mut registry = self.registry();
        match registry.get_mut(gid) {
            Some(record) => evaluate(record, filename, self.policy.as_ref()),
            None => GateDecision::Admit,
        }
    }

    /// Gate used while a job is in flight: a fresh rejection cancels the download.
    pub(crate) fn enforce_filename(&self, gid: &Gid, filename: &str) -> bool {
        let decision = self.evaluate_filename(gid, filename);
        if decision == (GateDecision::Reject { cancel: true }) {
            info!("{} has a blacklisted file name ({}). Cancelling.", gid, filename);
            tokio::spawn(self.clone().cancel_detached(gid.clone()));
        }
        decision.is_admitted()
    }
}
