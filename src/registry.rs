use crate::error::RegistryError;
use crate::record::{ChatId, DownloadRecord, Gid, MessageId, MessageRef};
use std::collections::{BTreeMap, HashMap, HashSet};

/// In-memory store of every in-flight job plus the per-chat status messages.
///
/// Records are indexed by gid and by the command message that created them.
/// Both indices are updated together inside each method, so callers only
/// ever observe them in sync.
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    records: HashMap<Gid, DownloadRecord>,
    order: Vec<Gid>,
    by_origin: HashMap<MessageRef, Gid>,
    status_handles: BTreeMap<ChatId, MessageRef>,
    status_locks: HashSet<ChatId>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        gid: Gid,
        download_dir: String,
        chat_id: ChatId,
        origin_message_id: MessageId,
        is_tar: bool,
    ) -> Result<&DownloadRecord, RegistryError> {
        if self.records.contains_key(&gid) {
            return Err(RegistryError::DuplicateGid(gid));
        }
        let record = DownloadRecord::new(gid.clone(), download_dir, chat_id, origin_message_id, is_tar);
        self.by_origin.insert(record.origin(), gid.clone());
        self.order.push(gid.clone());
        Ok(&*self.records.entry(gid).or_insert(record))
    }

    pub fn get_by_gid(&self, gid: &Gid) -> Option<&DownloadRecord> {
        self.records.get(gid)
    }

    pub fn get_mut(&mut self, gid: &Gid) -> Option<&mut DownloadRecord> {
        self.records.get_mut(gid)
    }

    pub fn get_by_origin_message(&self, origin: MessageRef) -> Option<&DownloadRecord> {
        self.by_origin.get(&origin).and_then(|gid| self.records.get(gid))
    }

    pub fn get_by_origin_message_mut(&mut self, origin: MessageRef) -> Option<&mut DownloadRecord> {
        let gid = self.by_origin.get(&origin)?;
        self.records.get_mut(gid)
    }

    /// Moves a record to a new gid, keeping its position in iteration order.
    pub fn rekey(&mut self, old: &Gid, new: Gid) -> Result<(), RegistryError> {
        if self.records.contains_key(&new) {
            return Err(RegistryError::DuplicateGid(new));
        }
        let mut record = self
            .records
            .remove(old)
            .ok_or_else(|| RegistryError::UnknownGid(old.clone()))?;

        record.set_gid(new.clone());
        self.by_origin.insert(record.origin(), new.clone());
        if let Some(slot) = self.order.iter_mut().find(|gid| *gid == old) {
            *slot = new.clone();
        }
        self.records.insert(new, record);
        Ok(())
    }

    /// Removing an unknown gid is a no-op: duplicate terminal notifications happen.
    pub fn remove(&mut self, gid: &Gid) -> Option<DownloadRecord> {
        let record = self.records.remove(gid)?;
        self.by_origin.remove(&record.origin());
        self.order.retain(|g| g != gid);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Visits records in insertion order.
    pub fn for_each_record(&self, mut f: impl FnMut(&DownloadRecord)) {
        for gid in &self.order {
            if let Some(record) = self.records.get(gid) {
                f(record);
            }
        }
    }

    pub fn records(&self) -> Vec<DownloadRecord> {
        let mut out = Vec::with_capacity(self.records.len());
        self.for_each_record(|record| out.push(record.clone()));
        out
    }

    pub fn for_each_status_handle(&self, mut f: impl FnMut(&MessageRef)) {
        for handle in self.status_handles.values() {
            f(handle);
        }
    }

    /// Returns the handle this one replaced, if any.
    pub fn set_status_handle(&mut self, chat_id: ChatId, handle: MessageRef) -> Option<MessageRef> {
        self.status_handles.insert(chat_id, handle)
    }

    pub fn get_status_handle(&self, chat_id: ChatId) -> Option<MessageRef> {
        self.status_handles.get(&chat_id).copied()
    }

    pub fn clear_status_handle(&mut self, chat_id: ChatId) -> Option<MessageRef> {
        self.status_handles.remove(&chat_id)
    }

    pub fn take_status_handles(&mut self) -> Vec<MessageRef> {
        std::mem::take(&mut self.status_handles).into_values().collect()
    }

    /// Claims the chat's pending-status slot. False if a status message is already scheduled.
    pub fn try_lock_status(&mut self, chat_id: ChatId) -> bool {
        self.status_locks.insert(chat_id)
    }

    pub fn release_status_lock(&mut self, chat_id: ChatId) {
        self.status_locks.remove(&chat_id);
    }
}
