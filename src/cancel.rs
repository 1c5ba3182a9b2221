use crate::format::{CANCEL_NOT_FOUND, CANCELED_ELSEWHERE, CANNOT_CANCEL_UPLOAD};
use crate::mirror::Mirror;
use crate::record::{ChatId, Gid, MessageRef};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{info, warn};

impl Mirror {
    /// Cancels one job on behalf of the chat message `requester`.
    pub async fn request_cancel(&self, gid: &Gid, requester: Option<MessageRef>) -> bool {
        self.cancel(gid, requester).await
    }

    /// Cancels the job started by the command message `origin`, i.e. the
    /// message the requester replied to.
    pub async fn cancel_by_origin(&self, origin: MessageRef, requester: MessageRef) -> bool {
        let gid = self
            .registry()
            .get_by_origin_message(origin)
            .map(|record| record.gid().clone());
        match gid {
            Some(gid) => self.cancel(&gid, Some(requester)).await,
            None => {
                self.reply(requester, CANCEL_NOT_FOUND).await;
                false
            }
        }
    }

    /// Cancels every job, or only the jobs of `scope` when given. Returns
    /// how many cancellations were accepted.
    pub async fn request_cancel_all(&self, scope: Option<ChatId>) -> usize {
        let mut gids = Vec::new();
        self.registry().for_each_record(|record| {
            if scope.is_none_or(|chat_id| record.chat_id == chat_id) {
                gids.push(record.gid().clone());
            }
        });

        let mut count = 0;
        for gid in &gids {
            if self.cancel(gid, None).await {
                count += 1;
            }
        }
        info!("{} downloads cancelled", count);
        count
    }

    /// Stops a job unless its upload already began.
    ///
    /// The engine only emits a stop notification for jobs it had started,
    /// so queued jobs get their stop effect applied here.
    pub(crate) async fn cancel(&self, gid: &Gid, requester: Option<MessageRef>) -> bool {
        let owner = self
            .registry()
            .get_by_gid(gid)
            .map(|record| (record.chat_id, record.is_uploading()));
        let Some((owner_chat, uploading)) = owner else {
            return false;
        };

        if uploading {
            info!("Refusing to cancel {}: upload in progress", gid);
            if let Some(requester) = requester {
                self.reply(requester, CANNOT_CANCEL_UPLOAD).await;
            }
            return false;
        }

        if let Err(e) = self.engine.stop_download(gid).await {
            warn!("Failed to stop {}: {}", gid, e);
            return false;
        }

        // The owning chat hears about it through the stop notification.
        if let Some(requester) = requester
            && requester.chat_id != owner_chat
        {
            self.reply(requester, CANCELED_ELSEWHERE).await;
        }

        let queued = self
            .registry()
            .get_by_gid(gid)
            .is_some_and(|record| !record.is_downloading());
        if queued {
            self.on_stopped(gid).await;
        }
        true
    }

    /// Boxed so it can be spawned from the filename gate, which is itself
    /// reached from inside cleanup.
    pub(crate) fn cancel_detached(self, gid: Gid) -> BoxFuture<'static, ()> {
        async move {
            self.cancel(&gid, None).await;
        }
        .boxed()
    }
}
