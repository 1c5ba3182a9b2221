//! Download lifecycle core of a chat mirror bot.
//!
//! A [`Mirror`] admits jobs requested from chat, follows them through the
//! download engine's lifecycle notifications, hands finished files to the
//! upload service and reports back to the chat. Transports for the engine,
//! the chat and the uploader are supplied by the embedding binary through
//! the traits in [`engine`], [`chat`] and [`upload`].

mod cancel;
pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod mirror;
pub mod notify;
pub mod policy;
pub mod reconciler;
pub mod record;
pub mod registry;
pub mod server;
pub mod status;
pub mod telemetry;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use config::Settings;
pub use engine::{DownloadEngine, EngineError, EngineEvent, EventKind};
pub use error::{AdmitError, RegistryError};
pub use mirror::{Collaborators, Mirror};
pub use record::{ChatId, DownloadRecord, Gid, MessageId, MessageRef};
pub use status::StatusSummary;
