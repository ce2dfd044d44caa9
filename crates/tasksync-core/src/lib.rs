//! Sync task lines in a markdown document with a file-scoped task store.

pub mod config;
pub mod marker;
pub mod parser;
pub mod reconcile;
pub mod record;
pub mod rewrite;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_env;

pub use parser::{parse, TaskCandidate};
pub use reconcile::{reconcile, SyncError, SyncReport, SyncResult};
pub use record::{RecordId, Scope, StoreRecord, TaskStatus};
pub use rewrite::rewrite;
pub use store::{StoreError, TaskStore};
pub use sync::{sync, sync_document, DocumentSink, DocumentSource, HostError, SyncOutcome};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
