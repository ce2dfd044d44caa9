//! Parse, reconcile and rewrite one document in a single call.
//!
//! The host supplies the document through [`DocumentSource`] and receives the
//! new text through [`DocumentSink`]. The sink is only invoked after every
//! store write succeeded, so a failed sync never leaves a half-rewritten
//! document behind.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::parser::parse;
use crate::reconcile::{self, SyncError, SyncPlan, SyncReport, SyncResult};
use crate::record::Scope;
use crate::rewrite::rewrite;
use crate::store::TaskStore;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot read {identity}: {message}")]
    Read { identity: String, message: String },
    #[error("cannot write {identity}: {message}")]
    Write { identity: String, message: String },
    #[error("{0} changed while syncing; not overwriting")]
    Conflict(String),
}

pub trait DocumentSource {
    /// Scope for this document. Read once per sync.
    fn identity(&self) -> Scope;
    fn text(&self) -> Result<String, HostError>;
}

pub trait DocumentSink {
    /// Replace the whole document content.
    fn replace(&mut self, text: &str) -> Result<(), HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub text: String,
    pub changed: bool,
    pub result: SyncResult,
}

impl SyncOutcome {
    pub fn report(&self) -> SyncReport {
        self.result.report()
    }
}

pub fn sync<S: TaskStore + ?Sized>(
    text: &str,
    scope: &Scope,
    store: &mut S,
) -> Result<SyncOutcome, SyncError> {
    let result = reconcile::reconcile(parse(text), scope, store)?;
    let new_text = rewrite(text, &result);
    let changed = new_text != text;
    info!(%scope, report = %result.report(), changed, "synced document");
    Ok(SyncOutcome {
        text: new_text,
        changed,
        result,
    })
}

/// Plan a sync without writing to the store.
pub fn preview<S: TaskStore + ?Sized>(
    text: &str,
    scope: &Scope,
    store: &S,
) -> Result<SyncPlan, SyncError> {
    let existing = reconcile::query_scope(store, scope)?;
    Ok(reconcile::plan(parse(text), scope, existing))
}

/// Sync a host document; the sink only sees the new text when it differs.
pub fn sync_document<D, S>(document: &mut D, store: &mut S) -> Result<SyncOutcome, SyncError>
where
    D: DocumentSource + DocumentSink + ?Sized,
    S: TaskStore + ?Sized,
{
    let scope = document.identity();
    let text = document.text()?;
    let outcome = sync(&text, &scope, store)?;
    if outcome.changed {
        document.replace(&outcome.text)?;
    }
    Ok(outcome)
}

/// Owns a store and runs syncs against it.
#[derive(Debug)]
pub struct Synchronizer<S> {
    store: S,
}

impl<S: TaskStore> Synchronizer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn sync(&mut self, text: &str, scope: &Scope) -> Result<SyncOutcome, SyncError> {
        sync(text, scope, &mut self.store)
    }

    pub fn preview(&self, text: &str, scope: &Scope) -> Result<SyncPlan, SyncError> {
        preview(text, scope, &self.store)
    }

    pub fn sync_document<D>(&mut self, document: &mut D) -> Result<SyncOutcome, SyncError>
    where
        D: DocumentSource + DocumentSink + ?Sized,
    {
        sync_document(document, &mut self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct Buffer {
        scope: Scope,
        text: String,
        replaced: usize,
    }

    impl DocumentSource for Buffer {
        fn identity(&self) -> Scope {
            self.scope.clone()
        }

        fn text(&self) -> Result<String, HostError> {
            Ok(self.text.clone())
        }
    }

    impl DocumentSink for Buffer {
        fn replace(&mut self, text: &str) -> Result<(), HostError> {
            self.text = text.to_string();
            self.replaced += 1;
            Ok(())
        }
    }

    #[test]
    fn sync_document_skips_sink_when_nothing_changes() {
        let mut store = MemoryStore::new();
        let mut doc = Buffer {
            scope: Scope::new("a.md"),
            text: "- [ ] one\n".to_string(),
            replaced: 0,
        };
        sync_document(&mut doc, &mut store).expect("first sync");
        assert_eq!(doc.text, "- [ ] #1 one\n");
        assert_eq!(doc.replaced, 1);

        let outcome = sync_document(&mut doc, &mut store).expect("second sync");
        assert!(!outcome.changed);
        assert_eq!(doc.replaced, 1);
    }

    #[test]
    fn preview_does_not_write() {
        let mut syncer = Synchronizer::new(MemoryStore::new());
        let plan = syncer
            .preview("- [ ] a\n- [ ] b\n", &Scope::new("a.md"))
            .expect("preview");
        assert_eq!(plan.report().created, 2);
        assert_eq!(syncer.store().writes(), 0);

        syncer.sync("- [ ] a\n", &Scope::new("a.md")).expect("sync");
        assert_eq!(syncer.into_inner().creates(), 1);
    }
}
