//! Store client seam.
//!
//! Every call blocks until the store has applied or refused the change.

use thiserror::Error;

use crate::record::{RecordId, Scope, StoreRecord, TaskStatus};

pub mod memory;
pub mod taskwarrior;

pub use memory::MemoryStore;
pub use taskwarrior::{TaskwarriorOptions, TaskwarriorStore};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),
    #[error("task store rejected the change: {0}")]
    Rejected(String),
    #[error("record not found: {0}")]
    NotFound(RecordId),
}

pub trait TaskStore {
    /// Every record currently filed under `scope`; deleted records excluded.
    fn query(&self, scope: &Scope) -> Result<Vec<StoreRecord>, StoreError>;

    fn create(&mut self, scope: &Scope, description: &str) -> Result<StoreRecord, StoreError>;

    /// Replace the description of `id`, and its status when `status` is set.
    fn update(
        &mut self,
        id: &RecordId,
        description: &str,
        status: Option<TaskStatus>,
    ) -> Result<StoreRecord, StoreError>;
}

impl<T: TaskStore + ?Sized> TaskStore for Box<T> {
    fn query(&self, scope: &Scope) -> Result<Vec<StoreRecord>, StoreError> {
        (**self).query(scope)
    }

    fn create(&mut self, scope: &Scope, description: &str) -> Result<StoreRecord, StoreError> {
        (**self).create(scope, description)
    }

    fn update(
        &mut self,
        id: &RecordId,
        description: &str,
        status: Option<TaskStatus>,
    ) -> Result<StoreRecord, StoreError> {
        (**self).update(id, description, status)
    }
}
