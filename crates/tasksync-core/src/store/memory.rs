use std::cell::RefCell;
use std::collections::BTreeMap;

use super::{StoreError, TaskStore};
use crate::record::{RecordId, Scope, StoreRecord, TaskStatus};

/// Which store operation a [`MemoryStore`] should refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Query,
    Create,
    Update,
}

/// In-process store with sequential numeric ids.
///
/// Counts writes so callers can check how many changes a sync made, and can
/// be told to fail a given operation.
#[derive(Debug)]
pub struct MemoryStore {
    records: BTreeMap<RecordId, StoreRecord>,
    next_id: u64,
    creates: usize,
    updates: usize,
    failure: RefCell<Option<(FailOn, StoreError)>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Empty store whose first created record gets `first_id`.
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: first_id,
            creates: 0,
            updates: 0,
            failure: RefCell::new(None),
        }
    }

    /// Seed a record without counting it as a write.
    pub fn insert(&mut self, record: StoreRecord) {
        if let Ok(numeric) = record.id.as_str().parse::<u64>() {
            self.next_id = self.next_id.max(numeric + 1);
        }
        self.records.insert(record.id.clone(), record);
    }

    /// Drop a record, as if it had been deleted outside the document.
    pub fn remove(&mut self, id: &RecordId) -> Option<StoreRecord> {
        self.records.remove(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&StoreRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &StoreRecord> {
        self.records.values()
    }

    pub fn creates(&self) -> usize {
        self.creates
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn writes(&self) -> usize {
        self.creates + self.updates
    }

    pub fn reset_counters(&mut self) {
        self.creates = 0;
        self.updates = 0;
    }

    /// Make the next call of `op` return `error`.
    pub fn fail_next(&mut self, op: FailOn, error: StoreError) {
        self.failure.replace(Some((op, error)));
    }

    fn take_failure(&self, op: FailOn) -> Result<(), StoreError> {
        let mut failure = self.failure.borrow_mut();
        match failure.take() {
            Some((target, error)) if target == op => Err(error),
            other => {
                *failure = other;
                Ok(())
            }
        }
    }
}

impl TaskStore for MemoryStore {
    fn query(&self, scope: &Scope) -> Result<Vec<StoreRecord>, StoreError> {
        self.take_failure(FailOn::Query)?;
        Ok(self
            .records
            .values()
            .filter(|record| &record.scope == scope && record.status != TaskStatus::Deleted)
            .cloned()
            .collect())
    }

    fn create(&mut self, scope: &Scope, description: &str) -> Result<StoreRecord, StoreError> {
        self.take_failure(FailOn::Create)?;
        if description.trim().is_empty() {
            return Err(StoreError::Rejected("empty description".to_string()));
        }
        let id = RecordId::new(self.next_id.to_string());
        self.next_id += 1;
        let record = StoreRecord {
            id: id.clone(),
            description: description.to_string(),
            scope: scope.clone(),
            status: TaskStatus::Pending,
        };
        self.records.insert(id, record.clone());
        self.creates += 1;
        Ok(record)
    }

    fn update(
        &mut self,
        id: &RecordId,
        description: &str,
        status: Option<TaskStatus>,
    ) -> Result<StoreRecord, StoreError> {
        self.take_failure(FailOn::Update)?;
        if description.trim().is_empty() {
            return Err(StoreError::Rejected("empty description".to_string()));
        }
        let record = self
            .records
            .get_mut(id)
            .filter(|record| record.status != TaskStatus::Deleted)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.description = description.to_string();
        if let Some(status) = status {
            record.status = status;
        }
        self.updates += 1;
        Ok(record.clone())
    }
}
