use std::collections::HashMap;

use super::invoice::AssignmentRecord;

/// Failure reported by the backing key/value store.
#[derive(Debug, thiserror::Error)]
pub enum AssignmentStoreError {
    #[error("backing store rejected the write: {0}")]
    WriteFailed(String),
}

/// Durable store of tax-code assignments, keyed by invoice item id.
///
/// Records are write-once: the engine consults `find` before ever calling
/// `save`, and a saved record is never overwritten afterwards.
pub trait AssignmentStore {
    fn find(&self, item_id: &str) -> Option<&AssignmentRecord>;

    fn save(&mut self, record: AssignmentRecord) -> Result<(), AssignmentStoreError>;
}

impl AssignmentRecord {
    /// Build the persisted wire form: code names joined by ", ".
    pub fn new(item_id: &str, code_names: &[&str]) -> AssignmentRecord {
        AssignmentRecord {
            item_id: item_id.to_string(),
            tax_codes: code_names.join(", "),
        }
    }
}

/// Store over a snapshot of previously persisted records, tracking the
/// records created during the current run so the host can persist them.
#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    records: HashMap<String, AssignmentRecord>,
    created: Vec<AssignmentRecord>,
}

impl InMemoryAssignmentStore {
    pub fn new(existing: Vec<AssignmentRecord>) -> InMemoryAssignmentStore {
        let mut records = HashMap::new();
        for record in existing {
            if let Some(kept) = records.get(&record.item_id) {
                if *kept != record {
                    log::warn!(
                        "duplicate assignment for item {}, keeping the first one",
                        record.item_id
                    );
                }
                continue;
            }
            records.insert(record.item_id.clone(), record);
        }
        InMemoryAssignmentStore {
            records,
            created: Vec::new(),
        }
    }

    /// Records saved during this run, in creation order.
    pub fn created(&self) -> &[AssignmentRecord] {
        &self.created
    }
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn find(&self, item_id: &str) -> Option<&AssignmentRecord> {
        self.records.get(item_id)
    }

    fn save(&mut self, record: AssignmentRecord) -> Result<(), AssignmentStoreError> {
        self.created.push(record.clone());
        self.records.insert(record.item_id.clone(), record);
        Ok(())
    }
}
