//! Bounded log of non-ALLOWED validation results

use super::ValidationResult;
use crate::security::types::CapabilityType;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Append-only from the caller's view; the oldest entries rotate out at capacity
#[derive(Debug)]
pub struct ViolationHistory {
    entries: Mutex<VecDeque<ValidationResult>>,
    capacity: usize,
}

impl Default for ViolationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ViolationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
            capacity,
        }
    }

    pub fn append(&self, result: ValidationResult) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<ValidationResult> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Retained results for the same capability and resource
    pub fn count_matching(&self, capability: CapabilityType, resource: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.capability == capability && r.resource == resource)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
