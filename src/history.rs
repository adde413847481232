//! Bounded log of prior cycle outcomes
//!
//! Fixed capacity, drop-oldest. The decision stage reads recent entries to
//! bias future picks away from repeats and failures; nothing is ever
//! structurally excluded. Lives for the process lifetime only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Outcome of one execution attempt, created at most once per cycle and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvestmentRecord {
    pub agent_name: String,
    pub agent_address: String,
    /// Amount invested, e.g. "8.95 IQ"
    pub amount: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl InvestmentRecord {
    /// Record for a cycle that never produced a definitive outcome
    pub fn failed_cycle(amount: String, error: impl Into<String>) -> Self {
        Self {
            agent_name: "none".to_string(),
            agent_address: String::new(),
            amount,
            success: false,
            transaction_hash: None,
            error: Some(error.into()),
            reasoning: "Cycle aborted before an investment decision was executed".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// One-line summary fed into future decision prompts
    pub fn summary(&self) -> String {
        if self.success {
            format!("SUCCESS {} ({})", self.agent_name, self.amount)
        } else {
            format!(
                "FAILED {} ({}): {}",
                self.agent_name,
                self.amount,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// FIFO ring buffer of investment records
#[derive(Debug)]
pub struct HistoryLog {
    records: VecDeque<InvestmentRecord>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be at least 1");
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push to the tail, evicting from the head once over capacity
    pub fn append(&mut self, record: InvestmentRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Last `k` entries in insertion order (fewer if the log is shorter)
    pub fn recent(&self, k: usize) -> Vec<&InvestmentRecord> {
        let skip = self.records.len().saturating_sub(k);
        self.records.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvestmentRecord> {
        self.records.iter()
    }
}
