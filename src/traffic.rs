//! Bounded in-memory traffic log and the dashboard stats snapshot.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;

use crate::budget::{BudgetLedger, Window};
use crate::models::{DashboardStats, TrafficEntry};

/// Ring capacity. Eviction is FIFO; no replay across restarts.
const LOG_CAP: usize = 10_000;

pub struct TrafficLog {
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a frozen entry, evicting the oldest past capacity.
    pub fn append(&self, entry: TrafficEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == LOG_CAP {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot copy of the whole ring in insertion order.
    pub fn snapshot(&self) -> Vec<TrafficEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// The most recent `n` entries in insertion order.
    pub fn last(&self, n: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .skip(entries.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<TrafficEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live stats: 24-hour counters from the log, the last-minute request
    /// rate, and today's spend/tokens from the ledger.
    pub fn stats(&self, ledger: &BudgetLedger) -> DashboardStats {
        let now = Utc::now();
        let entries = self.entries.lock().unwrap();

        let mut stats = DashboardStats::default();
        for entry in entries.iter() {
            let age = now.signed_duration_since(entry.timestamp);
            if age.num_seconds() < 86_400 {
                stats.total_requests += 1;
                if entry.blocked {
                    stats.blocked_requests += 1;
                }
                stats.pii_detections += entry.pii_detected.len();
                stats.injection_attempts += entry.injection_detected.len();
            }
            if age.num_seconds() < 60 {
                stats.requests_per_minute += 1;
            }
        }
        drop(entries);

        stats.total_spend_today = ledger.spend(Window::Daily).unwrap_or(0.0);
        stats.total_tokens_today = ledger.tokens(Window::Daily).unwrap_or(0);
        stats
    }
}

impl Default for TrafficLog {
    fn default() -> Self {
        Self::new()
    }
}
