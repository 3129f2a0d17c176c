use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthOutcome {
    Passed,
    Failed,
    Errored(String),
    TimedOut,
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Passed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub outcome: HealthOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthTracker {
    pub history: VecDeque<HealthRecord>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_failures: u64,
    pub last_check: Option<DateTime<Utc>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: HealthOutcome) {
        let now = Utc::now();
        self.total_checks += 1;
        if outcome.is_healthy() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.total_failures += 1;
        }

        self.history.push_back(HealthRecord {
            timestamp: now,
            outcome,
        });
        if self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.last_check = Some(now);
    }

    pub fn last_outcome(&self) -> Option<&HealthOutcome> {
        self.history.back().map(|r| &r.outcome)
    }

    /// Fraction of the last `window` checks that passed; 1.0 with no history.
    pub fn recent_pass_rate(&self, window: usize) -> f64 {
        let recent: Vec<_> = self.history.iter().rev().take(window).collect();
        if recent.is_empty() {
            return 1.0;
        }
        let passed = recent.iter().filter(|r| r.outcome.is_healthy()).count();
        passed as f64 / recent.len() as f64
    }
}
