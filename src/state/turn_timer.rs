//! Turn timer.
//!
//! Measures how long the active combatant has held the turn. The periodic
//! display tick lives outside this crate; it only reads `readout`.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Default)]
pub struct TurnTimer {
    started_at: Option<DateTime<Utc>>,
}

impl TurnTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.start_at(Utc::now());
    }

    pub fn start_at(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    /// Restart the count if running. A stopped timer stays stopped.
    pub fn reset(&mut self) {
        self.reset_at(Utc::now());
    }

    pub fn reset_at(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_some() {
            self.started_at = Some(now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.started_at {
            Some(start) => (now - start).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    /// Elapsed time as `m:ss`.
    pub fn readout(&self, now: DateTime<Utc>) -> String {
        let secs = self.elapsed(now).num_seconds();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}
