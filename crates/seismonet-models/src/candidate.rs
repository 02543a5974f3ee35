//! Candidate event lifecycle types emitted by the trigger detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::segment::ChannelId;

/// Closed-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration_s(&self) -> f64 {
        (self.end - self.start).num_nanoseconds().unwrap_or(0) as f64 / 1e9
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Candidate lifecycle state.
///
/// Created `Provisional` on trigger-on. Moves to `Confirmed` when the
/// de-trigger criterion fires with duration >= the minimum, or to `Rejected`
/// on an early de-trigger, a stream gap, or a downstream validation failure.
/// Both `Confirmed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Provisional,
    Confirmed,
    Rejected,
}

/// Internal-origin detection produced by the STA/LTA state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEvent {
    /// Detector identity (one detector per channel)
    pub detector_id: String,
    /// Channel the trigger fired on
    pub channel: ChannelId,
    /// Instant of the sample that crossed the trigger-on ratio
    pub trigger_instant: DateTime<Utc>,
    /// STA/LTA ratio observed at trigger-on
    pub trigger_ratio: f64,
    /// De-trigger instant; equals trigger_instant while provisional
    pub detrigger_instant: DateTime<Utc>,
    /// Context window retained before the trigger
    pub pre_roll: TimeWindow,
    /// Context window retained after the de-trigger
    pub post_roll: TimeWindow,
    /// Lifecycle state
    pub state: CandidateState,
}

impl CandidateEvent {
    /// Event duration from trigger-on to de-trigger, in seconds.
    pub fn duration_s(&self) -> f64 {
        (self.detrigger_instant - self.trigger_instant)
            .num_nanoseconds()
            .unwrap_or(0) as f64
            / 1e9
    }

    /// Full analysis window: pre-roll start through post-roll end.
    pub fn analysis_window(&self) -> TimeWindow {
        TimeWindow::new(self.pre_roll.start, self.post_roll.end)
    }
}
