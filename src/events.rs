// src/events.rs
//! Plan-level events consumed by the downstream controller. Planner faults
//! are never raised as errors; they ride on every published plan instead.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Vision stream stale for more than the freshness window.
    ModelCommIssue,
    /// Radar stream stale, or the radar itself reports a comm issue.
    RadarCommIssue,
    /// Radar reports an internal fault.
    RadarFault,
    /// Lateral MPC diverged (cost blowup or NaN).
    PlannerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    NoEntry,
    SoftDisable,
    ImmediateDisable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub sub_events: Vec<EventSeverity>,
}

impl Event {
    /// Build an event with the fixed severity set for its kind.
    pub fn new(kind: EventKind) -> Self {
        use EventSeverity::*;
        let sub_events = match kind {
            EventKind::ModelCommIssue => vec![NoEntry, ImmediateDisable],
            EventKind::RadarCommIssue => vec![NoEntry, SoftDisable],
            EventKind::RadarFault => vec![NoEntry, SoftDisable],
            EventKind::PlannerError => vec![NoEntry, ImmediateDisable],
        };
        Self { kind, sub_events }
    }
}
