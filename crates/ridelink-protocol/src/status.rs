use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the trip, as observed by every layer above the state
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Idle,
    Confirming,
    Scheduled,
    Searching,
    DriverFound,
    Approaching,
    Arrived,
    EnRoute,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Confirming => "confirming",
            Self::Scheduled => "scheduled",
            Self::Searching => "searching",
            Self::DriverFound => "driver_found",
            Self::Approaching => "approaching",
            Self::Arrived => "arrived",
            Self::EnRoute => "en_route",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two time-bounded behaviors the trip layer arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    SearchTimeout,
    ArrivalAutoStart,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchTimeout => "search_timeout",
            Self::ArrivalAutoStart => "arrival_auto_start",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
