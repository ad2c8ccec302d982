//! Pure trip status transition rules.
//!
//! Every status change in this crate funnels through
//! [`validate_trip_transition`] so the lifecycle graph lives in exactly one
//! place. Callers name the trigger that prompted the change, which keeps
//! rejected transitions diagnosable from the error alone.

use ridelink_protocol::status::TripStatus;
use thiserror::Error;

/// What prompted a status change. Recorded in the transition history so a
/// trip's path through the graph stays auditable after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TripTrigger {
    /// Local request accepted for submission to the dispatch gateway.
    RequestSubmitted,
    /// Creation call acknowledged by the gateway, or implied by a driver
    /// assignment that arrived ahead of the creation response.
    CreationAcknowledged,
    /// A driver accepted the trip.
    DriverAssigned,
    /// The assigned driver started moving toward the pickup point.
    DriverEnRoute,
    /// The assigned driver reported arrival at the pickup point.
    DriverArrived,
    /// The ride began, whether by passenger command, arrival auto-start, or
    /// a started event from the platform.
    TripStarted,
    /// The ride finished normally.
    TripCompleted,
    /// The trip was cancelled by the passenger, the driver, or the platform.
    Cancelled,
    /// Reconciliation rewound a provisionally applied assignment. Never
    /// valid through [`validate_trip_transition`]; the state machine records
    /// it when it rolls back outside the graph.
    IdentityCorrected,
}

impl TripTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripTrigger::RequestSubmitted => "request_submitted",
            TripTrigger::CreationAcknowledged => "creation_acknowledged",
            TripTrigger::DriverAssigned => "driver_assigned",
            TripTrigger::DriverEnRoute => "driver_en_route",
            TripTrigger::DriverArrived => "driver_arrived",
            TripTrigger::TripStarted => "trip_started",
            TripTrigger::TripCompleted => "trip_completed",
            TripTrigger::Cancelled => "cancelled",
            TripTrigger::IdentityCorrected => "identity_corrected",
        }
    }
}

impl std::fmt::Display for TripTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TripTransitionError {
    #[error("trip status '{state}' is terminal and cannot transition")]
    TerminalState { state: TripStatus },
    #[error("invalid trip transition '{from}' -> '{to}' for trigger '{trigger}'")]
    InvalidTransition {
        from: TripStatus,
        to: TripStatus,
        trigger: TripTrigger,
    },
}

pub type TripTransitionResult<T> = Result<T, TripTransitionError>;

/// Status every trip starts in before the first transition is applied.
pub fn initial_trip_status() -> TripStatus {
    TripStatus::Idle
}

/// Validates one edge of the lifecycle graph without applying it.
pub fn validate_trip_transition(
    from: &TripStatus,
    to: &TripStatus,
    trigger: &TripTrigger,
) -> TripTransitionResult<()> {
    if from.is_terminal() {
        return Err(TripTransitionError::TerminalState { state: *from });
    }

    if transition_allowed(from, to, trigger) {
        Ok(())
    } else {
        Err(TripTransitionError::InvalidTransition {
            from: *from,
            to: *to,
            trigger: *trigger,
        })
    }
}

/// Validates and returns the new status for one transition.
pub fn apply_trip_transition(
    from: &TripStatus,
    to: &TripStatus,
    trigger: &TripTrigger,
) -> TripTransitionResult<TripStatus> {
    validate_trip_transition(from, to, trigger)?;
    Ok(*to)
}

fn transition_allowed(from: &TripStatus, to: &TripStatus, trigger: &TripTrigger) -> bool {
    matches!(
        (from, to, trigger),
        (
            TripStatus::Idle,
            TripStatus::Confirming,
            TripTrigger::RequestSubmitted
        ) | (
            TripStatus::Confirming,
            TripStatus::Searching,
            TripTrigger::CreationAcknowledged
        ) | (
            TripStatus::Confirming,
            TripStatus::Scheduled,
            TripTrigger::CreationAcknowledged
        ) | (
            TripStatus::Searching,
            TripStatus::DriverFound,
            TripTrigger::DriverAssigned
        ) | (
            TripStatus::DriverFound,
            TripStatus::Approaching,
            TripTrigger::DriverEnRoute
        ) | (
            TripStatus::DriverFound | TripStatus::Approaching,
            TripStatus::Arrived,
            TripTrigger::DriverArrived
        ) | (
            TripStatus::Arrived,
            TripStatus::EnRoute,
            TripTrigger::TripStarted
        ) | (
            TripStatus::EnRoute,
            TripStatus::Completed,
            TripTrigger::TripCompleted
        ) | (
            TripStatus::Idle
                | TripStatus::Confirming
                | TripStatus::Scheduled
                | TripStatus::Searching
                | TripStatus::DriverFound
                | TripStatus::Approaching
                | TripStatus::Arrived
                | TripStatus::EnRoute,
            TripStatus::Cancelled,
            TripTrigger::Cancelled
        )
    )
}
