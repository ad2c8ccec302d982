//! Merges push-channel events into the active trip.
//!
//! Events arrive on their own clock: before the creation response, twice,
//! or for a trip that no longer exists. Reconciliation decides, per event,
//! whether it belongs to the active trip and which transitions it implies,
//! and reports the outcome so the coordinator can publish updates and keep
//! timers in step. Dropping an event is a normal outcome here, not a fault.

use ridelink_eventbus::update::TripUpdate;
use ridelink_protocol::event::{DriverProfile, LifecycleEvent, TripEvent};
use ridelink_protocol::ids::ReservationId;
use ridelink_protocol::status::TripStatus;

use crate::state::TripStateMachine;
use crate::transitions::{TripTransitionError, TripTrigger};

/// Why an event did or did not change the trip.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReconcileDisposition {
    /// The event changed trip state; the report carries the updates.
    Applied,
    /// Same kind delivered again with nothing new in it.
    DuplicateKind,
    /// The event names a reservation that is not the active trip.
    ForeignReservation,
    /// The event's transition is not reachable from the current status.
    OutOfOrder,
    /// A position fix arrived with no driver attached to carry it.
    NoDriverAssignment,
    /// The trip already reached a terminal status.
    PostTerminal,
    /// The state machine refused a transition the dispatch logic chose.
    Rejected(TripTransitionError),
}

#[derive(Debug)]
pub(crate) struct ReconcileReport {
    pub disposition: ReconcileDisposition,
    pub status_before: TripStatus,
    pub status_after: TripStatus,
    pub updates: Vec<TripUpdate>,
}

impl ReconcileReport {
    fn skipped(status: TripStatus, disposition: ReconcileDisposition) -> Self {
        Self {
            disposition,
            status_before: status,
            status_after: status,
            updates: Vec::new(),
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self.disposition, ReconcileDisposition::Applied)
    }
}

/// Reconciles one lifecycle event against the trip.
///
/// `expected_identity` is the reservation remembered from events accepted
/// while the creation call was still in flight; the creation response is
/// checked against it when it lands.
pub(crate) fn reconcile_event(
    machine: &mut TripStateMachine,
    expected_identity: &mut Option<ReservationId>,
    event: &LifecycleEvent,
) -> ReconcileReport {
    let before = machine.status();
    if before.is_terminal() {
        return ReconcileReport::skipped(before, ReconcileDisposition::PostTerminal);
    }

    if machine.identity().is_assigned() {
        if !machine.identity().matches(&event.reservation_id) {
            return ReconcileReport::skipped(before, ReconcileDisposition::ForeignReservation);
        }
        return apply_event(machine, &event.event, before);
    }

    // Creation still in flight. The event cannot be proven foreign yet, so
    // accept it provisionally; the first accepted event fixes the expected
    // identity and later events must agree with it.
    if let Some(expected) = expected_identity.as_ref() {
        if expected != &event.reservation_id {
            return ReconcileReport::skipped(before, ReconcileDisposition::ForeignReservation);
        }
    }
    let report = apply_event(machine, &event.event, before);
    if report.applied() && expected_identity.is_none() {
        *expected_identity = Some(event.reservation_id.clone());
    }
    report
}

fn apply_event(
    machine: &mut TripStateMachine,
    event: &TripEvent,
    before: TripStatus,
) -> ReconcileReport {
    match try_apply_event(machine, event, before) {
        Ok(report) => report,
        Err(error) => ReconcileReport {
            status_before: before,
            status_after: machine.status(),
            disposition: ReconcileDisposition::Rejected(error),
            updates: Vec::new(),
        },
    }
}

fn try_apply_event(
    machine: &mut TripStateMachine,
    event: &TripEvent,
    before: TripStatus,
) -> Result<ReconcileReport, TripTransitionError> {
    let mut updates = Vec::new();

    let disposition = match event {
        TripEvent::DriverAssigned(driver) => match before {
            // An assignment implies the creation call succeeded even if its
            // response has not landed yet, so walk both edges.
            TripStatus::Confirming => {
                transition(
                    machine,
                    TripStatus::Searching,
                    TripTrigger::CreationAcknowledged,
                    &mut updates,
                )?;
                transition(
                    machine,
                    TripStatus::DriverFound,
                    TripTrigger::DriverAssigned,
                    &mut updates,
                )?;
                attach_driver(machine, driver, &mut updates);
                ReconcileDisposition::Applied
            }
            TripStatus::Searching => {
                transition(
                    machine,
                    TripStatus::DriverFound,
                    TripTrigger::DriverAssigned,
                    &mut updates,
                )?;
                attach_driver(machine, driver, &mut updates);
                ReconcileDisposition::Applied
            }
            TripStatus::DriverFound
            | TripStatus::Approaching
            | TripStatus::Arrived
            | TripStatus::EnRoute => {
                if machine.driver_matches(driver) {
                    ReconcileDisposition::DuplicateKind
                } else {
                    // Same kind, different payload: refresh the assignment
                    // in place without walking the graph again.
                    attach_driver(machine, driver, &mut updates);
                    ReconcileDisposition::Applied
                }
            }
            TripStatus::Idle | TripStatus::Scheduled => ReconcileDisposition::OutOfOrder,
            TripStatus::Completed | TripStatus::Cancelled => ReconcileDisposition::PostTerminal,
        },
        TripEvent::DriverEnRoute => match before {
            TripStatus::DriverFound => {
                transition(
                    machine,
                    TripStatus::Approaching,
                    TripTrigger::DriverEnRoute,
                    &mut updates,
                )?;
                ReconcileDisposition::Applied
            }
            TripStatus::Approaching | TripStatus::Arrived | TripStatus::EnRoute => {
                ReconcileDisposition::DuplicateKind
            }
            _ => ReconcileDisposition::OutOfOrder,
        },
        TripEvent::DriverArrived => match before {
            TripStatus::DriverFound | TripStatus::Approaching => {
                transition(
                    machine,
                    TripStatus::Arrived,
                    TripTrigger::DriverArrived,
                    &mut updates,
                )?;
                ReconcileDisposition::Applied
            }
            TripStatus::Arrived | TripStatus::EnRoute => ReconcileDisposition::DuplicateKind,
            _ => ReconcileDisposition::OutOfOrder,
        },
        TripEvent::TripStarted => match before {
            TripStatus::Arrived => {
                transition(
                    machine,
                    TripStatus::EnRoute,
                    TripTrigger::TripStarted,
                    &mut updates,
                )?;
                ReconcileDisposition::Applied
            }
            TripStatus::EnRoute => ReconcileDisposition::DuplicateKind,
            _ => ReconcileDisposition::OutOfOrder,
        },
        TripEvent::TripStartedBroadcast(broadcast) => match before {
            TripStatus::Arrived => {
                transition(
                    machine,
                    TripStatus::EnRoute,
                    TripTrigger::TripStarted,
                    &mut updates,
                )?;
                if let Some(message) = broadcast.message.clone() {
                    updates.push(TripUpdate::Notice { message });
                }
                ReconcileDisposition::Applied
            }
            // The direct and broadcast forms of "started" count as one kind,
            // so whichever lands second is a duplicate.
            TripStatus::EnRoute => ReconcileDisposition::DuplicateKind,
            _ => ReconcileDisposition::OutOfOrder,
        },
        TripEvent::DriverPosition(position) => {
            if machine.record_position(*position) {
                updates.push(TripUpdate::DriverPositionChanged {
                    position: *position,
                });
                ReconcileDisposition::Applied
            } else {
                ReconcileDisposition::NoDriverAssignment
            }
        }
        TripEvent::TripCancelled(cancelled) => {
            transition(
                machine,
                TripStatus::Cancelled,
                TripTrigger::Cancelled,
                &mut updates,
            )?;
            updates.push(TripUpdate::TripCancelled {
                source: cancelled.source,
                message: cancelled.message.clone(),
            });
            ReconcileDisposition::Applied
        }
    };

    Ok(ReconcileReport {
        disposition,
        status_before: before,
        status_after: machine.status(),
        updates,
    })
}

fn transition(
    machine: &mut TripStateMachine,
    to: TripStatus,
    trigger: TripTrigger,
    updates: &mut Vec<TripUpdate>,
) -> Result<(), TripTransitionError> {
    let previous = machine.status();
    let status = machine.apply(to, trigger)?;
    updates.push(TripUpdate::StatusChanged { previous, status });
    Ok(())
}

fn attach_driver(
    machine: &mut TripStateMachine,
    driver: &DriverProfile,
    updates: &mut Vec<TripUpdate>,
) {
    machine.set_driver(driver.clone());
    updates.push(TripUpdate::DriverUpdated {
        driver: driver.clone(),
    });
}
