//! Trip state ownership.
//!
//! [`TripStateMachine`] is the only mutator of a trip's status, identity,
//! and driver assignment. Reconciliation and the coordinator decide *what*
//! should change; this module decides whether the change is legal and keeps
//! the transition history that makes the decision auditable.

use ridelink_protocol::event::{DriverPosition, DriverProfile};
use ridelink_protocol::ids::{ClientTripToken, ReservationId, TripIdentity};
use ridelink_protocol::status::TripStatus;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::transitions::{
    apply_trip_transition, initial_trip_status, TripTransitionResult, TripTrigger,
};

/// Driver currently attached to the trip. Created when an assignment event
/// is accepted and destroyed when the trip reaches a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverAssignment {
    pub driver: DriverProfile,
    pub position: Option<DriverPosition>,
    pub assigned_at: OffsetDateTime,
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: TripStatus,
    pub trigger: TripTrigger,
    pub changed_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct TripStateMachine {
    identity: TripIdentity,
    status: TripStatus,
    driver: Option<DriverAssignment>,
    created_at: OffsetDateTime,
    history: Vec<StatusChange>,
}

impl TripStateMachine {
    /// Fresh trip with a locally generated client token and no transitions
    /// applied yet.
    pub fn new() -> Self {
        Self::for_token(ClientTripToken::generate())
    }

    /// Fresh trip under the caller's client token, so the caller can later
    /// verify the trip it issued a request for is still the one in play.
    pub fn for_token(token: ClientTripToken) -> Self {
        Self {
            identity: TripIdentity::Unassigned(token),
            status: initial_trip_status(),
            driver: None,
            created_at: OffsetDateTime::now_utc(),
            history: Vec::new(),
        }
    }

    pub fn status(&self) -> TripStatus {
        self.status
    }

    pub fn identity(&self) -> &TripIdentity {
        &self.identity
    }

    pub fn driver(&self) -> Option<&DriverAssignment> {
        self.driver.as_ref()
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Binds the platform reservation id. Returns false without touching the
    /// identity when one is already assigned; identities never change once
    /// bound.
    pub fn assign_identity(&mut self, reservation_id: ReservationId) -> bool {
        if self.identity.is_assigned() {
            return false;
        }
        self.identity = TripIdentity::Assigned(reservation_id);
        true
    }

    /// Applies one validated transition and records it. Terminal statuses
    /// drop the driver assignment; nothing about a finished trip should keep
    /// pointing at a driver.
    pub fn apply(
        &mut self,
        to: TripStatus,
        trigger: TripTrigger,
    ) -> TripTransitionResult<TripStatus> {
        let status = apply_trip_transition(&self.status, &to, &trigger)?;
        self.record(status, trigger);
        if status.is_terminal() {
            self.driver = None;
        }
        Ok(status)
    }

    /// Rewinds a provisional assignment back to an active search. This is
    /// reconciliation-only: the creation response named a different
    /// reservation than the events applied so far, so the driver they carried
    /// belongs to someone else's trip. Deliberately not a graph edge.
    pub fn rollback_to_searching(&mut self) {
        self.driver = None;
        self.record(TripStatus::Searching, TripTrigger::IdentityCorrected);
    }

    /// Attaches or replaces the driver assignment. A replacement starts with
    /// no known position; the previous driver's track does not describe the
    /// new vehicle.
    pub fn set_driver(&mut self, driver: DriverProfile) {
        self.driver = Some(DriverAssignment {
            driver,
            position: None,
            assigned_at: OffsetDateTime::now_utc(),
        });
    }

    /// True when the stored profile is byte-for-byte the same driver payload.
    pub fn driver_matches(&self, driver: &DriverProfile) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|assignment| &assignment.driver == driver)
    }

    /// Records a position fix for the assigned driver. Returns false when no
    /// driver is attached.
    pub fn record_position(&mut self, position: DriverPosition) -> bool {
        match self.driver.as_mut() {
            Some(assignment) => {
                assignment.position = Some(position);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> TripSnapshot {
        TripSnapshot {
            reservation_id: self.identity.reservation().cloned(),
            status: self.status,
            driver: self.driver.clone(),
            created_at: self.created_at,
            transitions: self.history.clone(),
        }
    }

    fn record(&mut self, status: TripStatus, trigger: TripTrigger) {
        self.status = status;
        self.history.push(StatusChange {
            status,
            trigger,
            changed_at: OffsetDateTime::now_utc(),
        });
    }
}

impl Default for TripStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time read model of a trip, safe to hand out of the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSnapshot {
    pub reservation_id: Option<ReservationId>,
    pub status: TripStatus,
    pub driver: Option<DriverAssignment>,
    pub created_at: OffsetDateTime,
    pub transitions: Vec<StatusChange>,
}

impl TripSnapshot {
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.created_at.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridelink_protocol::event::VehicleDescriptor;
    use ridelink_protocol::ids::DriverId;

    fn sample_driver(name: &str) -> DriverProfile {
        DriverProfile {
            driver_id: DriverId::new("drv-77"),
            name: name.to_string(),
            phone: None,
            rating: Some(4.8),
            eta_minutes: Some(5),
            distance_km: None,
            vehicle: VehicleDescriptor {
                model: "Model 3".to_string(),
                plate: "8XYZ123".to_string(),
                color: Some("white".to_string()),
            },
        }
    }

    fn machine_in_driver_found() -> TripStateMachine {
        let mut machine = TripStateMachine::new();
        machine
            .apply(TripStatus::Confirming, TripTrigger::RequestSubmitted)
            .expect("idle -> confirming");
        machine
            .apply(TripStatus::Searching, TripTrigger::CreationAcknowledged)
            .expect("confirming -> searching");
        machine
            .apply(TripStatus::DriverFound, TripTrigger::DriverAssigned)
            .expect("searching -> driver_found");
        machine.set_driver(sample_driver("Dana"));
        machine
    }

    #[test]
    fn new_machine_is_idle_and_unassigned() {
        let machine = TripStateMachine::new();
        assert_eq!(machine.status(), TripStatus::Idle);
        assert!(!machine.identity().is_assigned());
        assert!(machine.driver().is_none());
        assert!(machine.history().is_empty());
    }

    #[test]
    fn apply_records_each_transition_with_its_trigger() {
        let machine = machine_in_driver_found();
        let triggers: Vec<TripTrigger> = machine
            .history()
            .iter()
            .map(|change| change.trigger)
            .collect();
        assert_eq!(
            triggers,
            vec![
                TripTrigger::RequestSubmitted,
                TripTrigger::CreationAcknowledged,
                TripTrigger::DriverAssigned,
            ]
        );
        assert_eq!(
            machine.history().last().map(|change| change.status),
            Some(TripStatus::DriverFound)
        );
    }

    #[test]
    fn identity_binds_once() {
        let mut machine = TripStateMachine::new();
        assert!(machine.assign_identity(ReservationId::from(41_u64)));
        assert!(!machine.assign_identity(ReservationId::from(99_u64)));
        assert_eq!(
            machine.identity().reservation(),
            Some(&ReservationId::from(41_u64))
        );
    }

    #[test]
    fn terminal_transition_drops_the_driver_assignment() {
        let mut machine = machine_in_driver_found();
        assert!(machine.driver().is_some());
        machine
            .apply(TripStatus::Cancelled, TripTrigger::Cancelled)
            .expect("driver_found -> cancelled");
        assert!(machine.driver().is_none());
        assert_eq!(machine.status(), TripStatus::Cancelled);
    }

    #[test]
    fn rollback_clears_driver_and_marks_the_correction() {
        let mut machine = machine_in_driver_found();
        machine.rollback_to_searching();
        assert_eq!(machine.status(), TripStatus::Searching);
        assert!(machine.driver().is_none());
        assert_eq!(
            machine.history().last().map(|change| change.trigger),
            Some(TripTrigger::IdentityCorrected)
        );
    }

    #[test]
    fn replacing_the_driver_resets_the_position_track() {
        let mut machine = machine_in_driver_found();
        assert!(machine.record_position(DriverPosition {
            latitude: 37.77,
            longitude: -122.41,
            heading: Some(180.0),
            speed_kmh: Some(32.0),
            recorded_at_epoch_ms: Some(1_700_000_000_000),
        }));
        assert!(machine
            .driver()
            .and_then(|assignment| assignment.position)
            .is_some());

        machine.set_driver(sample_driver("Robin"));
        let assignment = machine.driver().expect("driver should be assigned");
        assert_eq!(assignment.driver.name, "Robin");
        assert!(assignment.position.is_none());
    }

    #[test]
    fn position_without_driver_is_refused() {
        let mut machine = TripStateMachine::new();
        assert!(!machine.record_position(DriverPosition {
            latitude: 0.0,
            longitude: 0.0,
            heading: None,
            speed_kmh: None,
            recorded_at_epoch_ms: None,
        }));
    }

    #[test]
    fn driver_matches_compares_whole_payloads() {
        let machine = machine_in_driver_found();
        assert!(machine.driver_matches(&sample_driver("Dana")));
        let mut refreshed = sample_driver("Dana");
        refreshed.eta_minutes = Some(2);
        assert!(!machine.driver_matches(&refreshed));
    }

    #[test]
    fn snapshot_reflects_machine_state() {
        let mut machine = machine_in_driver_found();
        machine.assign_identity(ReservationId::from(7_u64));
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.status, TripStatus::DriverFound);
        assert_eq!(snapshot.reservation_id, Some(ReservationId::from(7_u64)));
        assert_eq!(snapshot.transitions.len(), 3);
        assert!(snapshot
            .driver
            .as_ref()
            .is_some_and(|assignment| assignment.driver.name == "Dana"));
        assert!(!snapshot.created_at_rfc3339().is_empty());
    }
}
