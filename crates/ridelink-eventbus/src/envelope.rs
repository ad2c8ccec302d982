use serde::{Deserialize, Serialize};

use ridelink_protocol::ids::ReservationId;

use crate::update::TripUpdate;

/// A published trip update plus the ordering metadata the bus stamps on it.
///
/// `reservation_id` is absent for updates emitted before the creation call
/// confirmed the server identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdateEnvelope {
    pub reservation_id: Option<ReservationId>,
    pub sequence: u64,
    pub received_at_monotonic_nanos: u64,
    pub update: TripUpdate,
}
