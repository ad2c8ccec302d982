use serde::{Deserialize, Serialize};

use ridelink_protocol::event::{CancelSource, DriverPosition, DriverProfile};
use ridelink_protocol::status::{TimerKind, TripStatus};

/// One observable change in the trip, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripUpdate {
    StatusChanged {
        previous: TripStatus,
        status: TripStatus,
    },
    SearchStarted {
        drivers_contacted: u32,
    },
    DriverUpdated {
        driver: DriverProfile,
    },
    DriverPositionChanged {
        position: DriverPosition,
    },
    TimerCountdown {
        timer: TimerKind,
        remaining_secs: u64,
    },
    TripCancelled {
        source: CancelSource,
        message: Option<String>,
    },
    Notice {
        message: String,
    },
}
