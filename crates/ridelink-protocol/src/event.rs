//! Lifecycle event model and channel frame normalization.
//!
//! Raw channel frames are duck-typed JSON; everything downstream works with
//! the typed [`LifecycleEvent`] union instead. Decoding happens exactly once,
//! here, so malformed payloads never reach the reconciliation layer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::ChannelIdentity;
use crate::error::ChannelError;
use crate::ids::{DriverId, ReservationId};

pub const EVENT_IDENTIFY: &str = "identify";
pub const EVENT_DRIVER_ASSIGNED: &str = "assigned";
pub const EVENT_DRIVER_EN_ROUTE: &str = "en-route";
pub const EVENT_DRIVER_ARRIVED: &str = "arrived";
pub const EVENT_TRIP_STARTED: &str = "started";
pub const EVENT_TRIP_STARTED_BROADCAST: &str = "global-started";
pub const EVENT_DRIVER_POSITION: &str = "position";
pub const EVENT_TRIP_CANCELLED: &str = "cancelled";

/// Every inbound frame kind that feeds the trip lifecycle.
pub const LIFECYCLE_EVENT_KINDS: &[&str] = &[
    EVENT_DRIVER_ASSIGNED,
    EVENT_DRIVER_EN_ROUTE,
    EVENT_DRIVER_ARRIVED,
    EVENT_TRIP_STARTED,
    EVENT_TRIP_STARTED_BROADCAST,
    EVENT_DRIVER_POSITION,
    EVENT_TRIP_CANCELLED,
];

/// One frame on the push channel, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDescriptor {
    pub model: String,
    pub plate: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    pub driver_id: DriverId,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    pub vehicle: VehicleDescriptor,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverPosition {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: Option<f32>,
    #[serde(default, rename = "speed")]
    pub speed_kmh: Option<f32>,
    #[serde(default, rename = "timestamp")]
    pub recorded_at_epoch_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelSource {
    Passenger,
    Driver,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripCancelledEvent {
    pub source: CancelSource,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripStartedBroadcastEvent {
    #[serde(default)]
    pub message: Option<String>,
}

/// Normalized lifecycle event body, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripEvent {
    DriverAssigned(DriverProfile),
    DriverEnRoute,
    DriverArrived,
    TripStarted,
    TripStartedBroadcast(TripStartedBroadcastEvent),
    DriverPosition(DriverPosition),
    TripCancelled(TripCancelledEvent),
}

impl TripEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DriverAssigned(_) => EVENT_DRIVER_ASSIGNED,
            Self::DriverEnRoute => EVENT_DRIVER_EN_ROUTE,
            Self::DriverArrived => EVENT_DRIVER_ARRIVED,
            Self::TripStarted => EVENT_TRIP_STARTED,
            Self::TripStartedBroadcast(_) => EVENT_TRIP_STARTED_BROADCAST,
            Self::DriverPosition(_) => EVENT_DRIVER_POSITION,
            Self::TripCancelled(_) => EVENT_TRIP_CANCELLED,
        }
    }
}

/// A lifecycle event together with the reservation it pertains to.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub reservation_id: ReservationId,
    pub event: TripEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignedFrame {
    reservation_id: ReservationId,
    driver: DriverProfile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationOnlyFrame {
    reservation_id: ReservationId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastStartedFrame {
    reservation_id: ReservationId,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionFrame {
    reservation_id: ReservationId,
    #[serde(flatten)]
    position: DriverPosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledFrame {
    reservation_id: ReservationId,
    source: CancelSource,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes a raw channel frame into a normalized lifecycle event.
///
/// Frames of kinds outside the lifecycle set decode to `Ok(None)`; a frame
/// of a known kind whose payload does not match its shape is a protocol
/// error and must be dropped by the caller.
pub fn decode_lifecycle_frame(frame: &ChannelFrame) -> Result<Option<LifecycleEvent>, ChannelError> {
    let event = match frame.event.as_str() {
        EVENT_DRIVER_ASSIGNED => {
            let body: AssignedFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::DriverAssigned(body.driver),
            }
        }
        EVENT_DRIVER_EN_ROUTE => {
            let body: ReservationOnlyFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::DriverEnRoute,
            }
        }
        EVENT_DRIVER_ARRIVED => {
            let body: ReservationOnlyFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::DriverArrived,
            }
        }
        EVENT_TRIP_STARTED => {
            let body: ReservationOnlyFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::TripStarted,
            }
        }
        EVENT_TRIP_STARTED_BROADCAST => {
            let body: BroadcastStartedFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::TripStartedBroadcast(TripStartedBroadcastEvent {
                    message: body.message,
                }),
            }
        }
        EVENT_DRIVER_POSITION => {
            let body: PositionFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::DriverPosition(body.position),
            }
        }
        EVENT_TRIP_CANCELLED => {
            let body: CancelledFrame = payload(frame)?;
            LifecycleEvent {
                reservation_id: body.reservation_id,
                event: TripEvent::TripCancelled(TripCancelledEvent {
                    source: body.source,
                    message: body.message,
                }),
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

/// Builds the identity handshake frame sent first on every (re)connect.
pub fn encode_identify_frame(identity: &ChannelIdentity) -> ChannelFrame {
    ChannelFrame::new(
        EVENT_IDENTIFY,
        json!({
            "ownerId": identity.owner_id.as_str(),
            "role": identity.role,
            "displayName": identity.display_name,
        }),
    )
}

/// Builds the outbound cancellation frame the passenger emits alongside the
/// remote cancel call.
pub fn encode_cancellation_frame(
    reservation_id: &ReservationId,
    source: CancelSource,
    message: Option<&str>,
) -> ChannelFrame {
    ChannelFrame::new(
        EVENT_TRIP_CANCELLED,
        json!({
            "reservationId": reservation_id.as_str(),
            "source": source,
            "message": message,
        }),
    )
}

fn payload<T: DeserializeOwned>(frame: &ChannelFrame) -> Result<T, ChannelError> {
    serde_json::from_value(frame.payload.clone()).map_err(|error| {
        ChannelError::Protocol(format!("malformed '{}' payload: {error}", frame.event))
    })
}
