use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelResult, DispatchApiResult};
use crate::event::ChannelFrame;
use crate::ids::{PassengerId, ReservationId, VehicleClassId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceDescriptor {
    pub label: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTiming {
    PayNow,
    PayOnArrival,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripSchedule {
    Immediate,
    Scheduled { departure_at_epoch_ms: i64 },
}

impl TripSchedule {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequestDetails {
    pub pickup: PlaceDescriptor,
    pub destination: PlaceDescriptor,
    pub pickup_coordinates: LocationPoint,
    pub destination_coordinates: LocationPoint,
    pub vehicle_class: VehicleClassId,
    pub quoted_price_minor: i64,
    pub payment_timing: PaymentTiming,
    pub schedule: TripSchedule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripCreationResponse {
    pub reservation_id: ReservationId,
    pub drivers_contacted: u32,
}

#[async_trait]
pub trait DispatchApi: Send + Sync {
    async fn create_trip(
        &self,
        request: &TripRequestDetails,
    ) -> DispatchApiResult<TripCreationResponse>;
    async fn cancel_trip(
        &self,
        reservation_id: &ReservationId,
        reason: Option<&str>,
    ) -> DispatchApiResult<()>;
}

pub type SharedDispatchApi = Arc<dyn DispatchApi>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Passenger,
    Driver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIdentity {
    pub owner_id: PassengerId,
    pub role: ChannelRole,
    pub display_name: String,
}

#[async_trait]
pub trait ChannelLink: Send {
    async fn send(&mut self, frame: &ChannelFrame) -> ChannelResult<()>;
    async fn next_frame(&mut self) -> ChannelResult<Option<ChannelFrame>>;
}

pub type BoxedChannelLink = Box<dyn ChannelLink>;

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, identity: &ChannelIdentity) -> ChannelResult<BoxedChannelLink>;
}

pub type SharedChannelConnector = Arc<dyn ChannelConnector>;
