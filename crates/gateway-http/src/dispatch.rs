//! Dispatch API calls against the gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use ridelink_protocol::api::{
    DispatchApi, PaymentTiming, TripCreationResponse, TripRequestDetails, TripSchedule,
};
use ridelink_protocol::error::{DispatchApiError, DispatchApiResult};
use ridelink_protocol::ids::ReservationId;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{sanitize_error_body, GatewayConfig};

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(100);
const RESERVATION_ID_KEYS: &[&str] = &["reservationId", "reservation_id", "id"];
const DRIVERS_CONTACTED_KEYS: &[&str] = &["driversContacted", "drivers_contacted", "driversNotified"];

pub struct HttpDispatchGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpDispatchGateway {
    pub fn new(config: GatewayConfig) -> DispatchApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| {
                DispatchApiError::Configuration(format!("http client build failed: {error}"))
            })?;
        Ok(Self { config, client })
    }

    /// Polls the gateway health endpoint until it answers or the deadline
    /// passes.
    pub async fn wait_until_healthy(&self, deadline: Duration) -> DispatchApiResult<()> {
        let health_url = format!("{}/health", self.config.trimmed_base_url());
        let started = tokio::time::Instant::now();
        while started.elapsed() <= deadline {
            let probe = self.client.get(health_url.as_str()).send().await;
            if let Ok(response) = probe {
                if response.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(HEALTH_PROBE_INTERVAL).await;
        }

        Err(DispatchApiError::Request(format!(
            "gateway failed health check at {health_url} within {deadline:?}"
        )))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.trimmed_base_url())
    }
}

#[async_trait]
impl DispatchApi for HttpDispatchGateway {
    async fn create_trip(
        &self,
        request: &TripRequestDetails,
    ) -> DispatchApiResult<TripCreationResponse> {
        let body = CreateTripRequest::from_details(request);
        let response = self
            .client
            .post(self.url("/v1/trips"))
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                DispatchApiError::Request(format!("trip creation request failed: {error}"))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|error| {
            DispatchApiError::Protocol(format!("trip creation body read failed: {error}"))
        })?;
        if !status.is_success() {
            return Err(creation_error_from_response(status, &text));
        }

        parse_creation_response_body(&text)
    }

    async fn cancel_trip(
        &self,
        reservation_id: &ReservationId,
        reason: Option<&str>,
    ) -> DispatchApiResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/v1/trips/{}/cancel", reservation_id.as_str())))
            .json(&json!({ "reason": reason }))
            .send()
            .await
            .map_err(|error| {
                DispatchApiError::Request(format!("trip cancel request failed: {error}"))
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(reservation = %reservation_id, "remote trip cancel acknowledged");
            return Ok(());
        }
        let body = sanitize_error_body(response.text().await.unwrap_or_default().as_str());
        Err(DispatchApiError::Request(format!(
            "trip cancel failed with status {status}: {body}"
        )))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTripRequest<'a> {
    pickup_label: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pickup_address: Option<&'a str>,
    pickup_latitude: f64,
    pickup_longitude: f64,
    destination_label: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_address: Option<&'a str>,
    destination_latitude: f64,
    destination_longitude: f64,
    vehicle_class: &'a str,
    quoted_price_minor: i64,
    payment_timing: PaymentTiming,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_departure_at_epoch_ms: Option<i64>,
}

impl<'a> CreateTripRequest<'a> {
    fn from_details(details: &'a TripRequestDetails) -> Self {
        let (kind, scheduled_departure_at_epoch_ms) = match details.schedule {
            TripSchedule::Immediate => ("immediate", None),
            TripSchedule::Scheduled {
                departure_at_epoch_ms,
            } => ("scheduled", Some(departure_at_epoch_ms)),
        };
        Self {
            pickup_label: &details.pickup.label,
            pickup_address: details.pickup.address.as_deref(),
            pickup_latitude: details.pickup_coordinates.latitude,
            pickup_longitude: details.pickup_coordinates.longitude,
            destination_label: &details.destination.label,
            destination_address: details.destination.address.as_deref(),
            destination_latitude: details.destination_coordinates.latitude,
            destination_longitude: details.destination_coordinates.longitude,
            vehicle_class: details.vehicle_class.as_str(),
            quoted_price_minor: details.quoted_price_minor,
            payment_timing: details.payment_timing,
            kind,
            scheduled_departure_at_epoch_ms,
        }
    }
}

fn creation_error_from_response(status: StatusCode, body: &str) -> DispatchApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        });
    match message {
        Some(message) if status.is_client_error() => DispatchApiError::Rejected(message),
        _ => DispatchApiError::Request(format!(
            "trip creation failed with status {status}: {}",
            sanitize_error_body(body)
        )),
    }
}

/// Parses the creation response, tolerating the shapes the gateway has been
/// seen to produce: the success flag may be absent on plain 2xx bodies, the
/// reservation id may be a string or an integer and may sit under different
/// keys or one level of nesting.
fn parse_creation_response_body(body: &str) -> DispatchApiResult<TripCreationResponse> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(DispatchApiError::Protocol(
            "trip creation response body is empty".to_owned(),
        ));
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|error| {
        DispatchApiError::Protocol(format!("trip creation response is not JSON: {error}"))
    })?;

    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("trip creation rejected without a message");
        return Err(DispatchApiError::Rejected(message.to_owned()));
    }

    let reservation_id = extract_reservation_id(&value).ok_or_else(|| {
        DispatchApiError::Protocol(format!(
            "trip creation response carries no reservation id; body: {}",
            sanitize_error_body(trimmed)
        ))
    })?;
    let drivers_contacted = extract_drivers_contacted(&value);

    Ok(TripCreationResponse {
        reservation_id,
        drivers_contacted,
    })
}

fn extract_reservation_id(value: &Value) -> Option<ReservationId> {
    for key in RESERVATION_ID_KEYS {
        if let Some(found) = find_key_recursive(value, key, 4) {
            if let Some(reservation_id) = reservation_id_from_value(found) {
                return Some(reservation_id);
            }
        }
    }
    None
}

fn reservation_id_from_value(value: &Value) -> Option<ReservationId> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(ReservationId::normalized(text)),
        Value::Number(number) => number
            .as_u64()
            .map(ReservationId::from)
            .or_else(|| number.as_i64().map(ReservationId::from)),
        _ => None,
    }
}

fn extract_drivers_contacted(value: &Value) -> u32 {
    for key in DRIVERS_CONTACTED_KEYS {
        if let Some(count) = find_key_recursive(value, key, 4).and_then(Value::as_u64) {
            return u32::try_from(count).unwrap_or(u32::MAX);
        }
    }
    0
}

fn find_key_recursive<'a>(value: &'a Value, key: &str, depth: usize) -> Option<&'a Value> {
    if depth == 0 {
        return None;
    }

    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values()
                .find_map(|nested| find_key_recursive(nested, key, depth - 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|nested| find_key_recursive(nested, key, depth - 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_creation_response_accepts_canonical_shape() {
        let body = r#"{"success":true,"reservationId":"R-512","driversContacted":4}"#;
        let parsed = parse_creation_response_body(body).expect("parse creation response");
        assert_eq!(parsed.reservation_id, ReservationId::from("R-512"));
        assert_eq!(parsed.drivers_contacted, 4);
    }

    #[test]
    fn parse_creation_response_accepts_integer_reservation_id() {
        let body = r#"{"reservationId":512,"driversContacted":2}"#;
        let parsed = parse_creation_response_body(body).expect("parse integer id");
        assert_eq!(parsed.reservation_id, ReservationId::from(512_u64));
    }

    #[test]
    fn parse_creation_response_accepts_nested_shape_and_missing_counts() {
        let body = r#"{"data":{"reservation":{"id":"R-9"}}}"#;
        let parsed = parse_creation_response_body(body).expect("parse nested response");
        assert_eq!(parsed.reservation_id, ReservationId::from("R-9"));
        assert_eq!(parsed.drivers_contacted, 0);
    }

    #[test]
    fn parse_creation_response_maps_declined_flag_to_rejection() {
        let body = r#"{"success":false,"message":"no drivers in your area"}"#;
        let error = parse_creation_response_body(body).expect_err("declined response");
        assert_eq!(
            error,
            DispatchApiError::Rejected("no drivers in your area".to_owned())
        );
    }

    #[test]
    fn parse_creation_response_without_reservation_id_is_a_protocol_error() {
        let error = parse_creation_response_body(r#"{"ok":true}"#).expect_err("missing id");
        assert!(matches!(error, DispatchApiError::Protocol(_)));
    }

    #[test]
    fn creation_error_prefers_the_gateway_message_on_client_errors() {
        let error = creation_error_from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"pickup outside the service area"}"#,
        );
        assert_eq!(
            error,
            DispatchApiError::Rejected("pickup outside the service area".to_owned())
        );

        let error = creation_error_from_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(error, DispatchApiError::Request(_)));
    }

    #[test]
    fn create_request_carries_schedule_fields_only_when_scheduled() {
        let details = TripRequestDetails {
            pickup: ridelink_protocol::api::PlaceDescriptor {
                label: "Bali".to_owned(),
                address: None,
            },
            destination: ridelink_protocol::api::PlaceDescriptor {
                label: "Bonaberi".to_owned(),
                address: Some("Carrefour".to_owned()),
            },
            pickup_coordinates: ridelink_protocol::api::LocationPoint {
                latitude: 4.03,
                longitude: 9.68,
            },
            destination_coordinates: ridelink_protocol::api::LocationPoint {
                latitude: 4.08,
                longitude: 9.65,
            },
            vehicle_class: ridelink_protocol::ids::VehicleClassId::new("standard"),
            quoted_price_minor: 1_500,
            payment_timing: PaymentTiming::PayNow,
            schedule: TripSchedule::Scheduled {
                departure_at_epoch_ms: 1_771_000_000_000,
            },
        };

        let rendered = serde_json::to_value(CreateTripRequest::from_details(&details))
            .expect("serialize create request");
        assert_eq!(rendered["kind"], "scheduled");
        assert_eq!(rendered["scheduledDepartureAtEpochMs"], 1_771_000_000_000_i64);
        assert_eq!(rendered["paymentTiming"], "pay_now");
        assert_eq!(rendered["destinationAddress"], "Carrefour");
        assert!(rendered.get("pickupAddress").is_none());

        let immediate = TripRequestDetails {
            schedule: TripSchedule::Immediate,
            ..details
        };
        let rendered = serde_json::to_value(CreateTripRequest::from_details(&immediate))
            .expect("serialize immediate request");
        assert_eq!(rendered["kind"], "immediate");
        assert!(rendered.get("scheduledDepartureAtEpochMs").is_none());
    }
}
