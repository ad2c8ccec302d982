//! Client facade for the ridelink workspace.
//!
//! Re-exports the public surface of the member crates and wires them into a
//! running client, so applications depend on this crate alone.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

pub use gateway_http::{
    GatewayConfig, HttpChannelConnector, HttpDispatchGateway, ENV_RIDELINK_GATEWAY_URL,
};
pub use ridelink_channel::{ChannelSession, ChannelSessionStatus, HandlerId, RetryPolicy};
pub use ridelink_config::{
    default_config_path, load_from_env, load_from_path, ConfigError, RidelinkConfig,
    ENV_RIDELINK_CONFIG,
};
pub use ridelink_eventbus::{TripUpdate, TripUpdateBus, TripUpdateEnvelope};
pub use ridelink_protocol::api::{
    ChannelConnector, ChannelIdentity, ChannelRole, DispatchApi, LocationPoint, PaymentTiming,
    PlaceDescriptor, SharedChannelConnector, SharedDispatchApi, TripCreationResponse,
    TripRequestDetails, TripSchedule,
};
pub use ridelink_protocol::error::{ChannelError, DispatchApiError};
pub use ridelink_protocol::event::{CancelSource, ChannelFrame, DriverPosition, DriverProfile};
pub use ridelink_protocol::ids::{
    DriverId, PassengerId, ReservationId, TripIdentity, VehicleClassId,
};
pub use ridelink_protocol::status::{TimerKind, TripStatus};
pub use ridelink_trip::{
    DriverAssignment, TripCoordinator, TripFlowError, TripFlowSettings, TripSnapshot,
    NO_DRIVER_AVAILABLE_REASON,
};

/// Gateway settings carved out of the loaded configuration.
pub fn gateway_config(config: &RidelinkConfig) -> GatewayConfig {
    let runtime = config.gateway_runtime();
    GatewayConfig {
        base_url: runtime.base_url,
        request_timeout: runtime.request_timeout,
    }
}

/// Channel reconnect policy carved out of the loaded configuration.
pub fn retry_policy(config: &RidelinkConfig) -> RetryPolicy {
    let retry = config.channel_retry();
    RetryPolicy::new()
        .with_max_retries(retry.max_retries)
        .with_initial_delay(retry.initial_backoff)
        .with_max_delay(retry.max_backoff)
        .with_multiplier(retry.backoff_multiplier as f64)
}

/// Trip timer windows carved out of the loaded configuration.
pub fn trip_flow_settings(config: &RidelinkConfig) -> TripFlowSettings {
    let timers = config.trip_timers();
    TripFlowSettings {
        search_timeout: timers.search_timeout,
        arrival_auto_start: timers.arrival_auto_start,
    }
}

/// Fully wired client: HTTP gateway for dispatch calls, push channel session
/// for lifecycle events, and a trip coordinator merging the two.
pub struct RidelinkClient {
    coordinator: TripCoordinator,
    session: ChannelSession,
    bus: Arc<TripUpdateBus>,
}

impl RidelinkClient {
    /// Builds the HTTP gateway parts from configuration and connects.
    pub async fn connect(
        config: &RidelinkConfig,
        identity: ChannelIdentity,
    ) -> Result<Self, DispatchApiError> {
        let gateway = gateway_config(config);
        let dispatch: SharedDispatchApi = Arc::new(HttpDispatchGateway::new(gateway.clone())?);
        let connector: SharedChannelConnector = Arc::new(HttpChannelConnector::new(gateway));
        Ok(Self::connect_with(
            dispatch,
            connector,
            identity,
            retry_policy(config),
            trip_flow_settings(config),
        )
        .await)
    }

    /// Connects over caller-supplied transports. This is the seam test
    /// harnesses and alternative transports plug into.
    pub async fn connect_with(
        dispatch: SharedDispatchApi,
        connector: SharedChannelConnector,
        identity: ChannelIdentity,
        retry: RetryPolicy,
        settings: TripFlowSettings,
    ) -> Self {
        let bus = Arc::new(TripUpdateBus::default());
        let coordinator = TripCoordinator::new(dispatch, bus.clone(), settings);
        let session = ChannelSession::connect(connector, identity.clone(), retry);
        coordinator.bind_channel(&session).await;
        info!(owner = %identity.owner_id.as_str(), "ridelink client connected");

        Self {
            coordinator,
            session,
            bus,
        }
    }

    pub fn coordinator(&self) -> &TripCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &ChannelSession {
        &self.session
    }

    /// New subscription to the sequenced trip update stream.
    pub fn updates(&self) -> broadcast::Receiver<TripUpdateEnvelope> {
        self.bus.subscribe()
    }

    /// Stops the channel session. Trips already in flight keep their local
    /// state; no reconnect follows.
    pub fn close(&self) {
        self.session.close();
    }
}
