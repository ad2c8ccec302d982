//! Two-phase trip cancellation.
//!
//! Phase one runs under the trip lock and is the source of truth: the
//! machine moves to `cancelled`, timers are disarmed, updates go out, and
//! the slot is freed. Phase two notifies the other side (dispatch call and
//! channel frame) on a detached task; its outcome is logged and never
//! reverts phase one.

use ridelink_eventbus::update::TripUpdate;
use ridelink_protocol::event::{encode_cancellation_frame, CancelSource};
use ridelink_protocol::ids::ReservationId;
use ridelink_protocol::status::TripStatus;
use tracing::{debug, info, warn};

use crate::coordinator::TripCoordinator;
use crate::transitions::TripTrigger;

/// Reason attached when the search window closes without an assignment.
pub const NO_DRIVER_AVAILABLE_REASON: &str = "no driver available";

impl TripCoordinator {
    /// Cancels the active trip on behalf of the passenger. Returns `false`
    /// when there is nothing to cancel.
    pub async fn cancel_trip(&self, reason: Option<&str>) -> bool {
        self.cancel_trip_if(None, CancelSource::Passenger, reason)
            .await
    }

    /// Cancels the active trip, optionally only when it is still in
    /// `only_from`. The gate closes the race between a timer firing and the
    /// status it watched having moved on.
    pub(crate) async fn cancel_trip_if(
        &self,
        only_from: Option<TripStatus>,
        source: CancelSource,
        reason: Option<&str>,
    ) -> bool {
        let reservation = {
            let mut slot = self.inner.active.write().await;
            let Some(active) = slot.as_mut() else {
                debug!("cancel requested with no active trip");
                return false;
            };
            let before = active.machine.status();
            if let Some(required) = only_from {
                if before != required {
                    debug!(status = %before, "conditional cancel skipped, trip moved on");
                    return false;
                }
            }
            let status = match active
                .machine
                .apply(TripStatus::Cancelled, TripTrigger::Cancelled)
            {
                Ok(status) => status,
                Err(error) => {
                    debug!(error = %error, "cancel ignored");
                    return false;
                }
            };
            active.timers.disarm_all();
            let reservation = active.machine.identity().reservation().cloned();
            self.publish(
                reservation.as_ref(),
                TripUpdate::StatusChanged {
                    previous: before,
                    status,
                },
            );
            self.publish(
                reservation.as_ref(),
                TripUpdate::TripCancelled {
                    source,
                    message: reason.map(str::to_owned),
                },
            );
            info!(
                reservation = ?reservation.as_ref().map(ReservationId::as_str),
                reason = ?reason,
                "trip cancelled"
            );
            *slot = None;
            reservation
        };

        match reservation {
            Some(reservation_id) => {
                self.spawn_remote_cancel(reservation_id, source, reason.map(str::to_owned))
            }
            None => debug!("trip never received a reservation id, skipping remote cancel"),
        }
        true
    }

    /// Detaches the remote half of a cancellation. Must not await before the
    /// spawn: the search timeout reaches here from the timer task it just
    /// disarmed, and the pending abort lands at that task's next yield.
    fn spawn_remote_cancel(
        &self,
        reservation_id: ReservationId,
        source: CancelSource,
        reason: Option<String>,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(error) = inner
                .dispatch
                .cancel_trip(&reservation_id, reason.as_deref())
                .await
            {
                warn!(
                    error = %error,
                    reservation = %reservation_id,
                    "remote trip cancellation failed"
                );
            }
            let channel = inner.channel.read().await.clone();
            match channel {
                Some(session) => session.emit(encode_cancellation_frame(
                    &reservation_id,
                    source,
                    reason.as_deref(),
                )),
                None => debug!("no channel bound, skipping the cancellation frame"),
            }
        });
    }
}
