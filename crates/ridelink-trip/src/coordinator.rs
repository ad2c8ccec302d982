//! Trip request coordination.
//!
//! [`TripCoordinator`] owns the single active trip and is the only place
//! its lock is taken. The synchronous creation call and the asynchronous
//! channel events both funnel into it: lifecycle events are decoded at the
//! channel boundary, queued, and reconciled one at a time in arrival order,
//! so every mutation of the trip runs to completion before the next begins.

use std::sync::{Arc, Weak};
use std::time::Duration;

use ridelink_channel::ChannelSession;
use ridelink_eventbus::bus::TripUpdateBus;
use ridelink_eventbus::envelope::TripUpdateEnvelope;
use ridelink_eventbus::update::TripUpdate;
use ridelink_protocol::api::{SharedDispatchApi, TripCreationResponse, TripRequestDetails};
use ridelink_protocol::event::{
    decode_lifecycle_frame, CancelSource, LifecycleEvent, LIFECYCLE_EVENT_KINDS,
};
use ridelink_protocol::ids::{ClientTripToken, ReservationId};
use ridelink_protocol::status::{TimerKind, TripStatus};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::cancellation::NO_DRIVER_AVAILABLE_REASON;
use crate::error::{TripFlowError, TripFlowResult};
use crate::reconciler::{reconcile_event, ReconcileDisposition, ReconcileReport};
use crate::state::{TripSnapshot, TripStateMachine};
use crate::timers::TimerSet;
use crate::transitions::TripTrigger;

pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_ARRIVAL_AUTO_START: Duration = Duration::from_secs(3);

/// Timer windows for the trip flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripFlowSettings {
    /// How long a search may run without an assignment before the trip is
    /// cancelled as unmatchable.
    pub search_timeout: Duration,
    /// Grace window between driver arrival and the automatic trip start.
    pub arrival_auto_start: Duration,
}

impl Default for TripFlowSettings {
    fn default() -> Self {
        Self {
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            arrival_auto_start: DEFAULT_ARRIVAL_AUTO_START,
        }
    }
}

pub(crate) struct ActiveTrip {
    pub machine: TripStateMachine,
    /// Reservation named by events accepted before the creation response;
    /// the response is reconciled against it.
    pub expected_identity: Option<ReservationId>,
    pub timers: TimerSet,
}

pub(crate) struct CoordinatorInner {
    pub dispatch: SharedDispatchApi,
    pub bus: Arc<TripUpdateBus>,
    pub settings: TripFlowSettings,
    pub active: RwLock<Option<ActiveTrip>>,
    pub channel: RwLock<Option<ChannelSession>>,
    pub ingest_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

#[derive(Clone)]
pub struct TripCoordinator {
    pub(crate) inner: Arc<CoordinatorInner>,
}

impl TripCoordinator {
    pub fn new(
        dispatch: SharedDispatchApi,
        bus: Arc<TripUpdateBus>,
        settings: TripFlowSettings,
    ) -> Self {
        let (ingest_tx, mut ingest_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(CoordinatorInner {
            dispatch,
            bus,
            settings,
            active: RwLock::new(None),
            channel: RwLock::new(None),
            ingest_tx,
        });

        // One consumer keeps channel arrival order intact end to end. The
        // weak reference lets the task end once every handle is gone.
        let weak: Weak<CoordinatorInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = ingest_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let coordinator = TripCoordinator { inner };
                coordinator.handle_lifecycle_event(event).await;
            }
        });

        Self { inner }
    }

    /// Wires a channel session into the coordinator: one decoding handler
    /// per lifecycle kind feeding the ordered ingestion queue, plus the
    /// session handle for outbound cancellation frames.
    pub async fn bind_channel(&self, session: &ChannelSession) {
        for kind in LIFECYCLE_EVENT_KINDS.iter().copied() {
            let ingest = self.inner.ingest_tx.clone();
            session.on(kind, move |frame| match decode_lifecycle_frame(frame) {
                Ok(Some(event)) => {
                    let _ = ingest.send(event);
                }
                Ok(None) => {}
                Err(error) => warn!(error = %error, "dropping undecodable channel frame"),
            });
        }
        *self.inner.channel.write().await = Some(session.clone());
    }

    /// Submits a trip request and merges the creation response with whatever
    /// the channel delivered while the call was in flight.
    pub async fn request_trip(
        &self,
        details: TripRequestDetails,
    ) -> TripFlowResult<TripCreationResponse> {
        // The token names this specific request; the outcome of the creation
        // call is applied only to the trip still carrying it.
        let token = ClientTripToken::generate();
        {
            let mut slot = self.inner.active.write().await;
            if slot.is_some() {
                return Err(TripFlowError::TripAlreadyActive);
            }
            let mut machine = TripStateMachine::for_token(token.clone());
            let status = machine.apply(TripStatus::Confirming, TripTrigger::RequestSubmitted)?;
            self.publish(
                None,
                TripUpdate::StatusChanged {
                    previous: TripStatus::Idle,
                    status,
                },
            );
            *slot = Some(ActiveTrip {
                machine,
                expected_identity: None,
                timers: TimerSet::default(),
            });
        }

        info!(
            pickup = %details.pickup.label,
            destination = %details.destination.label,
            immediate = details.schedule.is_immediate(),
            "requesting trip"
        );

        let response = match self.inner.dispatch.create_trip(&details).await {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "trip creation failed");
                self.clear_failed_request(&token).await;
                return Err(error.into());
            }
        };

        self.merge_creation_response(&token, &details, response).await
    }

    /// Starts the ride manually from the arrived state.
    pub async fn start_trip(&self) -> TripFlowResult<TripStatus> {
        let mut slot = self.inner.active.write().await;
        let Some(active) = slot.as_mut() else {
            return Err(TripFlowError::NoActiveTrip);
        };
        let before = active.machine.status();
        let status = active
            .machine
            .apply(TripStatus::EnRoute, TripTrigger::TripStarted)?;
        self.sync_timers(active, before);
        let reservation = active.machine.identity().reservation().cloned();
        self.publish(
            reservation.as_ref(),
            TripUpdate::StatusChanged {
                previous: before,
                status,
            },
        );
        info!("trip started");
        Ok(status)
    }

    /// Finishes the ride and frees the slot for the next request.
    pub async fn complete_trip(&self) -> TripFlowResult<TripStatus> {
        let mut slot = self.inner.active.write().await;
        let Some(active) = slot.as_mut() else {
            return Err(TripFlowError::NoActiveTrip);
        };
        let before = active.machine.status();
        let status = active
            .machine
            .apply(TripStatus::Completed, TripTrigger::TripCompleted)?;
        active.timers.disarm_all();
        let reservation = active.machine.identity().reservation().cloned();
        self.publish(
            reservation.as_ref(),
            TripUpdate::StatusChanged {
                previous: before,
                status,
            },
        );
        info!(reservation = ?reservation.as_ref().map(ReservationId::as_str), "trip completed");
        *slot = None;
        Ok(status)
    }

    pub async fn snapshot(&self) -> Option<TripSnapshot> {
        self.inner
            .active
            .read()
            .await
            .as_ref()
            .map(|active| active.machine.snapshot())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TripUpdateEnvelope> {
        self.inner.bus.subscribe()
    }

    async fn merge_creation_response(
        &self,
        token: &ClientTripToken,
        details: &TripRequestDetails,
        response: TripCreationResponse,
    ) -> TripFlowResult<TripCreationResponse> {
        let mut slot = self.inner.active.write().await;
        let Some(active) = slot.as_mut() else {
            // Cancelled while the call was in flight; the response loses.
            debug!(
                reservation = %response.reservation_id,
                "discarding creation response for a cancelled request"
            );
            return Err(TripFlowError::RequestSuperseded);
        };
        if !active.machine.identity().matches_token(token) {
            // The slot was cancelled and re-occupied while the call was in
            // flight; this response belongs to the dead request, not to the
            // trip now holding the slot.
            debug!(
                reservation = %response.reservation_id,
                "discarding creation response for a superseded request"
            );
            return Err(TripFlowError::RequestSuperseded);
        }

        let before = active.machine.status();
        match active.expected_identity.take() {
            Some(expected) if expected == response.reservation_id => {
                active
                    .machine
                    .assign_identity(response.reservation_id.clone());
                debug!(
                    reservation = %response.reservation_id,
                    "creation response confirmed provisionally applied events"
                );
            }
            Some(expected) => {
                // The response is authoritative. Unwind what the provisional
                // events did and restart the search under the real identity.
                warn!(
                    expected = %expected,
                    reservation = %response.reservation_id,
                    "creation response contradicts provisional events, rolling back"
                );
                active.machine.rollback_to_searching();
                active
                    .machine
                    .assign_identity(response.reservation_id.clone());
                self.publish(
                    Some(&response.reservation_id),
                    TripUpdate::StatusChanged {
                        previous: before,
                        status: TripStatus::Searching,
                    },
                );
            }
            None => {
                active
                    .machine
                    .assign_identity(response.reservation_id.clone());
                let target = if details.schedule.is_immediate() {
                    TripStatus::Searching
                } else {
                    TripStatus::Scheduled
                };
                let status = active
                    .machine
                    .apply(target, TripTrigger::CreationAcknowledged)?;
                self.publish(
                    Some(&response.reservation_id),
                    TripUpdate::StatusChanged {
                        previous: before,
                        status,
                    },
                );
            }
        }

        if active.machine.status() == TripStatus::Searching {
            self.publish(
                Some(&response.reservation_id),
                TripUpdate::SearchStarted {
                    drivers_contacted: response.drivers_contacted,
                },
            );
        }
        self.sync_timers(active, before);
        info!(
            reservation = %response.reservation_id,
            drivers_contacted = response.drivers_contacted,
            status = %active.machine.status(),
            "trip created"
        );
        Ok(response)
    }

    async fn clear_failed_request(&self, token: &ClientTripToken) {
        let mut slot = self.inner.active.write().await;
        match slot.as_ref() {
            Some(active) if active.machine.identity().matches_token(token) => {}
            _ => {
                // Empty, or already someone else's trip; the failed request
                // has nothing left to clear.
                debug!("creation failure outcome for a superseded request, slot untouched");
                return;
            }
        }
        if let Some(mut active) = slot.take() {
            active.timers.disarm_all();
            let previous = active.machine.status();
            self.publish(
                None,
                TripUpdate::StatusChanged {
                    previous,
                    status: TripStatus::Idle,
                },
            );
        }
    }

    pub(crate) async fn handle_lifecycle_event(&self, event: LifecycleEvent) {
        let mut slot = self.inner.active.write().await;
        let Some(active) = slot.as_mut() else {
            trace!(
                kind = event.event.kind(),
                reservation = %event.reservation_id,
                "dropping lifecycle event with no active trip"
            );
            return;
        };

        let ReconcileReport {
            disposition,
            status_before,
            status_after,
            updates,
        } = reconcile_event(&mut active.machine, &mut active.expected_identity, &event);

        match disposition {
            ReconcileDisposition::Applied => {
                let reservation = active
                    .machine
                    .identity()
                    .reservation()
                    .cloned()
                    .or_else(|| active.expected_identity.clone());
                for update in updates {
                    self.publish(reservation.as_ref(), update);
                }
                self.sync_timers(active, status_before);
                if status_after.is_terminal() {
                    active.timers.disarm_all();
                    info!(status = %status_after, "trip reached a terminal status, clearing slot");
                    *slot = None;
                }
            }
            ReconcileDisposition::DuplicateKind => {
                debug!(kind = event.event.kind(), "duplicate lifecycle event ignored")
            }
            ReconcileDisposition::ForeignReservation => {
                trace!(
                    kind = event.event.kind(),
                    reservation = %event.reservation_id,
                    "foreign lifecycle event dropped"
                )
            }
            ReconcileDisposition::OutOfOrder => {
                debug!(
                    kind = event.event.kind(),
                    status = %status_before,
                    "out-of-order lifecycle event ignored"
                )
            }
            ReconcileDisposition::NoDriverAssignment => {
                trace!("position fix without a driver assignment dropped")
            }
            ReconcileDisposition::PostTerminal => {
                trace!(kind = event.event.kind(), "lifecycle event after terminal status dropped")
            }
            ReconcileDisposition::Rejected(error) => {
                warn!(
                    error = %error,
                    kind = event.event.kind(),
                    "lifecycle event rejected by the state machine"
                )
            }
        }
    }

    /// Keeps the timer slots in step with a status change. Called with the
    /// status the batch started from, after the machine settled, so a
    /// transient pass through `searching` inside one batch arms nothing.
    pub(crate) fn sync_timers(&self, active: &mut ActiveTrip, before: TripStatus) {
        let after = active.machine.status();
        if before == after {
            return;
        }
        if before == TripStatus::Searching {
            active.timers.disarm(TimerKind::SearchTimeout);
        }
        if before == TripStatus::Arrived {
            active.timers.disarm(TimerKind::ArrivalAutoStart);
        }
        match after {
            TripStatus::Searching => active
                .timers
                .arm(TimerKind::SearchTimeout, self.spawn_search_timeout()),
            TripStatus::Arrived => active
                .timers
                .arm(TimerKind::ArrivalAutoStart, self.spawn_arrival_auto_start()),
            _ => {}
        }
    }

    pub(crate) fn publish(&self, reservation: Option<&ReservationId>, update: TripUpdate) {
        self.inner.bus.publish(reservation, update);
    }

    fn spawn_search_timeout(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let total = self.inner.settings.search_timeout.as_secs();
        tokio::spawn(async move {
            coordinator
                .run_countdown(TimerKind::SearchTimeout, total)
                .await;
            coordinator.handle_search_timeout().await;
        })
    }

    fn spawn_arrival_auto_start(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let total = self.inner.settings.arrival_auto_start.as_secs();
        tokio::spawn(async move {
            coordinator
                .run_countdown(TimerKind::ArrivalAutoStart, total)
                .await;
            coordinator.handle_arrival_auto_start().await;
        })
    }

    /// Publishes one countdown tick per second until the window elapses.
    async fn run_countdown(&self, kind: TimerKind, total_secs: u64) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut remaining = total_secs;
        loop {
            ticker.tick().await;
            if remaining == 0 {
                return;
            }
            let reservation = {
                self.inner
                    .active
                    .read()
                    .await
                    .as_ref()
                    .and_then(|active| active.machine.identity().reservation().cloned())
            };
            self.publish(
                reservation.as_ref(),
                TripUpdate::TimerCountdown {
                    timer: kind,
                    remaining_secs: remaining,
                },
            );
            remaining -= 1;
        }
    }

    async fn handle_search_timeout(&self) {
        debug!("search window elapsed");
        self.cancel_trip_if(
            Some(TripStatus::Searching),
            CancelSource::Platform,
            Some(NO_DRIVER_AVAILABLE_REASON),
        )
        .await;
    }

    async fn handle_arrival_auto_start(&self) {
        let mut slot = self.inner.active.write().await;
        let Some(active) = slot.as_mut() else {
            return;
        };
        if active.machine.status() != TripStatus::Arrived {
            return;
        }
        match active
            .machine
            .apply(TripStatus::EnRoute, TripTrigger::TripStarted)
        {
            Ok(status) => {
                self.sync_timers(active, TripStatus::Arrived);
                let reservation = active.machine.identity().reservation().cloned();
                self.publish(
                    reservation.as_ref(),
                    TripUpdate::StatusChanged {
                        previous: TripStatus::Arrived,
                        status,
                    },
                );
                info!("trip auto-started after the arrival window");
            }
            Err(error) => warn!(error = %error, "arrival auto-start could not apply"),
        }
    }
}
