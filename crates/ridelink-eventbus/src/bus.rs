use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ridelink_protocol::ids::ReservationId;
use tokio::sync::broadcast;

use crate::envelope::TripUpdateEnvelope;
use crate::update::TripUpdate;

pub const DEFAULT_UPDATE_BUFFER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripUpdateBusConfig {
    pub buffer_capacity: usize,
}

impl Default for TripUpdateBusConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_UPDATE_BUFFER_CAPACITY,
        }
    }
}

/// Broadcast bus carrying sequenced trip updates to every observer.
///
/// Publishing never blocks on subscribers; a slow subscriber falls behind
/// per tokio broadcast lag semantics instead of stalling the trip layer.
#[derive(Debug)]
pub struct TripUpdateBus {
    next_sequence: AtomicU64,
    boot_instant: Instant,
    sender: broadcast::Sender<TripUpdateEnvelope>,
}

impl Default for TripUpdateBus {
    fn default() -> Self {
        Self::new(TripUpdateBusConfig::default())
    }
}

impl TripUpdateBus {
    pub fn new(config: TripUpdateBusConfig) -> Self {
        assert!(
            config.buffer_capacity > 0,
            "buffer_capacity must be greater than 0"
        );

        let (sender, _receiver) = broadcast::channel(config.buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            boot_instant: Instant::now(),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TripUpdateEnvelope> {
        self.sender.subscribe()
    }

    pub fn publish(
        &self,
        reservation_id: Option<&ReservationId>,
        update: TripUpdate,
    ) -> TripUpdateEnvelope {
        let envelope = TripUpdateEnvelope {
            reservation_id: reservation_id.cloned(),
            sequence: self.next_sequence(),
            received_at_monotonic_nanos: self.monotonic_nanos_since_bus_bootstrap(),
            update,
        };

        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(envelope.clone());
        }

        envelope
    }

    fn next_sequence(&self) -> u64 {
        let mut current = self.next_sequence.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .expect("trip update sequence exhausted");
            match self.next_sequence.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    fn monotonic_nanos_since_bus_bootstrap(&self) -> u64 {
        let nanos = self.boot_instant.elapsed().as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}
