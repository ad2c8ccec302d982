//! Trip update publish/fanout APIs.

pub mod bus;
pub mod envelope;
pub mod update;

pub use bus::{TripUpdateBus, TripUpdateBusConfig, DEFAULT_UPDATE_BUFFER_CAPACITY};
pub use envelope::TripUpdateEnvelope;
pub use update::TripUpdate;
