//! Trip lifecycle state and coordination.
//!
//! The crate merges two inputs that never agree on timing: the synchronous
//! trip creation call and the push channel's lifecycle events. Both land in
//! [`coordinator::TripCoordinator`], which reconciles them against a single
//! state machine and republishes the outcome on the update bus.

pub mod cancellation;
pub mod coordinator;
pub mod error;
pub mod state;
pub mod transitions;

mod reconciler;
mod timers;

pub use cancellation::NO_DRIVER_AVAILABLE_REASON;
pub use coordinator::{
    TripCoordinator, TripFlowSettings, DEFAULT_ARRIVAL_AUTO_START, DEFAULT_SEARCH_TIMEOUT,
};
pub use error::{TripFlowError, TripFlowResult};
pub use state::{DriverAssignment, StatusChange, TripSnapshot, TripStateMachine};
pub use transitions::{TripTransitionError, TripTransitionResult, TripTrigger};
