use ridelink_protocol::error::DispatchApiError;
use thiserror::Error;

use crate::transitions::TripTransitionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TripFlowError {
    #[error("trip flow already has an active trip")]
    TripAlreadyActive,
    #[error("trip flow has no active trip")]
    NoActiveTrip,
    #[error("trip flow request was superseded by a cancellation")]
    RequestSuperseded,
    #[error("trip flow dispatch call failed: {0}")]
    Dispatch(#[from] DispatchApiError),
    #[error("trip flow transition rejected: {0}")]
    Transition(#[from] TripTransitionError),
}

pub type TripFlowResult<T> = Result<T, TripFlowError>;
