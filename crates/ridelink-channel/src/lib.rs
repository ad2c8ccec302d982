//! Push channel client: session lifecycle, reconnect policy, and frame
//! handler registry.

pub mod retry;
pub mod session;

pub use retry::RetryPolicy;
pub use session::{ChannelSession, ChannelSessionStatus, HandlerId};
