//! Shared trip lifecycle protocol.
//!
//! Identifier newtypes, the normalized lifecycle event union, the dispatch
//! and channel API contracts, and the error taxonomy shared by every crate
//! in the workspace.

pub mod api;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::api::{BoxedChannelLink, ChannelLink};
    use crate::error::ChannelResult;
    use crate::event::ChannelFrame;
    use crate::ids::PassengerId;

    struct SilentChannelLink;

    #[async_trait]
    impl ChannelLink for SilentChannelLink {
        async fn send(&mut self, _frame: &ChannelFrame) -> ChannelResult<()> {
            Ok(())
        }

        async fn next_frame(&mut self) -> ChannelResult<Option<ChannelFrame>> {
            Ok(None)
        }
    }

    #[test]
    fn passenger_id_round_trips_as_json_string() {
        let passenger = PassengerId::new("p-204");
        let serialized = serde_json::to_string(&passenger).expect("serialize passenger id");
        let deserialized: PassengerId =
            serde_json::from_str(&serialized).expect("deserialize passenger id");

        assert_eq!(serialized, "\"p-204\"");
        assert_eq!(deserialized, passenger);
    }

    #[test]
    fn channel_link_alias_accepts_trait_objects() {
        let _link: BoxedChannelLink = Box::new(SilentChannelLink);
    }
}
