//! Push channel over the gateway's streaming HTTP endpoint.
//!
//! Downstream frames arrive as newline-delimited JSON on a long-lived GET
//! response body; upstream frames are posted back to the same path.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use ridelink_protocol::api::{
    BoxedChannelLink, ChannelConnector, ChannelIdentity, ChannelLink, ChannelRole,
};
use ridelink_protocol::error::{ChannelError, ChannelResult};
use ridelink_protocol::event::ChannelFrame;
use tracing::debug;

use crate::GatewayConfig;

pub struct HttpChannelConnector {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpChannelConnector {
    /// The client deliberately carries no request timeout: reqwest's timeout
    /// spans the whole body read and would sever the long-lived stream.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelConnector for HttpChannelConnector {
    async fn connect(&self, identity: &ChannelIdentity) -> ChannelResult<BoxedChannelLink> {
        let events_url = format!("{}/v1/events", self.config.trimmed_base_url());
        let response = self
            .client
            .get(events_url.as_str())
            .query(&[
                ("ownerId", identity.owner_id.as_str()),
                ("role", role_query_value(identity.role)),
                ("displayName", identity.display_name.as_str()),
            ])
            .send()
            .await
            .map_err(|error| {
                ChannelError::Connect(format!("event stream request failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Connect(format!(
                "event stream refused with status {status}"
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map(|bytes| bytes.to_vec()).map_err(|error| {
                    ChannelError::Transport(format!("event stream read failed: {error}"))
                })
            })
            .fuse()
            .boxed();

        Ok(Box::new(HttpChannelLink {
            client: self.client.clone(),
            emit_url: events_url,
            owner_id: identity.owner_id.as_str().to_owned(),
            stream,
            line_buffer: Vec::new(),
            decoded: VecDeque::new(),
        }))
    }
}

fn role_query_value(role: ChannelRole) -> &'static str {
    match role {
        ChannelRole::Passenger => "passenger",
        ChannelRole::Driver => "driver",
    }
}

struct HttpChannelLink {
    client: reqwest::Client,
    emit_url: String,
    owner_id: String,
    stream: BoxStream<'static, ChannelResult<Vec<u8>>>,
    line_buffer: Vec<u8>,
    decoded: VecDeque<ChannelFrame>,
}

#[async_trait]
impl ChannelLink for HttpChannelLink {
    async fn send(&mut self, frame: &ChannelFrame) -> ChannelResult<()> {
        let response = self
            .client
            .post(self.emit_url.as_str())
            .query(&[("ownerId", self.owner_id.as_str())])
            .json(frame)
            .send()
            .await
            .map_err(|error| ChannelError::Transport(format!("frame post failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Transport(format!(
                "frame post refused with status {status}"
            )));
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> ChannelResult<Option<ChannelFrame>> {
        loop {
            if let Some(frame) = self.decoded.pop_front() {
                return Ok(Some(frame));
            }

            match self.stream.next().await {
                Some(chunk) => {
                    self.line_buffer.extend_from_slice(&chunk?);
                    drain_complete_lines(&mut self.line_buffer, &mut self.decoded);
                }
                None => {
                    let trailing = std::mem::take(&mut self.line_buffer);
                    return Ok(decode_frame_line(&trailing));
                }
            }
        }
    }
}

fn drain_complete_lines(buffer: &mut Vec<u8>, decoded: &mut VecDeque<ChannelFrame>) {
    while let Some(newline_at) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=newline_at).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if let Some(frame) = decode_frame_line(&line) {
            decoded.push_back(frame);
        }
    }
}

fn decode_frame_line(line: &[u8]) -> Option<ChannelFrame> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(frame) => Some(frame),
        Err(error) => {
            debug!(error = %error, "skipping undecodable event stream line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridelink_protocol::event::{EVENT_DRIVER_ARRIVED, EVENT_TRIP_STARTED};

    #[test]
    fn decode_frame_line_parses_a_json_frame() {
        let frame = decode_frame_line(br#"{"event":"arrived","payload":{"reservationId":"R-4"}}"#)
            .expect("decode frame");
        assert_eq!(frame.event, EVENT_DRIVER_ARRIVED);
        assert_eq!(frame.payload["reservationId"], "R-4");
    }

    #[test]
    fn decode_frame_line_skips_blank_and_malformed_lines() {
        assert!(decode_frame_line(b"").is_none());
        assert!(decode_frame_line(b"   ").is_none());
        assert!(decode_frame_line(b"not json at all").is_none());
        assert!(decode_frame_line(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn drain_complete_lines_handles_split_chunks_and_crlf() {
        let mut buffer = Vec::new();
        let mut decoded = VecDeque::new();

        buffer.extend_from_slice(br#"{"event":"arrived","payload""#);
        drain_complete_lines(&mut buffer, &mut decoded);
        assert!(decoded.is_empty());
        assert!(!buffer.is_empty());

        buffer.extend_from_slice(b":{\"reservationId\":\"R-4\"}}\r\n");
        buffer.extend_from_slice(b"{\"event\":\"started\",\"payload\":{\"reservationId\":\"R-4\"}}\n");
        drain_complete_lines(&mut buffer, &mut decoded);

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].event, EVENT_DRIVER_ARRIVED);
        assert_eq!(decoded[1].event, EVENT_TRIP_STARTED);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_complete_lines_drops_keepalive_blank_lines() {
        let mut buffer = b"\n\n{\"event\":\"arrived\",\"payload\":{}}\n\n".to_vec();
        let mut decoded = VecDeque::new();

        drain_complete_lines(&mut buffer, &mut decoded);

        assert_eq!(decoded.len(), 1);
        assert!(buffer.is_empty());
    }
}
