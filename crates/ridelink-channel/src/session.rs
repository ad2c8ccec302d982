//! Long-lived push channel session.
//!
//! One worker task owns the transport link. The public handle queues
//! outbound frames, registers inbound handlers, and watches connection
//! status; none of those survive on the transport itself, so the worker
//! re-establishes everything a reconnect needs: identity handshake first,
//! then the queued frames in the order they were emitted. Handlers live in
//! a registry outside the link and are never re-registered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ridelink_protocol::api::{BoxedChannelLink, ChannelIdentity, SharedChannelConnector};
use ridelink_protocol::error::ChannelResult;
use ridelink_protocol::event::{encode_identify_frame, ChannelFrame};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::retry::RetryPolicy;

/// Where the session currently stands with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSessionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; the session will not reconnect.
    Failed,
    Closed,
}

/// Token returned by [`ChannelSession::on`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type FrameHandler = Arc<dyn Fn(&ChannelFrame) + Send + Sync>;

struct HandlerRegistry {
    entries: RwLock<HashMap<String, Vec<(HandlerId, FrameHandler)>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, kind: &str, handler: FrameHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .expect("channel handler registry lock poisoned")
            .entry(kind.to_owned())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, kind: &str, id: HandlerId) -> bool {
        let mut entries = self
            .entries
            .write()
            .expect("channel handler registry lock poisoned");
        let Some(list) = entries.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        let removed = list.len() != before;
        if list.is_empty() {
            entries.remove(kind);
        }
        removed
    }

    fn handlers_for(&self, kind: &str) -> Vec<FrameHandler> {
        self.entries
            .read()
            .expect("channel handler registry lock poisoned")
            .get(kind)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default()
    }
}

enum SessionCommand {
    Emit(ChannelFrame),
    Close,
}

/// Cloneable handle to the session worker.
#[derive(Clone)]
pub struct ChannelSession {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    status_rx: watch::Receiver<ChannelSessionStatus>,
    registry: Arc<HandlerRegistry>,
}

impl ChannelSession {
    /// Spawns the session worker and starts connecting immediately.
    pub fn connect(
        connector: SharedChannelConnector,
        identity: ChannelIdentity,
        retry: RetryPolicy,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelSessionStatus::Connecting);
        let registry = Arc::new(HandlerRegistry::new());

        let worker = SessionWorker {
            connector,
            identity,
            retry,
            registry: registry.clone(),
            command_rx,
            status_tx,
            pending: VecDeque::new(),
        };
        tokio::spawn(worker.run());

        Self {
            command_tx,
            status_rx,
            registry,
        }
    }

    /// Registers a handler for one inbound frame kind. Handlers belong to
    /// the session, not the connection, and keep firing across reconnects
    /// until removed.
    pub fn on(
        &self,
        kind: &str,
        handler: impl Fn(&ChannelFrame) + Send + Sync + 'static,
    ) -> HandlerId {
        self.registry.register(kind, Arc::new(handler))
    }

    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        self.registry.remove(kind, id)
    }

    /// Queues a frame for delivery. Sent immediately when connected,
    /// otherwise held in arrival order and flushed after the handshake on
    /// the next successful connect.
    pub fn emit(&self, frame: ChannelFrame) {
        if self.command_tx.send(SessionCommand::Emit(frame)).is_err() {
            debug!("channel session worker is gone, dropping emitted frame");
        }
    }

    /// Stops the session. No reconnect follows a close.
    pub fn close(&self) {
        let _ = self.command_tx.send(SessionCommand::Close);
    }

    pub fn status(&self) -> ChannelSessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn status_stream(&self) -> watch::Receiver<ChannelSessionStatus> {
        self.status_rx.clone()
    }
}

enum PumpExit {
    Closed,
    Disconnected,
}

enum BackoffWait {
    Elapsed,
    Closed,
}

struct SessionWorker {
    connector: SharedChannelConnector,
    identity: ChannelIdentity,
    retry: RetryPolicy,
    registry: Arc<HandlerRegistry>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    status_tx: watch::Sender<ChannelSessionStatus>,
    pending: VecDeque<ChannelFrame>,
}

impl SessionWorker {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                self.set_status(ChannelSessionStatus::Reconnecting { attempt });
                let delay = self.retry.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "channel backing off");
                if let BackoffWait::Closed = self.wait_backoff(delay).await {
                    self.finish_closed();
                    return;
                }
            }

            let mut link = match self.connector.connect(&self.identity).await {
                Ok(link) => link,
                Err(error) => {
                    warn!(error = %error, attempt, "channel connect failed");
                    if self.next_attempt(&mut attempt) {
                        continue;
                    }
                    return;
                }
            };

            if let Err(error) = self.establish(&mut link).await {
                warn!(error = %error, "channel setup failed after connect");
                if self.next_attempt(&mut attempt) {
                    continue;
                }
                return;
            }

            attempt = 0;
            self.set_status(ChannelSessionStatus::Connected);
            info!(owner = self.identity.owner_id.as_str(), "channel connected");

            match self.pump(&mut link).await {
                PumpExit::Closed => {
                    self.finish_closed();
                    return;
                }
                PumpExit::Disconnected => {
                    if self.next_attempt(&mut attempt) {
                        continue;
                    }
                    return;
                }
            }
        }
    }

    /// Identity handshake, then the queued backlog in FIFO order. A frame
    /// stays queued until the link accepts it.
    async fn establish(&mut self, link: &mut BoxedChannelLink) -> ChannelResult<()> {
        link.send(&encode_identify_frame(&self.identity)).await?;
        while let Some(frame) = self.pending.front() {
            link.send(frame).await?;
            self.pending.pop_front();
        }
        Ok(())
    }

    async fn pump(&mut self, link: &mut BoxedChannelLink) -> PumpExit {
        enum Step {
            Command(Option<SessionCommand>),
            Inbound(ChannelResult<Option<ChannelFrame>>),
        }

        loop {
            let step = tokio::select! {
                command = self.command_rx.recv() => Step::Command(command),
                inbound = link.next_frame() => Step::Inbound(inbound),
            };

            match step {
                Step::Command(Some(SessionCommand::Emit(frame))) => {
                    if let Err(error) = link.send(&frame).await {
                        warn!(error = %error, "channel send failed, requeueing frame");
                        self.pending.push_back(frame);
                        return PumpExit::Disconnected;
                    }
                }
                Step::Command(Some(SessionCommand::Close)) | Step::Command(None) => {
                    return PumpExit::Closed;
                }
                Step::Inbound(Ok(Some(frame))) => self.dispatch(&frame),
                Step::Inbound(Ok(None)) => {
                    warn!("channel stream ended");
                    return PumpExit::Disconnected;
                }
                Step::Inbound(Err(error)) => {
                    warn!(error = %error, "channel transport error");
                    return PumpExit::Disconnected;
                }
            }
        }
    }

    fn dispatch(&self, frame: &ChannelFrame) {
        let handlers = self.registry.handlers_for(&frame.event);
        if handlers.is_empty() {
            trace!(kind = %frame.event, "no handlers for inbound frame");
            return;
        }
        trace!(kind = %frame.event, handlers = handlers.len(), "dispatching inbound frame");
        for handler in handlers {
            handler(frame);
        }
    }

    /// Sleeps out the backoff while still accepting commands, so emits made
    /// during the outage keep their order and a close is honored promptly.
    async fn wait_backoff(&mut self, delay: Duration) -> BackoffWait {
        let deadline = Instant::now() + delay;
        loop {
            let command = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return BackoffWait::Elapsed,
                command = self.command_rx.recv() => command,
            };
            match command {
                Some(SessionCommand::Emit(frame)) => self.pending.push_back(frame),
                Some(SessionCommand::Close) | None => return BackoffWait::Closed,
            }
        }
    }

    fn next_attempt(&mut self, attempt: &mut u32) -> bool {
        if !self.retry.should_retry(*attempt) {
            warn!(attempts = *attempt, "channel retry budget exhausted");
            self.set_status(ChannelSessionStatus::Failed);
            return false;
        }
        *attempt += 1;
        true
    }

    fn finish_closed(&self) {
        self.set_status(ChannelSessionStatus::Closed);
        info!("channel session closed");
    }

    fn set_status(&self, status: ChannelSessionStatus) {
        let _ = self.status_tx.send(status);
    }
}
