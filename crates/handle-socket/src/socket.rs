//! `HandleSocket`: the socket adapter.
//!
//! The socket sits between an [`IoEngine`] and a [`Consumer`]. Engine
//! results arrive as [`SocketEvent`]s in the socket's mailbox; the owner
//! drains the mailbox with [`HandleSocket::run_pending`] or
//! [`HandleSocket::run_once`] on a single thread, and every state change
//! happens there.
//!
//! Consumer callbacks may call back into the socket through
//! [`SocketControl`]. A close requested that way is only recorded; the
//! teardown runs once the callback has returned.

use crate::buffer::ByteQueue;
use crate::config::SocketConfig;
use crate::consumer::{CloseReason, Consumer, SocketControl, SocketError};
use crate::engine::{
    ChannelId, ChannelOptions, ChannelRole, EventSender, IoEngine, ReadFlow, ReadOutcome,
    SocketEvent, WriteOutcome,
};
use crate::error::{Error, Result};
use crate::flow::{FlowAction, FlowEvent, FreezeState, Transition, transition};
use crate::handles::{HandleSet, SocketHandles};
use crate::peer::{self, PeerInfo};
use crate::stderr::{LogSink, StderrLog, TracingLogSink};
use crate::threaded::ThreadedEngine;
use filedescriptor::FileDescriptor;
use std::io;
use std::time::Duration;
use tracing::{debug, trace, warn};

// =============================================================================
// Core state
// =============================================================================

/// Everything a socket owns apart from its consumer.
///
/// Split from [`HandleSocket`] so that a consumer callback can borrow the
/// state mutably while the consumer itself is borrowed for the call.
pub(crate) struct SocketCore {
    engine: Box<dyn IoEngine>,
    pub(crate) send: Option<ChannelId>,
    pub(crate) recv: Option<ChannelId>,
    pub(crate) stderr: Option<ChannelId>,
    handles: HandleSet,
    stderr_handle: Option<FileDescriptor>,
    pub(crate) flow: FreezeState,
    pending: ByteQueue,
    stderr_log: StderrLog,
    /// A consumer callback is on the stack.
    delivering: bool,
    pub(crate) close_requested: bool,
    pub(crate) closed: bool,
    closing_notified: bool,
    drain_posted: bool,
    last_error: Option<String>,
    peer_info: Option<Box<dyn PeerInfo>>,
    events: EventSender,
}

impl SocketCore {
    pub(crate) fn write(&mut self, data: &[u8]) -> usize {
        match self.send {
            Some(channel) if !self.closed => self.engine.write(channel, data),
            _ => {
                trace!(len = data.len(), "write on closed socket dropped");
                0
            }
        }
    }

    pub(crate) fn write_eof(&mut self) {
        if self.closed {
            return;
        }
        if let Some(channel) = self.send {
            self.engine.write_eof(channel);
        }
        if self.handles.release_send() {
            debug!("released send handle after eof");
        }
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        if self.closed {
            return;
        }
        let event = if frozen {
            FlowEvent::Pause
        } else {
            FlowEvent::Resume
        };
        if self.apply(event) == FlowAction::ScheduleDrain {
            self.post_drain();
        }
    }

    pub(crate) fn close(&mut self) {
        if self.delivering {
            self.close_requested = true;
        } else {
            self.teardown();
        }
    }

    pub(crate) fn peer_info(&self) -> Option<String> {
        let handle = self.handles.send()?;
        self.peer_info.as_ref()?.describe(handle)
    }

    /// Run the state machine and perform the bookkeeping part of the
    /// resulting action. Actions that need the consumer or the engine are
    /// returned to the caller.
    fn apply(&mut self, event: FlowEvent) -> FlowAction {
        let Transition { next, action } = transition(self.flow, event);
        if let FlowAction::Violation(what) = action {
            panic!("flow control violation: {what} (state {}, {event:?})", self.flow);
        }
        if next != self.flow {
            debug!(state = %self.flow, next = %next, ?event, "freeze transition");
        }
        self.flow = next;
        if action == FlowAction::AssertDrained {
            assert!(
                self.pending.is_empty(),
                "resumed from freezing with {} bytes pending",
                self.pending.len()
            );
        }
        action
    }

    fn post_drain(&mut self) {
        if self.drain_posted || self.closed {
            return;
        }
        self.drain_posted = self.events.post(SocketEvent::Drain);
    }

    fn finish_thaw(&mut self) {
        if self.apply(FlowEvent::Drained) == FlowAction::Unthrottle {
            if let Some(channel) = self.recv {
                self.engine.unthrottle(channel);
            }
        }
    }

    /// Release every resource exactly once.
    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for channel in [self.recv.take(), self.send.take(), self.stderr.take()]
            .into_iter()
            .flatten()
        {
            self.engine.free(channel);
        }
        let released =
            self.handles.release_all() + usize::from(self.stderr_handle.take().is_some());
        self.pending.clear();
        self.stderr_log.clear();
        debug!(handles = released, "handle socket torn down");
    }
}

impl Drop for SocketCore {
    fn drop(&mut self) {
        self.teardown();
    }
}

// =============================================================================
// HandleSocket
// =============================================================================

/// A byte-stream socket over blocking OS handles.
pub struct HandleSocket {
    core: SocketCore,
    consumer: Box<dyn Consumer>,
    mailbox: flume::Receiver<SocketEvent>,
}

impl HandleSocket {
    /// Start configuring a socket over `handles`.
    pub fn builder(handles: SocketHandles, consumer: Box<dyn Consumer>) -> SocketBuilder {
        SocketBuilder::new(handles, consumer)
    }

    /// Bind handles and a consumer using `engine`.
    pub fn new(
        engine: Box<dyn IoEngine>,
        handles: SocketHandles,
        stderr: Option<FileDescriptor>,
        consumer: Box<dyn Consumer>,
        overlapped: bool,
    ) -> Result<Self> {
        let mut builder = Self::builder(handles, consumer)
            .engine(engine)
            .overlapped(overlapped);
        if let Some(handle) = stderr {
            builder = builder.stderr(handle);
        }
        builder.build()
    }

    // -------------------------------------------------------------------------
    // Public surface
    // -------------------------------------------------------------------------

    /// Queue bytes for writing; returns the bytes now queued.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.core.write(data)
    }

    /// Handles have no urgent data; this is an ordinary write.
    pub fn write_oob(&mut self, data: &[u8]) -> usize {
        self.core.write(data)
    }

    pub fn write_eof(&mut self) {
        self.core.write_eof();
    }

    /// Writes complete asynchronously, so there is nothing to flush.
    pub fn flush(&mut self) {}

    pub fn set_frozen(&mut self, frozen: bool) {
        self.core.set_frozen(frozen);
    }

    /// Tear the socket down now. Further events are ignored.
    pub fn close(&mut self) {
        self.core.close();
    }

    /// The error that closed the socket, if it was closed by one.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.core.last_error.as_deref()
    }

    /// Replace the consumer, returning the previous one.
    pub fn swap_consumer(&mut self, consumer: Box<dyn Consumer>) -> Box<dyn Consumer> {
        std::mem::replace(&mut self.consumer, consumer)
    }

    #[must_use]
    pub fn peer_info(&self) -> Option<String> {
        self.core.peer_info()
    }

    #[must_use]
    pub fn freeze_state(&self) -> FreezeState {
        self.core.flow
    }

    /// Bytes held back while frozen.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.core.pending.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.closed
    }

    // -------------------------------------------------------------------------
    // Mailbox
    // -------------------------------------------------------------------------

    /// Handle one event from the mailbox.
    pub fn dispatch(&mut self, event: SocketEvent) {
        if self.core.closed {
            trace!(?event, "event after close ignored");
            return;
        }
        match event {
            SocketEvent::Read { channel, outcome } => {
                if Some(channel) == self.core.recv {
                    let flow = self.on_read(outcome);
                    if !self.core.closed {
                        self.core.engine.acknowledge(channel, flow);
                    }
                } else if Some(channel) == self.core.stderr {
                    self.on_stderr(outcome);
                    if !self.core.closed {
                        self.core.engine.acknowledge(channel, ReadFlow::Continue);
                    }
                } else {
                    trace!(%channel, "read from unknown channel ignored");
                }
            }
            SocketEvent::Written { channel, outcome } => {
                if Some(channel) == self.core.send {
                    self.on_written(outcome);
                } else {
                    trace!(%channel, "write completion from unknown channel ignored");
                }
            }
            SocketEvent::Drain => self.drain_step(),
        }
    }

    /// Handle everything queued, including drain steps queued meanwhile.
    /// Returns the number of events handled.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while !self.core.closed {
            let Ok(event) = self.mailbox.try_recv() else {
                break;
            };
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Wait for one event, up to `timeout`, and handle it.
    ///
    /// Returns `Ok(false)` on timeout and [`Error::Disconnected`] once the
    /// socket is closed.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.core.closed {
            return Err(Error::Disconnected);
        }
        let event = match timeout {
            Some(timeout) => match self.mailbox.recv_timeout(timeout) {
                Ok(event) => event,
                Err(flume::RecvTimeoutError::Timeout) => return Ok(false),
                Err(flume::RecvTimeoutError::Disconnected) => return Err(Error::Disconnected),
            },
            None => self.mailbox.recv().map_err(|_| Error::Disconnected)?,
        };
        self.dispatch(event);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Engine callbacks
    // -------------------------------------------------------------------------

    /// A read finished on the receive channel. The returned flow tells the
    /// engine whether to read again.
    pub fn on_read(&mut self, outcome: ReadOutcome) -> ReadFlow {
        if self.core.closed || self.core.closing_notified {
            return ReadFlow::Pause;
        }
        match outcome {
            ReadOutcome::Error(err) => {
                let err = SocketError::from_io("read error from handle", &err);
                self.notify_closing(CloseReason::ReadFailed(err));
                ReadFlow::Pause
            }
            ReadOutcome::Eof => {
                self.notify_closing(CloseReason::Eof);
                ReadFlow::Pause
            }
            ReadOutcome::Data(chunk) if chunk.is_empty() => {
                self.notify_closing(CloseReason::Eof);
                ReadFlow::Pause
            }
            ReadOutcome::Data(chunk) => match self.core.apply(FlowEvent::Data) {
                FlowAction::BufferAndThrottle => {
                    trace!(len = chunk.len(), "buffering chunk while freezing");
                    self.core.pending.push(chunk);
                    ReadFlow::Pause
                }
                _ => {
                    self.deliver(|consumer, socket| consumer.receive(socket, &chunk));
                    if self.core.closed {
                        ReadFlow::Pause
                    } else {
                        ReadFlow::Continue
                    }
                }
            },
        }
    }

    /// A read finished on the stderr channel. Never affects the socket.
    pub fn on_stderr(&mut self, outcome: ReadOutcome) {
        if self.core.closed {
            return;
        }
        match outcome {
            ReadOutcome::Data(chunk) => {
                self.core.stderr_log.push(&chunk);
            }
            ReadOutcome::Eof => trace!("stderr channel reached end of stream"),
            ReadOutcome::Error(err) => trace!(error = %err, "stderr channel failed"),
        }
    }

    /// A write finished on the send channel.
    pub fn on_written(&mut self, outcome: WriteOutcome) {
        if self.core.closed || self.core.closing_notified {
            return;
        }
        match outcome {
            WriteOutcome::Backlog(backlog) => {
                self.deliver(|consumer, socket| consumer.sent(socket, backlog));
            }
            WriteOutcome::Failed(err) => {
                let err = SocketError::from_io("write error to handle", &err);
                self.notify_closing(CloseReason::WriteFailed(err));
            }
        }
    }

    /// Release one buffered chunk if the socket is still thawing.
    pub fn drain_step(&mut self) {
        self.core.drain_posted = false;
        if self.core.closed {
            return;
        }
        if self.core.apply(FlowEvent::DrainStep) != FlowAction::DeliverPending {
            return;
        }
        let Some(chunk) = self.core.pending.pop_front() else {
            self.core.finish_thaw();
            return;
        };
        self.deliver(|consumer, socket| consumer.receive(socket, &chunk));
        if self.core.closed || self.core.flow != FreezeState::Thawing {
            return;
        }
        if self.core.pending.is_empty() {
            self.core.finish_thaw();
        } else {
            self.core.post_drain();
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn notify_closing(&mut self, reason: CloseReason) {
        if self.core.closing_notified {
            return;
        }
        self.core.closing_notified = true;
        if let Some(message) = reason.message() {
            self.core.last_error = Some(message.to_string());
        }
        if reason.is_error() {
            warn!(%reason, "handle socket closing");
        } else {
            debug!("handle socket reached end of stream");
        }
        self.deliver(|consumer, socket| consumer.closing(socket, reason));
    }

    /// Call into the consumer. A close requested during the call is carried
    /// out after it returns.
    fn deliver<F>(&mut self, f: F)
    where
        F: FnOnce(&mut dyn Consumer, &mut SocketControl<'_>),
    {
        let Self { core, consumer, .. } = self;
        core.delivering = true;
        {
            let mut control = SocketControl::new(core);
            f(consumer.as_mut(), &mut control);
        }
        core.delivering = false;
        if core.close_requested {
            core.teardown();
        }
    }
}

impl std::fmt::Debug for HandleSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleSocket")
            .field("recv", &self.core.recv)
            .field("send", &self.core.send)
            .field("stderr", &self.core.stderr)
            .field("flow", &self.core.flow)
            .field("pending", &self.core.pending.len())
            .field("closed", &self.core.closed)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configures and opens a [`HandleSocket`].
pub struct SocketBuilder {
    handles: SocketHandles,
    consumer: Box<dyn Consumer>,
    stderr: Option<FileDescriptor>,
    config: SocketConfig,
    log_sink: Option<Box<dyn LogSink>>,
    peer_info: Option<Box<dyn PeerInfo>>,
    engine: Option<Box<dyn IoEngine>>,
}

impl SocketBuilder {
    fn new(handles: SocketHandles, consumer: Box<dyn Consumer>) -> Self {
        Self {
            handles,
            consumer,
            stderr: None,
            config: SocketConfig::default(),
            log_sink: None,
            peer_info: peer::default_provider(),
            engine: None,
        }
    }

    /// Also read diagnostics from `handle` and pass them to the log sink.
    #[must_use]
    pub fn stderr(mut self, handle: FileDescriptor) -> Self {
        self.stderr = Some(handle);
        self
    }

    #[must_use]
    pub fn overlapped(mut self, overlapped: bool) -> Self {
        self.config.overlapped = overlapped;
        self
    }

    #[must_use]
    pub fn config(mut self, config: &SocketConfig) -> Self {
        self.config = config.clone();
        self
    }

    #[must_use]
    pub fn log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.log_sink = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn peer_info(mut self, provider: impl PeerInfo + 'static) -> Self {
        self.peer_info = Some(Box::new(provider));
        self
    }

    #[must_use]
    pub fn without_peer_info(mut self) -> Self {
        self.peer_info = None;
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: Box<dyn IoEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Open the engine channels (receive, send, then stderr).
    pub fn build(self) -> Result<HandleSocket> {
        let (tx, mailbox) = flume::unbounded();
        let events = EventSender::new(tx);
        let mut engine = self
            .engine
            .unwrap_or_else(|| Box::new(ThreadedEngine::new()));
        let handles = HandleSet::from(self.handles);
        let options = self.config.channel_options();

        let (recv, send, stderr) = open_channels(
            engine.as_mut(),
            &handles,
            self.stderr.as_ref(),
            &options,
            &events,
        )?;
        debug!(%recv, %send, ?stderr, overlapped = options.overlapped, "handle socket created");

        let sink = self
            .log_sink
            .unwrap_or_else(|| Box::new(TracingLogSink));
        let core = SocketCore {
            engine,
            send: Some(send),
            recv: Some(recv),
            stderr,
            handles,
            stderr_handle: self.stderr,
            flow: FreezeState::Unfrozen,
            pending: ByteQueue::new(),
            stderr_log: StderrLog::new(self.config.stderr_line_limit, sink),
            delivering: false,
            close_requested: false,
            closed: false,
            closing_notified: false,
            drain_posted: false,
            last_error: None,
            peer_info: self.peer_info,
            events,
        };
        Ok(HandleSocket {
            core,
            consumer: self.consumer,
            mailbox,
        })
    }
}

fn open_channels(
    engine: &mut dyn IoEngine,
    handles: &HandleSet,
    stderr: Option<&FileDescriptor>,
    options: &ChannelOptions,
    events: &EventSender,
) -> Result<(ChannelId, ChannelId, Option<ChannelId>)> {
    let missing = |what: &str| io::Error::new(io::ErrorKind::NotFound, format!("no {what} handle"));

    let recv = handles
        .recv()
        .ok_or_else(|| missing("receive"))
        .and_then(|h| engine.open_input(h, ChannelRole::Receive, options, events.clone()))
        .map_err(|source| Error::ChannelOpen {
            role: ChannelRole::Receive,
            source,
        })?;

    let send = match handles
        .send()
        .ok_or_else(|| missing("send"))
        .and_then(|h| engine.open_output(h, options, events.clone()))
    {
        Ok(channel) => channel,
        Err(source) => {
            engine.free(recv);
            return Err(Error::ChannelOpen {
                role: ChannelRole::Send,
                source,
            });
        }
    };

    let stderr = match stderr {
        None => None,
        Some(handle) => {
            match engine.open_input(handle, ChannelRole::Stderr, options, events.clone()) {
                Ok(channel) => Some(channel),
                Err(source) => {
                    engine.free(recv);
                    engine.free(send);
                    return Err(Error::ChannelOpen {
                        role: ChannelRole::Stderr,
                        source,
                    });
                }
            }
        }
    };

    Ok((recv, send, stderr))
}
