//! Shared fixtures for handle-socket integration tests.
#![allow(dead_code)]

use handle_socket::{
    ChannelId, ChannelOptions, ChannelRole, CloseReason, Consumer, EventSender, FileDescriptor,
    HandleSocket, IoEngine, ReadFlow, ReadOutcome, SocketControl, SocketEvent, SocketHandles,
};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const RECV: ChannelId = ChannelId(0);
pub const SEND: ChannelId = ChannelId(1);

// ────────────────────────────────────────────────────────────────────
// Model engine
// ────────────────────────────────────────────────────────────────────

/// What a well-behaved engine would be allowed to do next.
#[derive(Debug, Default)]
pub struct ModelState {
    next: u64,
    /// A read was posted and the socket has not answered yet.
    pub awaiting_ack: bool,
    /// The socket answered `Pause` and has not unthrottled since.
    pub throttled: bool,
    pub unthrottles: usize,
    pub queued: usize,
    pub freed: Vec<ChannelId>,
}

impl ModelState {
    pub fn can_read(&self) -> bool {
        !self.awaiting_ack && !self.throttled
    }
}

/// An engine with no threads; tests post reads themselves.
pub struct ModelEngine(pub Rc<RefCell<ModelState>>);

impl ModelEngine {
    fn open(&mut self) -> ChannelId {
        let mut state = self.0.borrow_mut();
        let id = ChannelId(state.next);
        state.next += 1;
        id
    }
}

impl IoEngine for ModelEngine {
    fn open_input(
        &mut self,
        _handle: &FileDescriptor,
        _role: ChannelRole,
        _options: &ChannelOptions,
        _events: EventSender,
    ) -> io::Result<ChannelId> {
        Ok(self.open())
    }

    fn open_output(
        &mut self,
        _handle: &FileDescriptor,
        _options: &ChannelOptions,
        _events: EventSender,
    ) -> io::Result<ChannelId> {
        Ok(self.open())
    }

    fn write(&mut self, _channel: ChannelId, data: &[u8]) -> usize {
        let mut state = self.0.borrow_mut();
        state.queued += data.len();
        state.queued
    }

    fn write_eof(&mut self, _channel: ChannelId) {}

    fn acknowledge(&mut self, channel: ChannelId, flow: ReadFlow) {
        if channel == RECV {
            let mut state = self.0.borrow_mut();
            state.awaiting_ack = false;
            state.throttled = flow == ReadFlow::Pause;
        }
    }

    fn unthrottle(&mut self, _channel: ChannelId) {
        let mut state = self.0.borrow_mut();
        state.throttled = false;
        state.unthrottles += 1;
    }

    fn free(&mut self, channel: ChannelId) {
        self.0.borrow_mut().freed.push(channel);
    }
}

/// Deliver `chunk` as the next read on the receive channel.
pub fn arrive(socket: &mut HandleSocket, model: &Rc<RefCell<ModelState>>, chunk: &[u8]) {
    assert!(model.borrow().can_read(), "model engine would not read now");
    model.borrow_mut().awaiting_ack = true;
    socket.dispatch(SocketEvent::Read {
        channel: RECV,
        outcome: ReadOutcome::Data(chunk.to_vec()),
    });
}

// ────────────────────────────────────────────────────────────────────
// Recording consumer
// ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Seen {
    pub chunks: Vec<Vec<u8>>,
    pub bytes: Vec<u8>,
    pub sent: Vec<usize>,
    pub closing: Vec<CloseReason>,
    pub close_on_closing: bool,
}

pub struct Recorder(pub Rc<RefCell<Seen>>);

impl Consumer for Recorder {
    fn receive(&mut self, _socket: &mut SocketControl<'_>, data: &[u8]) {
        let mut seen = self.0.borrow_mut();
        seen.chunks.push(data.to_vec());
        seen.bytes.extend_from_slice(data);
    }

    fn sent(&mut self, _socket: &mut SocketControl<'_>, backlog: usize) {
        self.0.borrow_mut().sent.push(backlog);
    }

    fn closing(&mut self, socket: &mut SocketControl<'_>, reason: CloseReason) {
        let mut seen = self.0.borrow_mut();
        seen.closing.push(reason);
        if seen.close_on_closing {
            socket.close();
        }
    }
}

/// A socket on throwaway pipes driven by a [`ModelEngine`].
pub fn model_socket() -> (HandleSocket, Rc<RefCell<ModelState>>, Rc<RefCell<Seen>>) {
    let model = Rc::new(RefCell::new(ModelState::default()));
    let seen = Rc::new(RefCell::new(Seen::default()));
    let a = filedescriptor::Pipe::new().expect("pipe");
    let b = filedescriptor::Pipe::new().expect("pipe");
    let socket = HandleSocket::builder(
        SocketHandles::split(a.write, b.read),
        Box::new(Recorder(Rc::clone(&seen))),
    )
    .engine(Box::new(ModelEngine(Rc::clone(&model))))
    .without_peer_info()
    .build()
    .expect("build socket");
    (socket, model, seen)
}

// ────────────────────────────────────────────────────────────────────
// Driving real engines
// ────────────────────────────────────────────────────────────────────

pub const DEADLINE: Duration = Duration::from_secs(10);

/// Run the socket's mailbox until `done` holds. Panics after [`DEADLINE`].
pub fn pump_until(socket: &mut HandleSocket, mut done: impl FnMut(&HandleSocket) -> bool) {
    let start = Instant::now();
    while !done(socket) {
        assert!(start.elapsed() < DEADLINE, "timed out waiting: {socket:?}");
        if socket.is_closed() {
            assert!(done(socket), "socket closed before condition held");
            return;
        }
        let _ = socket.run_once(Some(Duration::from_millis(20)));
    }
}
