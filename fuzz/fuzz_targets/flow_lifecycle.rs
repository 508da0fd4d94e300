#![no_main]

//! Drives a socket through arbitrary interleavings of arrivals, freezes,
//! drains, writes and close requests against an engine that keeps at most
//! one read outstanding. Delivered bytes must always be a prefix of the
//! bytes that arrived, and teardown must free each channel once.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use handle_socket::{
    ChannelId, ChannelOptions, ChannelRole, CloseReason, Consumer, EventSender, FileDescriptor,
    HandleSocket, IoEngine, ReadFlow, ReadOutcome, SocketControl, SocketEvent, SocketHandles,
    WriteOutcome,
};
use libfuzzer_sys::fuzz_target;

const RECV: ChannelId = ChannelId(0);
const SEND: ChannelId = ChannelId(1);

#[derive(Default)]
struct Model {
    next: u64,
    awaiting_ack: bool,
    throttled: bool,
    freed: Vec<ChannelId>,
}

struct Engine(Rc<RefCell<Model>>);

impl Engine {
    fn open(&self) -> ChannelId {
        let mut m = self.0.borrow_mut();
        m.next += 1;
        ChannelId(m.next - 1)
    }
}

impl IoEngine for Engine {
    fn open_input(
        &mut self,
        _: &FileDescriptor,
        _: ChannelRole,
        _: &ChannelOptions,
        _: EventSender,
    ) -> io::Result<ChannelId> {
        Ok(self.open())
    }

    fn open_output(
        &mut self,
        _: &FileDescriptor,
        _: &ChannelOptions,
        _: EventSender,
    ) -> io::Result<ChannelId> {
        Ok(self.open())
    }

    fn write(&mut self, _: ChannelId, data: &[u8]) -> usize {
        data.len()
    }

    fn write_eof(&mut self, _: ChannelId) {}

    fn acknowledge(&mut self, channel: ChannelId, flow: ReadFlow) {
        if channel == RECV {
            let mut m = self.0.borrow_mut();
            m.awaiting_ack = false;
            m.throttled = flow == ReadFlow::Pause;
        }
    }

    fn unthrottle(&mut self, _: ChannelId) {
        self.0.borrow_mut().throttled = false;
    }

    fn free(&mut self, channel: ChannelId) {
        self.0.borrow_mut().freed.push(channel);
    }
}

#[derive(Default)]
struct Seen {
    bytes: Vec<u8>,
    closings: usize,
    close_next: bool,
    freeze_next: bool,
}

struct Sink(Rc<RefCell<Seen>>);

impl Consumer for Sink {
    fn receive(&mut self, socket: &mut SocketControl<'_>, data: &[u8]) {
        let mut seen = self.0.borrow_mut();
        seen.bytes.extend_from_slice(data);
        if std::mem::take(&mut seen.freeze_next) {
            socket.set_frozen(true);
        }
        if std::mem::take(&mut seen.close_next) {
            socket.close();
        }
    }

    fn closing(&mut self, socket: &mut SocketControl<'_>, _: CloseReason) {
        let mut seen = self.0.borrow_mut();
        seen.closings += 1;
        if std::mem::take(&mut seen.close_next) {
            socket.close();
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(a) = filedescriptor::Pipe::new() else {
        return;
    };
    let Ok(b) = filedescriptor::Pipe::new() else {
        return;
    };
    let model = Rc::new(RefCell::new(Model::default()));
    let seen = Rc::new(RefCell::new(Seen::default()));
    let Ok(mut socket) = HandleSocket::builder(
        SocketHandles::split(a.write, b.read),
        Box::new(Sink(Rc::clone(&seen))),
    )
    .engine(Box::new(Engine(Rc::clone(&model))))
    .without_peer_info()
    .build() else {
        return;
    };

    let mut arrived = Vec::new();
    for op in data.chunks(2) {
        let arg = op.get(1).copied().unwrap_or(0);
        match op[0] % 9 {
            0 | 1 => {
                let readable = {
                    let m = model.borrow();
                    !m.awaiting_ack && !m.throttled
                };
                if readable && !socket.is_closed() {
                    let chunk = vec![arg; usize::from(arg % 7) + 1];
                    arrived.extend_from_slice(&chunk);
                    model.borrow_mut().awaiting_ack = true;
                    socket.dispatch(SocketEvent::Read {
                        channel: RECV,
                        outcome: ReadOutcome::Data(chunk),
                    });
                }
            }
            2 => socket.set_frozen(true),
            3 => socket.set_frozen(false),
            4 => {
                socket.run_pending();
            }
            5 => seen.borrow_mut().freeze_next = true,
            6 => seen.borrow_mut().close_next = true,
            7 => {
                socket.write(op);
                socket.dispatch(SocketEvent::Written {
                    channel: SEND,
                    outcome: WriteOutcome::Backlog(usize::from(arg)),
                });
            }
            _ => {
                let outcome = if arg % 2 == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Error(io::Error::from_raw_os_error(i32::from(arg)))
                };
                socket.dispatch(SocketEvent::Read {
                    channel: RECV,
                    outcome,
                });
            }
        }
        assert!(arrived.starts_with(&seen.borrow().bytes));
        assert!(seen.borrow().closings <= 1);
    }

    if !socket.is_closed() {
        socket.set_frozen(false);
        while socket.run_pending() > 0 {}
        if seen.borrow().closings == 0 && !socket.is_closed() {
            assert_eq!(seen.borrow().bytes, arrived);
        }
    }
    drop(socket);

    let mut freed = model.borrow().freed.clone();
    freed.sort();
    freed.dedup();
    assert_eq!(freed.len(), model.borrow().freed.len());
});
