//! The default engine: one blocking worker thread per channel.
//!
//! Input workers read, post the result, then wait for a permit before the
//! next read. The socket grants a permit by acknowledging with
//! [`ReadFlow::Continue`] or by unthrottling, so there is never more than
//! one read outstanding per channel.
//!
//! Output workers drain a queue of chunks and post the remaining backlog
//! after each one.
//!
//! Every worker owns a duplicate of its handle. On unix it waits for
//! readiness together with a per-channel wake pipe; [`IoEngine::free`]
//! hangs that pipe up, so a worker stuck on a silent or stalled peer exits
//! and closes its duplicate promptly.

use crate::engine::{
    ChannelId, ChannelOptions, ChannelRole, EventSender, IoEngine, ReadFlow, ReadOutcome,
    SocketEvent, WriteOutcome,
};
use filedescriptor::FileDescriptor;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

enum OutputCommand {
    Data(Vec<u8>),
    Eof,
}

enum Channel {
    Input {
        permits: flume::Sender<()>,
        throttled: bool,
        _wake: WakeGuard,
    },
    Output {
        queue: flume::Sender<OutputCommand>,
        backlog: Arc<AtomicUsize>,
        /// `write_eof` was queued; later writes are dropped.
        shut: bool,
        _wake: WakeGuard,
    },
}

/// Thread-per-channel [`IoEngine`].
#[derive(Default)]
pub struct ThreadedEngine {
    next_id: u64,
    channels: HashMap<ChannelId, Channel>,
}

impl ThreadedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels not yet freed.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn allocate(&mut self) -> ChannelId {
        let id = ChannelId(self.next_id);
        self.next_id += 1;
        id
    }
}

fn worker_handle(handle: &FileDescriptor) -> io::Result<FileDescriptor> {
    handle.try_clone().map_err(io::Error::other)
}

/// Output workers poll for writability before every write.
#[cfg(unix)]
fn non_blocking(mut handle: FileDescriptor) -> FileDescriptor {
    if let Err(err) = handle.set_non_blocking(true) {
        trace!(error = %err, "output handle stays blocking");
    }
    handle
}

// =============================================================================
// Wake pipe
// =============================================================================

/// Engine side of a channel's wake pipe. Dropping it releases the worker.
struct WakeGuard {
    #[cfg(unix)]
    _hangup: FileDescriptor,
}

/// Worker side of a channel's wake pipe.
struct WakeSignal {
    #[cfg(unix)]
    freed: FileDescriptor,
}

#[derive(Clone, Copy)]
enum Readiness {
    Read,
    Write,
}

#[cfg(unix)]
fn wake_pipe() -> io::Result<(WakeGuard, WakeSignal)> {
    let pipe = filedescriptor::Pipe::new().map_err(io::Error::other)?;
    Ok((
        WakeGuard {
            _hangup: pipe.write,
        },
        WakeSignal { freed: pipe.read },
    ))
}

#[cfg(not(unix))]
fn wake_pipe() -> io::Result<(WakeGuard, WakeSignal)> {
    Ok((WakeGuard {}, WakeSignal {}))
}

impl WakeSignal {
    /// Block until `handle` is ready. Returns `false` once the channel has
    /// been freed.
    #[cfg(unix)]
    fn wait(&self, handle: &FileDescriptor, readiness: Readiness) -> bool {
        use filedescriptor::{AsRawFileDescriptor, POLLIN, POLLOUT, pollfd};

        let events = match readiness {
            Readiness::Read => POLLIN,
            Readiness::Write => POLLOUT,
        };
        let mut pfd = [
            pollfd {
                fd: handle.as_raw_file_descriptor(),
                events,
                revents: 0,
            },
            pollfd {
                fd: self.freed.as_raw_file_descriptor(),
                events: POLLIN,
                revents: 0,
            },
        ];
        match filedescriptor::poll(&mut pfd, None) {
            Ok(_) => pfd[1].revents == 0,
            Err(err) => {
                trace!(error = %err, "poll failed; using blocking io");
                true
            }
        }
    }

    /// Handles other than sockets cannot be polled here; workers block.
    #[cfg(not(unix))]
    fn wait(&self, _handle: &FileDescriptor, _readiness: Readiness) -> bool {
        true
    }
}

// =============================================================================
// IoEngine
// =============================================================================

impl IoEngine for ThreadedEngine {
    fn open_input(
        &mut self,
        handle: &FileDescriptor,
        role: ChannelRole,
        options: &ChannelOptions,
        events: EventSender,
    ) -> io::Result<ChannelId> {
        let worker = worker_handle(handle)?;
        let (wake, signal) = wake_pipe()?;
        let id = self.allocate();
        let (permits, permit_rx) = flume::bounded(1);
        let chunk = options.read_chunk_size.max(1);
        if options.overlapped {
            debug!(channel = %id, "overlapped handle read with a blocking worker");
        }
        std::thread::Builder::new()
            .name(format!("hsock-{role}-{}", id.0))
            .spawn(move || input_worker(id, worker, chunk, &events, &permit_rx, &signal))?;
        self.channels.insert(
            id,
            Channel::Input {
                permits,
                throttled: false,
                _wake: wake,
            },
        );
        trace!(channel = %id, %role, "input channel opened");
        Ok(id)
    }

    fn open_output(
        &mut self,
        handle: &FileDescriptor,
        _options: &ChannelOptions,
        events: EventSender,
    ) -> io::Result<ChannelId> {
        let worker = worker_handle(handle)?;
        #[cfg(unix)]
        let worker = non_blocking(worker);
        let (wake, signal) = wake_pipe()?;
        let id = self.allocate();
        let (queue, queue_rx) = flume::unbounded();
        let backlog = Arc::new(AtomicUsize::new(0));
        let shared = Arc::clone(&backlog);
        std::thread::Builder::new()
            .name(format!("hsock-send-{}", id.0))
            .spawn(move || output_worker(id, worker, &queue_rx, &shared, &events, &signal))?;
        self.channels.insert(
            id,
            Channel::Output {
                queue,
                backlog,
                shut: false,
                _wake: wake,
            },
        );
        trace!(channel = %id, "output channel opened");
        Ok(id)
    }

    fn write(&mut self, channel: ChannelId, data: &[u8]) -> usize {
        let Some(Channel::Output {
            queue,
            backlog,
            shut,
            ..
        }) = self.channels.get(&channel)
        else {
            return 0;
        };
        if *shut {
            trace!(%channel, len = data.len(), "write after eof dropped");
            return backlog.load(Ordering::SeqCst);
        }
        let queued = backlog.fetch_add(data.len(), Ordering::SeqCst) + data.len();
        if queue.send(OutputCommand::Data(data.to_vec())).is_err() {
            trace!(%channel, "output worker gone; write dropped");
            return backlog.fetch_sub(data.len(), Ordering::SeqCst) - data.len();
        }
        queued
    }

    fn write_eof(&mut self, channel: ChannelId) {
        if let Some(Channel::Output { queue, shut, .. }) = self.channels.get_mut(&channel) {
            *shut = true;
            if queue.send(OutputCommand::Eof).is_err() {
                trace!(%channel, "output worker gone; eof dropped");
            }
        }
    }

    fn acknowledge(&mut self, channel: ChannelId, flow: ReadFlow) {
        if let Some(Channel::Input {
            permits, throttled, ..
        }) = self.channels.get_mut(&channel)
        {
            match flow {
                ReadFlow::Continue => {
                    *throttled = false;
                    grant(channel, permits);
                }
                ReadFlow::Pause => *throttled = true,
            }
        }
    }

    fn unthrottle(&mut self, channel: ChannelId) {
        if let Some(Channel::Input {
            permits, throttled, ..
        }) = self.channels.get_mut(&channel)
        {
            if *throttled {
                *throttled = false;
                grant(channel, permits);
            }
        }
    }

    fn free(&mut self, channel: ChannelId) {
        if self.channels.remove(&channel).is_some() {
            trace!(%channel, "channel freed");
        }
    }
}

/// Let an input worker issue its next read.
fn grant(channel: ChannelId, permits: &flume::Sender<()>) {
    match permits.try_send(()) {
        Ok(()) => {}
        Err(flume::TrySendError::Full(())) => trace!(%channel, "read permit already granted"),
        Err(flume::TrySendError::Disconnected(())) => {
            trace!(%channel, "input worker gone; permit dropped");
        }
    }
}

// =============================================================================
// Workers
// =============================================================================

fn input_worker(
    id: ChannelId,
    mut handle: FileDescriptor,
    chunk: usize,
    events: &EventSender,
    permits: &flume::Receiver<()>,
    signal: &WakeSignal,
) {
    let mut buf = vec![0u8; chunk];
    loop {
        if !signal.wait(&handle, Readiness::Read) {
            break;
        }
        let outcome = match handle.read(&mut buf) {
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                continue;
            }
            result => ReadOutcome::from_read(result, &buf),
        };
        let terminal = outcome.is_terminal();
        if !events.post(SocketEvent::Read {
            channel: id,
            outcome,
        }) || terminal
        {
            break;
        }
        if permits.recv().is_err() {
            break;
        }
    }
    trace!(channel = %id, "input worker exiting");
}

fn output_worker(
    id: ChannelId,
    mut handle: FileDescriptor,
    queue: &flume::Receiver<OutputCommand>,
    backlog: &AtomicUsize,
    events: &EventSender,
    signal: &WakeSignal,
) {
    while let Ok(command) = queue.recv() {
        match command {
            OutputCommand::Data(bytes) => match write_chunk(&mut handle, &bytes, signal) {
                Ok(true) => {
                    let before = backlog.fetch_sub(bytes.len(), Ordering::SeqCst);
                    let outcome = WriteOutcome::Backlog(before.saturating_sub(bytes.len()));
                    if !events.post(SocketEvent::Written {
                        channel: id,
                        outcome,
                    }) {
                        break;
                    }
                }
                Ok(false) => break,
                Err(err) => {
                    events.post(SocketEvent::Written {
                        channel: id,
                        outcome: WriteOutcome::Failed(err),
                    });
                    break;
                }
            },
            OutputCommand::Eof => {
                shutdown_write(&handle);
                break;
            }
        }
    }
    trace!(channel = %id, "output worker exiting");
}

/// Write all of `bytes`. Returns `Ok(false)` if the channel was freed first.
fn write_chunk(handle: &mut FileDescriptor, bytes: &[u8], signal: &WakeSignal) -> io::Result<bool> {
    let mut rest = bytes;
    while !rest.is_empty() {
        if !signal.wait(handle, Readiness::Write) {
            return Ok(false);
        }
        match handle.write(rest) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => rest = &rest[n..],
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

/// Half-close a socket handle. Pipes only need their last copy dropped.
#[cfg(unix)]
fn shutdown_write(handle: &FileDescriptor) {
    let result = handle
        .as_file()
        .map_err(io::Error::other)
        .and_then(|file| socket2::SockRef::from(&file).shutdown(std::net::Shutdown::Write));
    if let Err(err) = result {
        trace!(error = %err, "write shutdown not applicable");
    }
}

#[cfg(not(unix))]
fn shutdown_write(_handle: &FileDescriptor) {}
