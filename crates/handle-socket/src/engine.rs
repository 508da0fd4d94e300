//! The I/O engine seam.
//!
//! An engine owns the workers that perform blocking reads and writes on
//! OS handles. It never calls into a socket directly: results are posted
//! as [`SocketEvent`]s to the socket's mailbox and handled on the thread
//! that owns the socket. The socket talks back through [`IoEngine`].

use filedescriptor::FileDescriptor;
use std::fmt;
use std::io;

/// Identifies one engine channel (a handle bound to a worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// What a channel is used for by the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Receive,
    Send,
    Stderr,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive => write!(f, "receive"),
            Self::Send => write!(f, "send"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Per-channel settings passed when a channel is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// The handle was opened for overlapped (asynchronous) I/O and the
    /// engine may use it that way.
    pub overlapped: bool,
    /// Upper bound on the size of a single read.
    pub read_chunk_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            overlapped: false,
            read_chunk_size: crate::config::DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// Result of one read on an input channel.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Bytes were read. An empty chunk means end of stream.
    Data(Vec<u8>),
    /// Orderly end of stream.
    Eof,
    /// The read failed. The engine posts nothing further for the channel.
    Error(io::Error),
}

impl ReadOutcome {
    /// Classify the result of a blocking read into `buf`.
    pub fn from_read(result: io::Result<usize>, buf: &[u8]) -> Self {
        match result {
            Ok(0) => Self::Eof,
            Ok(n) => Self::Data(buf[..n].to_vec()),
            Err(err) => Self::Error(err),
        }
    }

    /// Whether no further outcomes follow on the same channel.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Data(chunk) => chunk.is_empty(),
            Self::Eof | Self::Error(_) => true,
        }
    }
}

/// Result of one completed write on an output channel.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Bytes still queued after the completed write.
    Backlog(usize),
    /// The write failed. The engine posts nothing further for the channel.
    Failed(io::Error),
}

/// The socket's answer to a delivered read: whether the engine may issue
/// the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadFlow {
    /// Keep reading.
    Continue,
    /// Issue no further reads until [`IoEngine::unthrottle`].
    Pause,
}

/// Messages processed on the socket's coordinating thread.
#[derive(Debug)]
pub enum SocketEvent {
    Read {
        channel: ChannelId,
        outcome: ReadOutcome,
    },
    Written {
        channel: ChannelId,
        outcome: WriteOutcome,
    },
    /// Release one buffered chunk while thawing.
    Drain,
}

/// Posting end of a socket's mailbox. Cheap to clone; safe to move to
/// worker threads.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: flume::Sender<SocketEvent>,
}

impl EventSender {
    pub(crate) fn new(tx: flume::Sender<SocketEvent>) -> Self {
        Self { tx }
    }

    /// Post an event. Returns `false` once the socket has gone away.
    pub fn post(&self, event: SocketEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Background read/write machinery used by a socket.
///
/// All methods are called from the socket's coordinating thread.
/// Implementations must keep at most one read in flight per input channel:
/// after posting a [`ReadOutcome::Data`] the next read waits for
/// [`IoEngine::acknowledge`] with [`ReadFlow::Continue`] or for
/// [`IoEngine::unthrottle`].
pub trait IoEngine {
    /// Start reading `handle`, posting results to `events`.
    fn open_input(
        &mut self,
        handle: &FileDescriptor,
        role: ChannelRole,
        options: &ChannelOptions,
        events: EventSender,
    ) -> io::Result<ChannelId>;

    /// Start a writer for `handle`, posting completions to `events`.
    fn open_output(
        &mut self,
        handle: &FileDescriptor,
        options: &ChannelOptions,
        events: EventSender,
    ) -> io::Result<ChannelId>;

    /// Queue `data` and return the number of bytes now queued.
    fn write(&mut self, channel: ChannelId, data: &[u8]) -> usize;

    /// Finish the output stream once everything queued has been written.
    fn write_eof(&mut self, channel: ChannelId);

    /// Answer the most recent read posted for `channel`.
    fn acknowledge(&mut self, channel: ChannelId, flow: ReadFlow);

    /// Resume reading on a channel previously paused by acknowledgement.
    fn unthrottle(&mut self, channel: ChannelId);

    /// Detach the channel. Events it may still post are ignored.
    fn free(&mut self, channel: ChannelId);
}
