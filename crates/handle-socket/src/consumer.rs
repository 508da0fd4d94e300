//! The upstream side of a socket.
//!
//! A [`Consumer`] receives bytes, write-backlog updates and exactly one
//! closing notification. While one of its methods runs it gets a
//! [`SocketControl`] instead of the socket itself: writes and freezes take
//! effect immediately, but `close` is recorded and carried out after the
//! callback returns.

use crate::engine::ChannelId;
use crate::flow::FreezeState;
use crate::socket::SocketCore;
use std::fmt;
use std::io;

/// A read or write failure, as reported to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError {
    pub message: String,
    /// Underlying OS error code, or 0 when there is none.
    pub code: i32,
}

impl SocketError {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub(crate) fn from_io(context: &str, err: &io::Error) -> Self {
        Self::new(format!("{context}: {err}"), err.raw_os_error().unwrap_or(0))
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

impl std::error::Error for SocketError {}

/// Why a socket is closing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end in an orderly way.
    Eof,
    ReadFailed(SocketError),
    WriteFailed(SocketError),
}

impl CloseReason {
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.error().map(|e| e.message.as_str())
    }

    #[must_use]
    pub fn error_code(&self) -> i32 {
        self.error().map_or(0, |e| e.code)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    #[must_use]
    pub fn error(&self) -> Option<&SocketError> {
        match self {
            Self::Eof => None,
            Self::ReadFailed(err) | Self::WriteFailed(err) => Some(err),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "end of stream"),
            Self::ReadFailed(err) | Self::WriteFailed(err) => write!(f, "{err}"),
        }
    }
}

/// Receives what a socket produces.
pub trait Consumer {
    /// A chunk arrived, in order.
    fn receive(&mut self, socket: &mut SocketControl<'_>, data: &[u8]);

    /// A queued write completed; `backlog` bytes remain queued.
    fn sent(&mut self, socket: &mut SocketControl<'_>, backlog: usize) {
        let _ = (socket, backlog);
    }

    /// The socket hit end of stream or an error. Called at most once.
    fn closing(&mut self, socket: &mut SocketControl<'_>, reason: CloseReason);
}

/// Access to a socket from inside a consumer callback.
pub struct SocketControl<'a> {
    pub(crate) core: &'a mut SocketCore,
}

impl<'a> SocketControl<'a> {
    pub(crate) fn new(core: &'a mut SocketCore) -> Self {
        Self { core }
    }

    /// Queue bytes for writing; returns the bytes now queued.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.core.write(data)
    }

    /// Same as [`write`](Self::write).
    pub fn write_oob(&mut self, data: &[u8]) -> usize {
        self.core.write(data)
    }

    pub fn write_eof(&mut self) {
        self.core.write_eof();
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.core.set_frozen(frozen);
    }

    /// Request teardown once the current callback returns.
    pub fn close(&mut self) {
        self.core.close();
    }

    #[must_use]
    pub fn freeze_state(&self) -> FreezeState {
        self.core.flow
    }

    #[must_use]
    pub fn close_requested(&self) -> bool {
        self.core.close_requested
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.closed
    }

    #[must_use]
    pub fn peer_info(&self) -> Option<String> {
        self.core.peer_info()
    }

    #[must_use]
    pub fn recv_channel(&self) -> Option<ChannelId> {
        self.core.recv
    }
}
