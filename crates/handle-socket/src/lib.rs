//! handle-socket: a byte-stream socket over blocking OS handles
//!
//! This crate adapts a pair of blocking read/write handles (pipe ends, the
//! stdio of a child process, a socketpair) into a socket that upper layers
//! can drive with flow control, write backlog reporting and a safe close
//! lifecycle.
//!
//! # Architecture
//!
//! ```text
//! worker threads (IoEngine) ──SocketEvent──▶ mailbox ──▶ HandleSocket ──▶ Consumer
//!        ▲                                                    │
//!        └──────── write / acknowledge / unthrottle ◀─────────┘
//! ```
//!
//! Every state change happens on the thread that owns the [`HandleSocket`]
//! and drains its mailbox. The engine's blocking reads cannot be
//! interrupted, so pausing a socket may still let one more chunk in; that
//! chunk is buffered and delivered, in order, after the socket is resumed.
//!
//! # Modules
//!
//! - `flow`: the freeze/thaw state machine as a pure transition function
//! - `buffer`: chunked byte FIFO used for data held while frozen
//! - `engine`: the I/O engine seam (`IoEngine`) and the event types it posts
//! - `threaded`: the default engine, one blocking worker thread per channel
//! - `consumer`: the upstream callback trait and close reasons
//! - `socket`: `HandleSocket` itself
//! - `stderr`: line-assembling passthrough for a diagnostic stderr channel
//! - `peer`: best-effort peer identification strategies
//! - `handles`: ownership of the OS handles bound to a socket
//! - `command`: spawning a local command wired up for a socket
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod command;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod flow;
pub mod handles;
pub mod logging;
pub mod peer;
pub mod socket;
pub mod stderr;
pub mod threaded;

pub use config::SocketConfig;
pub use consumer::{CloseReason, Consumer, SocketControl, SocketError};
pub use engine::{
    ChannelId, ChannelOptions, ChannelRole, EventSender, IoEngine, ReadFlow, ReadOutcome,
    SocketEvent, WriteOutcome,
};
pub use error::{Error, Result};
pub use flow::FreezeState;
pub use handles::SocketHandles;
pub use socket::{HandleSocket, SocketBuilder};
pub use threaded::ThreadedEngine;

/// Re-exported so callers can build [`SocketHandles`] without naming the
/// dependency themselves.
pub use filedescriptor::FileDescriptor;
