//! Ownership of the OS handles bound to a socket.

use filedescriptor::FileDescriptor;

/// The handles a socket reads from and writes to.
#[derive(Debug)]
pub enum SocketHandles {
    /// One bidirectional handle, such as one end of a socketpair.
    Duplex(FileDescriptor),
    /// Separate handles for each direction, such as a child's stdin and
    /// stdout pipes.
    Split {
        send: FileDescriptor,
        recv: FileDescriptor,
    },
}

impl SocketHandles {
    #[must_use]
    pub fn duplex(handle: FileDescriptor) -> Self {
        Self::Duplex(handle)
    }

    #[must_use]
    pub fn split(send: FileDescriptor, recv: FileDescriptor) -> Self {
        Self::Split { send, recv }
    }
}

/// The socket's own copies of its handles, released independently.
///
/// A duplex handle lives in `send` only, so it is closed exactly once.
#[derive(Debug)]
pub(crate) struct HandleSet {
    send: Option<FileDescriptor>,
    recv: Option<FileDescriptor>,
}

impl From<SocketHandles> for HandleSet {
    fn from(handles: SocketHandles) -> Self {
        match handles {
            SocketHandles::Duplex(handle) => Self {
                send: Some(handle),
                recv: None,
            },
            SocketHandles::Split { send, recv } => Self {
                send: Some(send),
                recv: Some(recv),
            },
        }
    }
}

impl HandleSet {
    #[cfg(test)]
    fn is_duplex(&self) -> bool {
        self.recv.is_none() && self.send.is_some()
    }

    pub(crate) fn send(&self) -> Option<&FileDescriptor> {
        self.send.as_ref()
    }

    pub(crate) fn recv(&self) -> Option<&FileDescriptor> {
        self.recv.as_ref().or(self.send.as_ref())
    }

    /// Drop the send handle of a split pair. A duplex handle is kept since
    /// the receive side still reads from it.
    pub(crate) fn release_send(&mut self) -> bool {
        if self.recv.is_some() {
            return self.send.take().is_some();
        }
        false
    }

    /// Drop every handle. Returns how many were closed.
    pub(crate) fn release_all(&mut self) -> usize {
        usize::from(self.send.take().is_some()) + usize::from(self.recv.take().is_some())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use filedescriptor::{Pipe, socketpair};

    #[test]
    fn duplex_is_released_once() {
        let (a, _b) = socketpair().unwrap();
        let mut set = HandleSet::from(SocketHandles::duplex(a));
        assert!(set.is_duplex());
        assert!(set.recv().is_some());
        assert!(!set.release_send());
        assert!(set.send().is_some());
        assert_eq!(set.release_all(), 1);
        assert_eq!(set.release_all(), 0);
        assert!(set.recv().is_none());
    }

    #[test]
    fn split_releases_send_independently() {
        let out = Pipe::new().unwrap();
        let inp = Pipe::new().unwrap();
        let mut set = HandleSet::from(SocketHandles::split(out.write, inp.read));
        assert!(!set.is_duplex());
        assert!(set.release_send());
        assert!(set.send().is_none());
        assert!(set.recv().is_some());
        assert!(!set.release_send());
        assert_eq!(set.release_all(), 1);
    }
}
