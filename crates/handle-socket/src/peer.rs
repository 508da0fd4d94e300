//! Best-effort identification of whatever is at the other end of a handle.
//!
//! Used for log messages only. A provider that cannot tell returns `None`.

use filedescriptor::FileDescriptor;

/// A strategy for describing the peer of a handle.
pub trait PeerInfo {
    fn describe(&self, handle: &FileDescriptor) -> Option<String>;
}

impl<F> PeerInfo for F
where
    F: Fn(&FileDescriptor) -> Option<String>,
{
    fn describe(&self, handle: &FileDescriptor) -> Option<String> {
        self(handle)
    }
}

/// Reports the peer process of a Unix domain socket via `SO_PEERCRED`.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerCredentials;

#[cfg(any(target_os = "linux", target_os = "android"))]
impl PeerInfo for PeerCredentials {
    fn describe(&self, handle: &FileDescriptor) -> Option<String> {
        use nix::sys::socket::{getsockopt, sockopt};

        let file = handle.as_file().ok()?;
        match getsockopt(&file, sockopt::PeerCredentials) {
            Ok(creds) => Some(format!("process id {}", creds.pid())),
            Err(err) => {
                tracing::trace!(error = %err, "SO_PEERCRED unavailable");
                None
            }
        }
    }
}

/// The provider used when none is configured.
#[must_use]
pub fn default_provider() -> Option<Box<dyn PeerInfo>> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        Some(Box::new(PeerCredentials))
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        None
    }
}
