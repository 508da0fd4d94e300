//! Running a local command behind a socket.

use crate::error::{Error, Result};
use crate::handles::SocketHandles;
use filedescriptor::FileDescriptor;
use std::io;
use std::process::{Child, Command, Stdio};

/// A spawned child whose stdio is ready to hand to a socket builder.
#[derive(Debug)]
pub struct LocalCommand {
    /// The child's stdin (send) and stdout (receive).
    pub handles: SocketHandles,
    /// The child's stderr, for the diagnostic channel.
    pub stderr: FileDescriptor,
    pub child: Child,
}

/// Spawn `cmd` with all three stdio streams piped.
pub fn spawn_local(cmd: &mut Command) -> Result<LocalCommand> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(Error::Spawn)?;

    let missing = |name: &str| Error::Spawn(io::Error::other(format!("child has no {name} pipe")));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    tracing::debug!(pid = child.id(), "spawned local command");

    Ok(LocalCommand {
        handles: SocketHandles::split(FileDescriptor::new(stdin), FileDescriptor::new(stdout)),
        stderr: FileDescriptor::new(stderr),
        child,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = spawn_local(&mut Command::new("/nonexistent/hsock-test-binary")).unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
    }

    #[test]
    fn pipes_are_split_handles() {
        let mut local = spawn_local(&mut Command::new("true")).unwrap();
        assert!(matches!(local.handles, SocketHandles::Split { .. }));
        local.child.wait().unwrap();
    }
}
