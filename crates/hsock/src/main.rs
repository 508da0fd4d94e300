//! hsock - run a local command and bridge its stdio through a handle socket
//!
//! Our stdin is written to the child through the socket, the child's stdout
//! is copied to ours, and its stderr is logged line by line.

use anyhow::{Context, Result};
use clap::Parser;
use handle_socket::command::spawn_local;
use handle_socket::config::LogFormat;
use handle_socket::logging::init_logging;
use handle_socket::{CloseReason, Consumer, Error, HandleSocket, SocketConfig, SocketControl};
use std::cell::Cell;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use std::rc::Rc;
use std::time::Duration;

/// How long one turn of the main loop waits for socket events.
const POLL: Duration = Duration::from_millis(20);

/// Stop pulling stdin while this many bytes wait to be written.
const MAX_BACKLOG: usize = 1 << 20;

#[derive(Parser)]
#[command(name = "hsock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "HSOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Mark the child's handles as overlapped-capable
    #[arg(long)]
    overlapped: bool,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Copies received bytes to stdout and tracks the write backlog.
struct StdoutBridge {
    out: std::io::Stdout,
    backlog: Rc<Cell<usize>>,
}

impl Consumer for StdoutBridge {
    fn receive(&mut self, socket: &mut SocketControl<'_>, data: &[u8]) {
        let mut out = self.out.lock();
        if let Err(err) = out.write_all(data).and_then(|()| out.flush()) {
            tracing::warn!(error = %err, "stdout closed; shutting down");
            socket.close();
        }
    }

    fn sent(&mut self, _socket: &mut SocketControl<'_>, backlog: usize) {
        self.backlog.set(backlog);
    }

    fn closing(&mut self, socket: &mut SocketControl<'_>, reason: CloseReason) {
        if reason.is_error() {
            tracing::warn!(%reason, code = reason.error_code(), "connection to command lost");
        } else {
            tracing::debug!("command closed its output");
        }
        socket.close();
    }
}

fn load_config(cli: &Cli) -> Result<SocketConfig> {
    let mut config = match &cli.config {
        Some(path) => SocketConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SocketConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    config.overlapped |= cli.overlapped;
    Ok(config)
}

/// Read stdin on a helper thread; the receiver disconnects at end of input.
fn spawn_stdin_reader(chunk: usize) -> Result<flume::Receiver<Vec<u8>>> {
    let (tx, rx) = flume::bounded(16);
    std::thread::Builder::new()
        .name("hsock-stdin".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = vec![0u8; chunk];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "reading stdin failed");
                        break;
                    }
                }
            }
        })
        .context("spawning stdin reader")?;
    Ok(rx)
}

fn run(cli: &Cli, config: &SocketConfig) -> Result<ExitCode> {
    let (program, args) = cli
        .command
        .split_first()
        .context("no command given")?;
    let mut local = spawn_local(Command::new(program).args(args))
        .with_context(|| format!("starting {program}"))?;

    let backlog = Rc::new(Cell::new(0));
    let bridge = StdoutBridge {
        out: std::io::stdout(),
        backlog: Rc::clone(&backlog),
    };
    let mut socket = HandleSocket::builder(local.handles, Box::new(bridge))
        .stderr(local.stderr)
        .config(config)
        .build()?;
    tracing::debug!(
        pid = local.child.id(),
        peer = socket.peer_info().as_deref().unwrap_or("unknown"),
        "bridging command"
    );

    let stdin = spawn_stdin_reader(config.read_chunk_size)?;
    let mut stdin_open = true;

    while !socket.is_closed() {
        match socket.run_once(Some(POLL)) {
            Ok(_) => {}
            Err(Error::Disconnected) => break,
            Err(err) => return Err(err.into()),
        }
        while stdin_open && backlog.get() < MAX_BACKLOG {
            match stdin.try_recv() {
                Ok(chunk) => backlog.set(socket.write(&chunk)),
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => {
                    socket.write_eof();
                    stdin_open = false;
                }
            }
        }
    }

    if let Some(err) = socket.last_error() {
        tracing::warn!(error = err, "socket closed with error");
    }
    drop(socket);

    let status = local.child.wait().context("waiting for command")?;
    tracing::debug!(%status, "command exited");
    Ok(status
        .code()
        .map_or(ExitCode::FAILURE, |code| ExitCode::from(code as u8)))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.log)?;
    run(&cli, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_arguments_belong_to_command() {
        let cli = Cli::try_parse_from(["hsock", "--log-format", "json", "ssh", "-v", "host"]).unwrap();
        assert_eq!(cli.command, vec!["ssh", "-v", "host"]);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from(["hsock", "--log-level", "trace", "--overlapped", "cat"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.log.level, "trace");
        assert!(config.overlapped);
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["hsock"]).is_err());
    }
}
