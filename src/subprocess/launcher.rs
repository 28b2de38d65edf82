//! Process launcher
//!
//! Starts the supervised child with each standard stream backed by its own
//! pseudo-terminal (so the child line-buffers as if interactive) or by a
//! plain pipe, and wires any extra descriptors the caller wants monitored.

use super::error::ProcessError;
use super::fd::{dup_above, set_cloexec, FdReader};
use super::streaming::{ChannelId, ChannelMode};
use nix::pty::openpty;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::debug;

/// Extra descriptors are staged at or above this number before exec so that
/// installing one target can never clobber the source of another.
const STAGING_FD_FLOOR: i32 = 256;

pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub channel_mode: ChannelMode,
    /// Descriptor numbers (>= 3) exposed to the child for writing
    pub extra_fds: Vec<i32>,
}

impl ProcessCommand {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A freshly started child and the readable ends of its channels
pub struct LaunchedChild {
    pub child: Child,
    pub pid: u32,
    /// The child leads its own process group
    pub pgid: u32,
    pub channels: Vec<(ChannelId, ChannelReader)>,
}

impl std::fmt::Debug for LaunchedChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedChild")
            .field("pid", &self.pid)
            .field("pgid", &self.pgid)
            .field(
                "channels",
                &self.channels.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Spawn `command`. Spawn failures are reported once and never retried.
pub fn launch(command: &ProcessCommand) -> Result<LaunchedChild, ProcessError> {
    validate_descriptors(&command.extra_fds)?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .process_group(0);

    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }

    let mut channels: Vec<(ChannelId, ChannelReader)> = Vec::new();

    match command.channel_mode {
        ChannelMode::Pty => {
            let (out_master, out_slave) = open_pty()?;
            let (err_master, err_slave) = open_pty()?;
            cmd.stdout(Stdio::from(out_slave))
                .stderr(Stdio::from(err_slave));
            channels.push((ChannelId::Stdout, Box::new(FdReader::new(out_master)?)));
            channels.push((ChannelId::Stderr, Box::new(FdReader::new(err_master)?)));
        }
        ChannelMode::Pipe => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    // Write ends must stay open until the child has its copies, then close
    // so the channel sees EOF when the child is done with them.
    let mut staged: Vec<OwnedFd> = Vec::new();
    let mut redirects: Vec<(i32, i32)> = Vec::new();
    for &target in &command.extra_fds {
        let (read, write) = nix::unistd::pipe().map_err(io::Error::from)?;
        set_cloexec(&read)?;
        let write = dup_above(write, STAGING_FD_FLOOR)?;
        redirects.push((write.as_raw_fd(), target));
        channels.push((ChannelId::Fd(target), Box::new(FdReader::new(read)?)));
        staged.push(write);
    }

    if !redirects.is_empty() {
        // SAFETY: the closure only calls dup2, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                for &(source, target) in &redirects {
                    if libc::dup2(source, target) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::from_spawn(&command.program, e))?;

    // Release our copies of the slave and pipe write ends.
    drop(cmd);
    drop(staged);

    if command.channel_mode == ChannelMode::Pipe {
        let mut piped: Vec<(ChannelId, ChannelReader)> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            piped.push((ChannelId::Stdout, Box::new(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            piped.push((ChannelId::Stderr, Box::new(stderr)));
        }
        channels.splice(0..0, piped);
    }

    let pid = child
        .id()
        .ok_or_else(|| ProcessError::Io(io::Error::other("child exited before registration")))?;

    debug!(
        "Launched `{}` as pid {} ({:?} mode, {} channel(s))",
        command.display(),
        pid,
        command.channel_mode,
        channels.len()
    );

    Ok(LaunchedChild {
        child,
        pid,
        pgid: pid,
        channels,
    })
}

fn open_pty() -> Result<(OwnedFd, OwnedFd), ProcessError> {
    let pty = openpty(None, None).map_err(|e| ProcessError::Pty(io::Error::from(e)))?;
    set_cloexec(&pty.master).map_err(ProcessError::Pty)?;
    Ok((pty.master, pty.slave))
}

fn validate_descriptors(fds: &[i32]) -> Result<(), ProcessError> {
    let mut seen = Vec::with_capacity(fds.len());
    for &fd in fds {
        if !(3..STAGING_FD_FLOOR).contains(&fd) || seen.contains(&fd) {
            return Err(ProcessError::InvalidDescriptor(fd));
        }
        seen.push(fd);
    }
    Ok(())
}
