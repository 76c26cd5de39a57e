//! Pipe plumbing (C3): wires fd 3/4 of a spawned worker subprocess to the channel's
//! reader/writer before `exec`.
//!
//! Grounded on the `nix::unistd::{pipe, dup2, close}` + `Command::pre_exec` pattern used by the
//! pack's other mediasoup-rust snapshot for worker channel setup, adapted to a single channel
//! (`spec.md` only describes one channel abstraction, not a separate payload channel).

use async_fs::File;
use async_process::unix::CommandExt;
use async_process::{Child, Command};
use nix::unistd;
use std::io;
use std::os::unix::io::FromRawFd;
use std::sync::Arc;

use crate::worker::channel::{Channel, RequestTimeoutPolicy};
use crate::worker::codec::FramingMode;

pub(super) struct SpawnResult {
    pub(super) child: Child,
    pub(super) channel: Channel,
}

/// Spawns `command` with fd 3 (worker's read end) and fd 4 (worker's write end) wired to a fresh
/// pipe pair, then builds a [`Channel`] over the parent-side ends. Only one worker spawn runs at
/// a time: interleaving `pre_exec` fd setup across threads has caused crashes upstream.
pub(super) fn spawn_with_worker_channel(
    executor: Arc<async_executor::Executor<'static>>,
    command: &mut Command,
    timeout_policy: RequestTimeoutPolicy,
) -> io::Result<SpawnResult> {
    let (producer_fd_read, producer_fd_write) =
        unistd::pipe().map_err(nix_to_io)?;
    let (consumer_fd_read, consumer_fd_write) =
        unistd::pipe().map_err(nix_to_io)?;

    unsafe {
        command.pre_exec(move || {
            unistd::dup2(producer_fd_read, 3).map_err(nix_to_io)?;
            unistd::dup2(consumer_fd_write, 4).map_err(nix_to_io)?;
            let _ = unistd::close(producer_fd_read);
            let _ = unistd::close(consumer_fd_write);
            Ok(())
        });
    }

    let child = command.spawn();
    // Parent doesn't use the child-side fds regardless of whether spawn succeeded.
    let _ = unistd::close(producer_fd_read);
    let _ = unistd::close(consumer_fd_write);
    let child = child?;

    let producer_file = unsafe { File::from_raw_fd(producer_fd_write) };
    let consumer_file = unsafe { File::from_raw_fd(consumer_fd_read) };

    let channel = Channel::new(
        executor,
        consumer_file,
        producer_file,
        FramingMode::SizePrefixed,
        timeout_policy,
    );

    Ok(SpawnResult { child, channel })
}

fn nix_to_io(error: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(error as i32)
}
