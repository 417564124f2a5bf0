//! Listener worker thread.
//!
//! Each registered listener gets one dedicated worker popping
//! `ListenerMessage`s off its queue; back-pressure stalls only that
//! listener. Grounded on the same `nix`-ioctl/poll-based I/O discipline
//! the tuner driver (`crate::tuner`) uses for its own device descriptors;
//! no reference file wires a write-retry loop like this one, so it is
//! built directly from that same discipline.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::{emit, ListenerMessage, MessageQueue};
use crate::status::{DvbListenerStatus, ListenerId, StatusSink};

/// Ten consecutive 1-second write-poll timeouts surface `WriteError` (spec
/// §5 "Cancellation and timeouts").
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 10;
const WRITE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a listener's bytes go: an OS file descriptor, or a callback.
#[derive(Clone)]
pub enum ListenerSink {
    Fd(RawFd),
    Cb(Arc<dyn Fn(&[u8]) + Send + Sync>),
}

impl ListenerSink {
    /// Identity used for `set_listener` reconfiguration matching: fd value
    /// for `Fd`, pointer identity for `Cb`.
    pub fn same_identity(&self, other: &ListenerSink) -> bool {
        match (self, other) {
            (ListenerSink::Fd(a), ListenerSink::Fd(b)) => a == b,
            (ListenerSink::Cb(a), ListenerSink::Cb(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The subset of `ListenerFlags` the worker needs to read/set, abstracted
/// so this module doesn't need to know the concrete flags type.
pub trait FlagsHandle {
    fn terminate(&self);
    fn write_error(&self);
    fn eos(&self);
    fn running(&self) -> bool;
    fn set_running(&self, value: bool);
}

pub(super) fn spawn<F>(
    id: ListenerId,
    sink: ListenerSink,
    flags: Arc<F>,
    queue: Arc<MessageQueue>,
    status: Arc<dyn StatusSink>,
) -> std::thread::JoinHandle<()>
where
    F: FlagsHandle + Send + Sync + 'static,
{
    std::thread::spawn(move || run(id, sink, flags, queue, status))
}

fn run<F>(id: ListenerId, sink: ListenerSink, flags: Arc<F>, queue: Arc<MessageQueue>, status: Arc<dyn StatusSink>)
where
    F: FlagsHandle,
{
    let mut consecutive_timeouts = 0u32;

    loop {
        let message = {
            let guard = queue.messages.lock().unwrap();
            let guard = queue
                .condvar
                .wait_while(guard, |q| {
                    q.front().map_or(true, |front| {
                        !flags.running() && !matches!(front, ListenerMessage::Continue | ListenerMessage::Quit)
                    })
                })
                .unwrap();
            let mut guard = guard;
            guard.pop_front()
        };

        let Some(message) = message else {
            continue;
        };

        match message {
            ListenerMessage::Continue => {
                flags.set_running(true);
            }
            ListenerMessage::Drop => {
                queue.purge_data();
            }
            ListenerMessage::Eos => {
                flags.eos();
                emit(&status, id, DvbListenerStatus::Eos);
            }
            ListenerMessage::Quit => {
                flags.terminate();
                emit(&status, id, DvbListenerStatus::Terminated);
                return;
            }
            ListenerMessage::Data(bytes) => {
                if !deliver(&sink, &bytes, &mut consecutive_timeouts) {
                    flags.write_error();
                    emit(&status, id, DvbListenerStatus::WriteError);
                } else {
                    consecutive_timeouts = 0;
                }
            }
        }
    }
}

/// Deliver one coalesced buffer. Returns `false` once the write is
/// considered fatally failed (ten consecutive poll timeouts, or a fatal
/// write error).
fn deliver(sink: &ListenerSink, bytes: &[u8], consecutive_timeouts: &mut u32) -> bool {
    match sink {
        ListenerSink::Cb(callback) => {
            callback(bytes);
            true
        }
        ListenerSink::Fd(fd) => write_all_polled(*fd, bytes, consecutive_timeouts),
    }
}

fn write_all_polled(fd: RawFd, mut bytes: &[u8], consecutive_timeouts: &mut u32) -> bool {
    while !bytes.is_empty() {
        let mut poll_fd = [PollFd::new(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
            PollFlags::POLLOUT,
        )];
        match poll(&mut poll_fd, PollTimeout::try_from(WRITE_POLL_TIMEOUT).unwrap_or(PollTimeout::MAX)) {
            Ok(0) => {
                *consecutive_timeouts += 1;
                if *consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                    return false;
                }
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("poll on listener fd {fd} failed: {e}");
                return false;
            }
        }

        match nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, bytes) {
            Ok(0) => return false,
            Ok(n) => bytes = &bytes[n..],
            Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!("write to listener fd {fd} failed: {e}");
                return false;
            }
        }
    }
    true
}
