//! Reader coordinator: owns the tuner driver, the PSI/SI tracker and the
//! listener fabric for one physical frontend, and runs the two threads that
//! drive them (spec §4.F).
//!
//! Grounded on `examples/original_source/dvbreader.c`'s
//! `dvb_reader_event_thread_proc`/`dvb_reader_data_thread_proc` split: a
//! command queue drained by an "event thread" that performs slow operations
//! (tuning) one at a time, and a "data thread" that exists only while the
//! tuner is streaming, polling the control pipe and the DVR tap together
//! with a long idle timeout. The queue itself reuses the
//! push_back/push_front-with-priority shape `crate::listener`'s
//! `MessageQueue` already established for the same C source's
//! `dvb_reader_push_event`/`dvb_reader_push_event_next`.

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::channel::TunerConfig;
use crate::listener::{ListenerFabric, ListenerSink};
use crate::packet::{pid as wellknown, FilterMask, TsPacket};
use crate::resync::Resynchroniser;
use crate::status::{DvbStreamStatus, ListenerId, StatusEvent, StatusSink};
use crate::tracker::{PsiTracker, ServiceInfo};
use crate::tuner::TunerDriver;

/// Poll timeout on the data thread's control pipe + DVR tap, matching
/// `dvb_reader_data_thread_proc`'s 15 second keep-alive wakeup.
const DATA_POLL_TIMEOUT: Duration = Duration::from_secs(15);
/// Read buffer size for one DVR tap read cycle.
const READ_CHUNK: usize = 32 * 1024;
/// PIDs requested from the tuner driver before any PAT has been seen: the
/// well-known tables the tracker needs to discover the target program's PMT
/// PID (spec §4.A step 5, §4.D).
const INITIAL_PIDS: [u16; 4] = [wellknown::PAT, wellknown::SDT, wellknown::EIT, wellknown::RST];

/// One unit of work for the event thread.
enum Command {
    TuneIn {
        config: TunerConfig,
        program_number: u16,
        channel_id: Option<u32>,
    },
    Stop,
    StopThread,
}

/// Command queue, pop-front/push-back/push-front, modeled on
/// `crate::listener`'s `MessageQueue`.
struct CommandQueue {
    commands: Mutex<VecDeque<Command>>,
    condvar: Condvar,
}

impl CommandQueue {
    fn new() -> Self {
        CommandQueue {
            commands: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    fn push_back(&self, command: Command) {
        let mut queue = self.commands.lock().unwrap();
        queue.push_back(command);
        self.condvar.notify_one();
    }

    /// Priority push, used for `StopThread` so shutdown is never stuck
    /// behind a queued `TuneIn` (mirrors `dvb_reader_push_event_next`).
    fn push_front(&self, command: Command) {
        let mut queue = self.commands.lock().unwrap();
        queue.push_front(command);
        self.condvar.notify_one();
    }

    fn pop_blocking(&self) -> Command {
        let guard = self.commands.lock().unwrap();
        let mut guard = self.condvar.wait_while(guard, |q| q.is_empty()).unwrap();
        guard.pop_front().expect("woken with a non-empty queue")
    }
}

/// State shared between the event thread, the data thread, and the public
/// API surface callers use from their own threads.
struct Shared {
    tuner: Mutex<Box<dyn TunerDriver>>,
    tracker: Mutex<PsiTracker>,
    fabric: Arc<ListenerFabric>,
    status: Arc<dyn StatusSink>,
    commands: CommandQueue,
    data_thread: Mutex<Option<JoinHandle<()>>>,
    control_write: Mutex<Option<OwnedFd>>,
    stream_status: Mutex<DvbStreamStatus>,
    last_pat: Mutex<Option<Vec<TsPacket>>>,
    last_pmt: Mutex<Option<Vec<TsPacket>>>,
    current_channel: Mutex<Option<u32>>,
}

/// Tunes one physical frontend, tracks its PSI/SI state and fans the
/// filtered stream out through a `ListenerFabric`.
///
/// Every public method but `shutdown` is a cheap, non-blocking handoff to
/// the event thread or a direct read of shared state; the actual tune
/// happens on the event thread so a slow `wait_for_lock` never blocks the
/// caller.
pub struct DvbReader {
    shared: Arc<Shared>,
    event_thread: Option<JoinHandle<()>>,
}

impl DvbReader {
    pub fn new(tuner: Box<dyn TunerDriver>, status: Arc<dyn StatusSink>) -> Self {
        let fabric = Arc::new(ListenerFabric::new(Arc::clone(&status)));
        let shared = Arc::new(Shared {
            tuner: Mutex::new(tuner),
            tracker: Mutex::new(PsiTracker::new(0)),
            fabric,
            status,
            commands: CommandQueue::new(),
            data_thread: Mutex::new(None),
            control_write: Mutex::new(None),
            stream_status: Mutex::new(DvbStreamStatus::Unknown),
            last_pat: Mutex::new(None),
            last_pmt: Mutex::new(None),
            current_channel: Mutex::new(None),
        });

        let event_shared = Arc::clone(&shared);
        let event_thread = std::thread::spawn(move || event_thread_loop(event_shared));

        DvbReader { shared, event_thread: Some(event_thread) }
    }

    /// Enqueues a retune. Asynchronous: the outcome surfaces as a
    /// `StatusEvent::TuneIn` followed by `StreamStatusChanged`.
    pub fn tune(&self, config: TunerConfig, program_number: u16, channel_id: Option<u32>) {
        self.shared.commands.push_back(Command::TuneIn { config, program_number, channel_id });
    }

    /// Stops the current stream (tuner, data thread, listener fan-out) but
    /// leaves the reader able to accept another `tune()`.
    pub fn stop_stream(&self) {
        self.shared.commands.push_back(Command::Stop);
    }

    /// Shuts the reader down: stops the stream if running, then joins the
    /// event thread. Consumes `self`.
    pub fn shutdown(mut self) {
        self.shared.commands.push_front(Command::StopThread);
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn stream_status(&self) -> DvbStreamStatus {
        *self.shared.stream_status.lock().unwrap()
    }

    pub fn currently_tuned_channel(&self) -> Option<u32> {
        *self.shared.current_channel.lock().unwrap()
    }

    pub fn service_info(&self) -> Option<ServiceInfo> {
        self.shared.tracker.lock().unwrap().service_info().cloned()
    }

    pub fn eit_tables(&self) -> Vec<crate::psi::eit::EitTable> {
        self.shared.tracker.lock().unwrap().eit_tables().to_vec()
    }

    pub fn currently_running(&self, now: chrono::DateTime<chrono::Utc>) -> Option<crate::psi::eit::EpgEvent> {
        self.shared.tracker.lock().unwrap().currently_running(now).cloned()
    }

    /// The listener fabric this reader's data thread dispatches into.
    /// `Recorder` is constructed against a clone of this handle so it can
    /// register itself as just another listener (spec §4.G).
    pub fn fabric(&self) -> Arc<ListenerFabric> {
        Arc::clone(&self.shared.fabric)
    }

    pub fn set_listener(
        &self,
        filter: FilterMask,
        sink: ListenerSink,
    ) -> ListenerId {
        let pat = self.shared.last_pat.lock().unwrap().clone();
        let pmt = self.shared.last_pmt.lock().unwrap().clone();
        self.shared.fabric.set_listener(filter, sink, pat.as_deref(), pmt.as_deref())
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.shared.fabric.remove_listener(id);
    }
}

fn event_thread_loop(shared: Arc<Shared>) {
    loop {
        match shared.commands.pop_blocking() {
            Command::TuneIn { config, program_number, channel_id } => {
                handle_tune_in(&shared, config, program_number, channel_id);
            }
            Command::Stop => {
                handle_stop(&shared);
            }
            Command::StopThread => {
                handle_stop(&shared);
                return;
            }
        }
    }
}

fn handle_tune_in(shared: &Arc<Shared>, config: TunerConfig, program_number: u16, channel_id: Option<u32>) {
    shared.status.emit(StatusEvent::TuneIn {
        frequency: config.frequency,
        polarisation: config.polarisation,
        satellite_port: config.satellite_port,
        delivery_system: config.delivery_system,
        modulation: config.modulation,
        roll_off: config.roll_off,
        symbol_rate: config.symbol_rate,
        program_number,
    });

    stop_data_thread(shared);

    let tune_result = shared.tuner.lock().unwrap().tune(&config, &INITIAL_PIDS);
    match tune_result {
        Ok(()) => {
            *shared.tracker.lock().unwrap() = PsiTracker::new(program_number);
            *shared.last_pat.lock().unwrap() = None;
            *shared.last_pmt.lock().unwrap() = None;
            *shared.current_channel.lock().unwrap() = channel_id;

            set_stream_status(shared, DvbStreamStatus::Tuned);
            start_data_thread(shared);
            set_stream_status(shared, DvbStreamStatus::Running);
        }
        Err(e) => {
            warn!("tune failed: {e}");
            set_stream_status(shared, DvbStreamStatus::TuneFailed);
        }
    }
}

fn handle_stop(shared: &Arc<Shared>) {
    stop_data_thread(shared);
    shared.tuner.lock().unwrap().stop();
    set_stream_status(shared, DvbStreamStatus::Stopped);
}

fn set_stream_status(shared: &Arc<Shared>, status: DvbStreamStatus) {
    *shared.stream_status.lock().unwrap() = status;
    shared.status.emit(StatusEvent::StreamStatusChanged(status));
}

fn start_data_thread(shared: &Arc<Shared>) {
    let Some(dvr_fd) = shared.tuner.lock().unwrap().dvr_fd() else {
        warn!("tuner reports Streaming but has no DVR fd; not starting data thread");
        return;
    };

    let (control_read, control_write) = match nix::unistd::pipe() {
        Ok(pair) => pair,
        Err(e) => {
            warn!("failed to create reader control pipe: {e}");
            return;
        }
    };
    *shared.control_write.lock().unwrap() = Some(control_write);

    let thread_shared = Arc::clone(shared);
    let handle = std::thread::spawn(move || data_thread_loop(thread_shared, control_read, dvr_fd));
    *shared.data_thread.lock().unwrap() = Some(handle);
}

/// Closes the control pipe's write end, which wakes the data thread's poll
/// with `POLLHUP` on the read end, then joins it. Idempotent.
fn stop_data_thread(shared: &Arc<Shared>) {
    shared.control_write.lock().unwrap().take();
    if let Some(handle) = shared.data_thread.lock().unwrap().take() {
        let _ = handle.join();
    }
}

/// Mirrors `dvb_reader_data_thread_proc`'s poll/read/resync loop: a long
/// idle timeout on {control pipe, DVR tap}, `EAGAIN`/`EOVERFLOW` treated as
/// transient, any of `POLLHUP`/`POLLERR`/`POLLNVAL` on the DVR fd or any
/// readiness on the control pipe ending the loop.
fn data_thread_loop(shared: Arc<Shared>, control_read: OwnedFd, dvr_fd: std::os::fd::RawFd) {
    let mut resync = Resynchroniser::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let dvr_borrowed = unsafe { BorrowedFd::borrow_raw(dvr_fd) };

    let final_status = 'outer: loop {
        let mut fds = [
            PollFd::new(control_read.as_fd(), PollFlags::POLLIN),
            PollFd::new(dvr_borrowed, PollFlags::POLLIN),
        ];

        let ready = match poll(&mut fds, PollTimeout::try_from(DATA_POLL_TIMEOUT).unwrap_or(PollTimeout::MAX)) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!("poll on DVR tap failed: {e}");
                break DvbStreamStatus::Eos;
            }
        };

        if ready == 0 {
            continue; // 15s keep-alive tick, nothing to do.
        }

        let control_revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if control_revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            break DvbStreamStatus::Stopped;
        }

        let dvr_revents = fds[1].revents().unwrap_or(PollFlags::empty());
        if dvr_revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL) {
            break DvbStreamStatus::Eos;
        }

        if dvr_revents.contains(PollFlags::POLLIN) {
            match nix::unistd::read(dvr_borrowed, &mut buf) {
                Ok(0) => break 'outer DvbStreamStatus::Eos,
                Ok(n) => {
                    let shared = &shared;
                    let mut tracker = shared.tracker.lock().unwrap();
                    resync.feed(&buf[..n], |packet| process_packet(shared, &mut tracker, packet));
                    drop(tracker);
                    shared.fabric.flush_all();
                }
                Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::EOVERFLOW) => {
                    debug!("DVR tap buffer overflow, continuing");
                    continue;
                }
                Err(e) => {
                    warn!("read from DVR tap failed: {e}");
                    break DvbStreamStatus::Eos;
                }
            }
        }
    };

    shared.fabric.broadcast_eos();
    set_stream_status(&shared, final_status);
}

fn process_packet(shared: &Arc<Shared>, tracker: &mut PsiTracker, packet: TsPacket) {
    let out = tracker.feed(&packet);

    for event in out.events {
        shared.status.emit(event);
    }

    if let Some(pat) = out.rewritten_pat {
        *shared.last_pat.lock().unwrap() = Some(pat);
    }
    if let Some(pmt) = out.rewritten_pmt {
        *shared.last_pmt.lock().unwrap() = Some(pmt.clone());
        if let Some(pat) = shared.last_pat.lock().unwrap().clone() {
            shared.fabric.reprime_all(&pat, &pmt);
        }
    }

    let mask = tracker.active_pids().mask_for(packet.pid()).unwrap_or(FilterMask::empty());
    shared.fabric.dispatch(&packet, mask);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DeliverySystem, ModulationCode, Polarisation, RollOffCode};
    use crate::status::CallbackSink;
    use crate::tuner::fake::PipeTuner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn test_config() -> TunerConfig {
        TunerConfig {
            frequency: 12_500_000,
            symbol_rate: 27_500_000,
            polarisation: Polarisation::Horizontal,
            satellite_port: 0,
            delivery_system: DeliverySystem::DvbS2,
            modulation: ModulationCode::Psk8,
            roll_off: RollOffCode::R35,
        }
    }

    #[test]
    fn tune_failure_surfaces_tune_failed_status() {
        let mut tuner = PipeTuner::new();
        tuner.fail_tune = true;
        let events: Arc<StdMutex<Vec<StatusEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let status: Arc<dyn StatusSink> = Arc::new(CallbackSink::new(move |e| events_clone.lock().unwrap().push(e)));

        let reader = DvbReader::new(Box::new(tuner), status);
        reader.tune(test_config(), 100, Some(1));

        // Give the event thread a moment to process the command.
        std::thread::sleep(Duration::from_millis(100));

        let seen = events.lock().unwrap();
        assert!(seen.iter().any(|e| matches!(e, StatusEvent::TuneIn { .. })));
        assert!(seen.iter().any(|e| matches!(e, StatusEvent::StreamStatusChanged(DvbStreamStatus::TuneFailed))));
        reader.shutdown();
    }

    #[test]
    fn successful_tune_starts_streaming_and_reaches_running() {
        let tuner = PipeTuner::new();
        let seen_running = Arc::new(AtomicUsize::new(0));
        let seen_running_clone = Arc::clone(&seen_running);
        let status: Arc<dyn StatusSink> = Arc::new(CallbackSink::new(move |e| {
            if matches!(e, StatusEvent::StreamStatusChanged(DvbStreamStatus::Running)) {
                seen_running_clone.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let reader = DvbReader::new(Box::new(tuner), status);
        reader.tune(test_config(), 100, Some(7));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(reader.stream_status(), DvbStreamStatus::Running);
        assert_eq!(reader.currently_tuned_channel(), Some(7));
        assert_eq!(seen_running.load(Ordering::SeqCst), 1);
        reader.shutdown();
    }
}
