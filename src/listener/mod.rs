//! Listener fabric: holds the set of registered consumers,
//! fans out matched packets with per-listener isolation, and primes each
//! new consumer with the current PAT/PMT before any payload.
//!
//! The reference implementation's proxy server is a tokio TCP accept loop,
//! not a filtered broadcast fabric, so the worker/queue shape here is built
//! directly from the fan-out/back-pressure requirements, using the same
//! std::thread/Mutex/Condvar primitives the tuner driver's mutex discipline
//! relies on elsewhere in this crate.

mod worker;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::packet::{FilterMask, TsPacket};
use crate::status::{DvbListenerStatus, ListenerId, StatusEvent, StatusSink};

pub use worker::ListenerSink;

/// Maximum coalescing-buffer size before a `Data` message is flushed,
/// rounded down from 4096 to a whole number of 188-byte packets (spec
/// §4.E): `4096 / 188 = 21`, i.e. 3948 bytes.
pub const COALESCE_CAP: usize = (4096 / crate::packet::TS_PACKET_SIZE) * crate::packet::TS_PACKET_SIZE;

/// Messages exchanged between the fan-out path and a listener's worker
/// thread.
#[derive(Debug, Clone)]
pub enum ListenerMessage {
    Data(Vec<u8>),
    Drop,
    Continue,
    Quit,
    Eos,
}

#[derive(Debug, Default)]
struct ListenerFlags {
    have_pat: AtomicBool,
    have_pmt: AtomicBool,
    write_error: AtomicBool,
    eos: AtomicBool,
    terminate: AtomicBool,
    running: AtomicBool,
}

/// A listener's bounded-in-practice message queue, shared between the
/// fan-out path (producer) and the listener's worker (consumer).
struct MessageQueue {
    messages: Mutex<VecDeque<ListenerMessage>>,
    condvar: Condvar,
}

impl MessageQueue {
    fn new() -> Self {
        MessageQueue {
            messages: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    fn push_back(&self, message: ListenerMessage) {
        let mut queue = self.messages.lock().unwrap();
        queue.push_back(message);
        self.condvar.notify_one();
    }

    fn push_front(&self, message: ListenerMessage) {
        let mut queue = self.messages.lock().unwrap();
        queue.push_front(message);
        self.condvar.notify_one();
    }

    fn purge_data(&self) {
        let mut queue = self.messages.lock().unwrap();
        queue.retain(|m| !matches!(m, ListenerMessage::Data(_)));
    }
}

/// A registered listener: identity, filter, flags and message queue. The
/// coalescing buffer lives only inside the fan-out path, not
/// here, since only the thread calling `dispatch` ever touches it.
struct ListenerEntry {
    id: ListenerId,
    sink: ListenerSink,
    filter: FilterMask,
    flags: Arc<ListenerFlags>,
    queue: Arc<MessageQueue>,
    coalesce: Mutex<Vec<u8>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

/// Holds the active listener set under a dedicated mutex.
pub struct ListenerFabric {
    next_id: AtomicU64,
    listeners: Mutex<Vec<ListenerEntry>>,
    status: Arc<dyn StatusSink>,
    /// Most recently primed PAT/PMT, kept so `set_running(id, true)` can
    /// re-prime a resumed listener without its caller having to remember
    /// and resupply them.
    last_pat: Mutex<Option<Vec<TsPacket>>>,
    last_pmt: Mutex<Option<Vec<TsPacket>>>,
}

impl ListenerFabric {
    pub fn new(status: Arc<dyn StatusSink>) -> Self {
        ListenerFabric {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            status,
            last_pat: Mutex::new(None),
            last_pmt: Mutex::new(None),
        }
    }

    /// Register (or reconfigure) a listener.
    ///
    /// Reconfiguration is matched by fd identity when `sink` is an `Fd`,
    /// else by callback identity; in both cases the existing queue is
    /// cleared and transient flags reset rather than creating a second
    /// worker.
    pub fn set_listener(
        &self,
        filter: FilterMask,
        sink: ListenerSink,
        primed_pat: Option<&[TsPacket]>,
        primed_pmt: Option<&[TsPacket]>,
    ) -> ListenerId {
        let mut listeners = self.listeners.lock().unwrap();

        if let Some(existing) = listeners.iter_mut().find(|l| l.sink.same_identity(&sink)) {
            existing.filter = filter;
            existing.queue.messages.lock().unwrap().clear();
            existing.flags.have_pat.store(false, Ordering::SeqCst);
            existing.flags.have_pmt.store(false, Ordering::SeqCst);
            existing.flags.write_error.store(false, Ordering::SeqCst);
            existing.flags.eos.store(false, Ordering::SeqCst);
            existing.flags.running.store(false, Ordering::SeqCst);
            existing.flags.terminate.store(false, Ordering::SeqCst);
            let id = existing.id;
            drop(listeners);
            self.prime(id, primed_pat, primed_pmt);
            self.resume(id);
            return id;
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let flags = Arc::new(ListenerFlags::default());
        let queue = Arc::new(MessageQueue::new());

        let handle = worker::spawn(id, sink.clone(), Arc::clone(&flags), Arc::clone(&queue), Arc::clone(&self.status));

        listeners.push(ListenerEntry {
            id,
            sink,
            filter,
            flags,
            queue,
            coalesce: Mutex::new(Vec::with_capacity(COALESCE_CAP)),
            worker: Some(handle),
        });
        drop(listeners);

        self.prime(id, primed_pat, primed_pmt);
        self.resume(id);
        id
    }

    fn prime(&self, id: ListenerId, pat: Option<&[TsPacket]>, pmt: Option<&[TsPacket]>) {
        if let Some(pat) = pat {
            *self.last_pat.lock().unwrap() = Some(pat.to_vec());
        }
        if let Some(pmt) = pmt {
            *self.last_pmt.lock().unwrap() = Some(pmt.to_vec());
        }

        let listeners = self.listeners.lock().unwrap();
        let Some(entry) = listeners.iter().find(|l| l.id == id) else {
            return;
        };
        if let Some(pat) = pat {
            for packet in pat {
                entry.queue.push_back(ListenerMessage::Data(packet.as_bytes().to_vec()));
            }
            entry.flags.have_pat.store(true, Ordering::SeqCst);
            if let Some(pmt) = pmt {
                for packet in pmt {
                    entry.queue.push_back(ListenerMessage::Data(packet.as_bytes().to_vec()));
                }
                entry.flags.have_pmt.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Mark a listener running and unblock its worker with a priority
    /// `Continue` message, without touching priming. Internal to
    /// registration/reconfiguration; `set_running` is the public
    /// pause/resume entry point and re-primes on the way back up.
    fn resume(&self, id: ListenerId) {
        let listeners = self.listeners.lock().unwrap();
        if let Some(entry) = listeners.iter().find(|l| l.id == id) {
            entry.flags.running.store(true, Ordering::SeqCst);
            entry.queue.push_front(ListenerMessage::Continue);
        }
    }

    /// Pause or resume a registered listener's delivery independent of
    /// `set_listener` reconfiguration, mirroring the original's
    /// `dvb_reader_listener_set_running`. Resuming discards whatever data
    /// piled up while paused and re-primes the listener with the most
    /// recently known PAT/PMT first, the same `running=false -> true`
    /// transition `set_listener` itself triggers on registration.
    pub fn set_running(&self, id: ListenerId, running: bool) {
        if running {
            {
                let listeners = self.listeners.lock().unwrap();
                if let Some(entry) = listeners.iter().find(|l| l.id == id) {
                    entry.queue.purge_data();
                }
            }
            let pat = self.last_pat.lock().unwrap().clone();
            let pmt = self.last_pmt.lock().unwrap().clone();
            self.prime(id, pat.as_deref(), pmt.as_deref());
            self.resume(id);
        } else {
            let listeners = self.listeners.lock().unwrap();
            if let Some(entry) = listeners.iter().find(|l| l.id == id) {
                entry.flags.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Remove a listener, sending `Quit` and joining its worker.
    pub fn remove_listener(&self, id: ListenerId) {
        let removed = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.iter().position(|l| l.id == id).map(|idx| listeners.remove(idx))
        };
        if let Some(mut entry) = removed {
            entry.queue.push_front(ListenerMessage::Quit);
            if let Some(handle) = entry.worker.take() {
                let _ = handle.join();
            }
        }
    }

    /// Fan one packet out to every listener whose filter matches. PAT/PMT
    /// PIDs are never forwarded live; they only reach listeners through
    /// priming.
    pub fn dispatch(&self, packet: &TsPacket, mask: FilterMask) {
        if mask.intersects(FilterMask::PAT | FilterMask::PMT) {
            return;
        }

        let listeners = self.listeners.lock().unwrap();
        for entry in listeners.iter() {
            if entry.flags.write_error.load(Ordering::SeqCst) {
                continue;
            }
            if !entry.filter.intersects(mask) {
                continue;
            }
            self.coalesce_and_maybe_flush(entry, packet);
        }
    }

    fn coalesce_and_maybe_flush(&self, entry: &ListenerEntry, packet: &TsPacket) {
        let mut buffer = entry.coalesce.lock().unwrap();
        buffer.extend_from_slice(packet.as_bytes());
        if buffer.len() >= COALESCE_CAP {
            let flushed = std::mem::replace(&mut *buffer, Vec::with_capacity(COALESCE_CAP));
            entry.queue.push_back(ListenerMessage::Data(flushed));
        }
    }

    /// Flush every listener's partially filled coalescing buffer. Called
    /// by the reader coordinator between read cycles so data isn't held
    /// indefinitely below the cap.
    pub fn flush_all(&self) {
        let listeners = self.listeners.lock().unwrap();
        for entry in listeners.iter() {
            let mut buffer = entry.coalesce.lock().unwrap();
            if !buffer.is_empty() {
                let flushed = std::mem::replace(&mut *buffer, Vec::with_capacity(COALESCE_CAP));
                entry.queue.push_back(ListenerMessage::Data(flushed));
            }
        }
    }

    /// Broadcast end-of-stream to every listener.
    pub fn broadcast_eos(&self) {
        let listeners = self.listeners.lock().unwrap();
        for entry in listeners.iter() {
            entry.queue.push_back(ListenerMessage::Eos);
        }
    }

    /// Re-prime every currently registered listener with a fresh PAT/PMT,
    /// e.g. after a retune. Listeners are re-primed on every retune and on
    /// every `running=false -> true` transition (see `DESIGN.md`).
    pub fn reprime_all(&self, pat: &[TsPacket], pmt: &[TsPacket]) {
        *self.last_pat.lock().unwrap() = Some(pat.to_vec());
        *self.last_pmt.lock().unwrap() = Some(pmt.to_vec());

        let listeners = self.listeners.lock().unwrap();
        for entry in listeners.iter() {
            for packet in pat {
                entry.queue.push_back(ListenerMessage::Data(packet.as_bytes().to_vec()));
            }
            entry.flags.have_pat.store(true, Ordering::SeqCst);
            for packet in pmt {
                entry.queue.push_back(ListenerMessage::Data(packet.as_bytes().to_vec()));
            }
            entry.flags.have_pmt.store(true, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl worker::FlagsHandle for ListenerFlags {
    fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    fn write_error(&self) {
        self.write_error.store(true, Ordering::SeqCst);
    }

    fn eos(&self) {
        self.eos.store(true, Ordering::SeqCst);
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }
}

pub(crate) fn emit(status: &Arc<dyn StatusSink>, listener: ListenerId, event: DvbListenerStatus) {
    status.emit(StatusEvent::ListenerStatusChanged { listener, status: event });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::CallbackSink;
    use std::sync::{Arc, Mutex as StdMutex};

    fn test_packet(pid: u16, marker: u8) -> TsPacket {
        let mut bytes = [0u8; crate::packet::TS_PACKET_SIZE];
        bytes[0] = crate::packet::SYNC_BYTE;
        bytes[1] = 0x00 | ((pid >> 8) as u8 & 0x1F);
        bytes[2] = pid as u8;
        bytes[3] = 0x10; // payload only
        bytes[4] = marker;
        TsPacket::from_raw(bytes)
    }

    #[test]
    fn new_listener_receives_priming_before_payload() {
        let events: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let status: Arc<dyn StatusSink> = Arc::new(CallbackSink::new(|_| {}));
        let fabric = ListenerFabric::new(status);

        let sink = ListenerSink::Cb(Arc::new(move |bytes: &[u8]| {
            events_clone.lock().unwrap().push(bytes.to_vec());
        }));

        let pat = test_packet(0, 0xAA);
        let pmt = test_packet(4096, 0xBB);
        fabric.set_listener(
            FilterMask::ALL,
            sink,
            Some(std::slice::from_ref(&pat)),
            Some(std::slice::from_ref(&pmt)),
        );

        std::thread::sleep(std::time::Duration::from_millis(50));
        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0][4], 0xAA);
        assert_eq!(seen[1][4], 0xBB);
    }

    #[test]
    fn pausing_a_listener_stops_delivery_and_resuming_reprimes_it() {
        let events: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let status: Arc<dyn StatusSink> = Arc::new(CallbackSink::new(|_| {}));
        let fabric = ListenerFabric::new(status);

        let sink = ListenerSink::Cb(Arc::new(move |bytes: &[u8]| {
            events_clone.lock().unwrap().push(bytes.to_vec());
        }));

        let pat = test_packet(0, 0xAA);
        let pmt = test_packet(4096, 0xBB);
        let id = fabric.set_listener(
            FilterMask::ALL,
            sink,
            Some(std::slice::from_ref(&pat)),
            Some(std::slice::from_ref(&pmt)),
        );
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(events.lock().unwrap().len(), 2, "priming on registration");

        fabric.set_running(id, false);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let payload = test_packet(256, 0xCC);
        fabric.dispatch(&payload, FilterMask::VIDEO);
        fabric.flush_all();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(events.lock().unwrap().len(), 2, "no delivery while paused");

        fabric.set_running(id, true);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 4, "resume re-primes with PAT/PMT before anything else");
        assert_eq!(seen[2][4], 0xAA);
        assert_eq!(seen[3][4], 0xBB);
    }
}
