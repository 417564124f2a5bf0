//! Status event taxonomy.
//!
//! The original implementation's property-bus events become a single
//! callback whose payload is this tagged enum; constructor arguments replace
//! its name/value property set. Status delivery is fire-and-forget:
//! observers are expected to be cheap (push to a channel, update a counter)
//! since the emitting thread is never blocked waiting for a subscriber.
//!
//! Grounded on `examples/original_source/events.h`'s
//! `DVBRecorderEventType`/`DVBRecorderEventTuneIn` tag set (see
//! `SPEC_FULL.md` §4 "Status event ordering"): the reader coordinator emits
//! `TuneIn` with the full hardware-facing payload before attempting the
//! tune, so an observer can reconstruct the attempt without a round-trip
//! through the channel database collaborator.

use crate::channel::{DeliverySystem, ModulationCode, Polarisation, RollOffCode};

/// Stream (reader pipeline) lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvbStreamStatus {
    Unknown,
    Tuned,
    TuneFailed,
    Running,
    Stopped,
    Eos,
}

/// Recorder lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvbRecordStatus {
    Unknown,
    Recording,
    Stopped,
}

/// Per-listener status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvbListenerStatus {
    Unknown,
    Eos,
    Terminated,
    WriteError,
}

/// Opaque handle identifying a registered listener in status events,
/// independent of whether it was registered by fd or by callback (spec
/// §9: "do not perpetuate the dual-field pattern").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// The single tagged event type surfaced to host-process observers.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// Emitted once per `tune()` call, before the tuner driver is touched
    /// (`events.h`'s `DVB_RECORDER_EVENT_TUNE_IN`).
    TuneIn {
        frequency: u32,
        polarisation: Polarisation,
        satellite_port: u8,
        delivery_system: DeliverySystem,
        modulation: ModulationCode,
        roll_off: RollOffCode,
        symbol_rate: u32,
        program_number: u16,
    },
    StreamStatusChanged(DvbStreamStatus),
    RecordStatusChanged(DvbRecordStatus),
    ListenerStatusChanged {
        listener: ListenerId,
        status: DvbListenerStatus,
    },
    /// An `EitTable` (identified by its table_id) was replaced wholesale.
    EitChanged(u8),
    SdtChanged,
    ChannelChanged(u32),
    /// The video elementary stream stopped delivering packets (not
    /// implemented as an active check by this crate's reader coordinator;
    /// kept as a variant so downstream consumers have a stable place to
    /// plug stall detection in).
    VideoDied,
}

/// Sink for status events. The reader coordinator, recorder and listener
/// fabric all emit through one of these per `DvbReader` instance.
///
/// `Sync` is required alongside `Send` because every implementor is shared
/// as `Arc<dyn StatusSink>` across the event/data/listener-worker threads;
/// without it `Arc<dyn StatusSink>` would not itself be `Send`.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// A `StatusSink` that forwards to a plain closure, for host processes
/// that don't need a richer subscription model.
pub struct CallbackSink<F: Fn(StatusEvent) + Send + Sync> {
    callback: F,
}

impl<F: Fn(StatusEvent) + Send + Sync> CallbackSink<F> {
    pub fn new(callback: F) -> Self {
        CallbackSink { callback }
    }
}

impl<F: Fn(StatusEvent) + Send + Sync> StatusSink for CallbackSink<F> {
    fn emit(&self, event: StatusEvent) {
        (self.callback)(event);
    }
}
