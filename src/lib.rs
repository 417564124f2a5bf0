//! `dvbreader`: tunes a DVB-S/S2 receiver to a single service, tracks its
//! PSI/SI tables, rewrites a minimal PAT/PMT for downstream consumers, and
//! fans the filtered transport stream out to recorders and live listeners
//! (see `SPEC_FULL.md`).
//!
//! Module layout follows
//! `examples/stuayu-recisdb-proxy-rs/recisdb-rs/src/lib.rs`: one top-level
//! module per subsystem, re-exported flat rather than behind a facade type,
//! since callers assemble their own pipeline out of `DvbReader`, `Recorder`,
//! `Scheduler` and `Database` instead of driving a single god object.

pub mod channel;
#[cfg(feature = "database")]
pub mod db;
pub mod error;
pub mod listener;
pub mod packet;
pub mod psi;
pub mod reader;
pub mod recorder;
pub mod resync;
pub mod scheduler;
pub mod status;
pub mod text;
pub mod tracker;
pub mod tuner;

pub use channel::{ChannelRecord, TunerConfig};
pub use reader::DvbReader;
pub use recorder::Recorder;
pub use scheduler::Scheduler;
pub use status::{StatusEvent, StatusSink};
