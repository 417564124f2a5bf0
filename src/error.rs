//! Error taxonomy for the reader pipeline.
//!
//! Nothing here unwinds across a thread boundary: each
//! subsystem converts its own errors into a `StatusEvent` or a plain return
//! value at the point where the thread would otherwise observe them.

use thiserror::Error;

/// Errors that can occur while opening or tuning the frontend.
#[derive(Error, Debug)]
pub enum TunerError {
    #[error("failed to open DVB device: {0}")]
    DeviceOpen(#[source] std::io::Error),

    #[error("frontend does not support QPSK/DVB-S delivery systems")]
    UnsupportedFrontend,

    #[error("ioctl {0} failed: {1}")]
    IoctlFailed(&'static str, #[source] std::io::Error),

    #[error("timed out waiting for frontend lock")]
    LockTimeout,

    #[error("tuner is not available on this platform")]
    Unsupported,
}

/// Errors surfaced while decoding a PSI/SI section. Always non-fatal to the
/// pipeline: the tracker logs and discards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    #[error("section too short")]
    TooShort,
    #[error("section failed CRC check")]
    CrcMismatch,
    #[error("section has an unexpected table id")]
    WrongTableId,
    #[error("section data malformed: {0}")]
    Malformed(&'static str),
}

/// Errors surfaced by a listener's worker thread.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("write to listener fd failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("ten consecutive write timeouts")]
    TimedOut,
}

/// Errors surfaced by `Recorder::record_start`.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("stream status is not Running")]
    NotRunning,
    #[error("failed to open recording file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the channel/schedule database collaborator.
#[derive(Error, Debug)]
pub enum DbError {
    #[cfg(feature = "database")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("channel {0} not found")]
    ChannelNotFound(u32),
    #[error("schedule entry {0} not found")]
    ScheduleNotFound(u32),
    #[error("invalid schedule interval: start {0} >= end {1}")]
    InvalidInterval(u64, u64),
}
