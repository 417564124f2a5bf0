//! An in-memory `TunerDriver` for tests: no hardware, a real pipe fd so the
//! reader coordinator's poll-based data thread can be exercised unchanged.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use super::{TunerDriver, TunerState};
use crate::channel::TunerConfig;
use crate::error::TunerError;

pub struct PipeTuner {
    state: TunerState,
    read_end: Option<OwnedFd>,
    write_end: Option<OwnedFd>,
    pub tuned_with: Option<TunerConfig>,
    pub fail_tune: bool,
}

impl PipeTuner {
    pub fn new() -> Self {
        PipeTuner {
            state: TunerState::FrontendOpen,
            read_end: None,
            write_end: None,
            tuned_with: None,
            fail_tune: false,
        }
    }

    /// Feed raw bytes into the stream the reader coordinator consumes, as
    /// if they had just arrived from the hardware DVR tap.
    pub fn write_end(&self) -> RawFd {
        self.write_end.as_ref().expect("tuned").as_raw_fd()
    }
}

impl Default for PipeTuner {
    fn default() -> Self {
        Self::new()
    }
}

impl TunerDriver for PipeTuner {
    fn state(&self) -> TunerState {
        self.state
    }

    fn tune(&mut self, config: &TunerConfig, _pids: &[u16]) -> Result<(), TunerError> {
        if self.fail_tune {
            return Err(TunerError::LockTimeout);
        }
        let (read_end, write_end) = nix::unistd::pipe().map_err(|e| {
            TunerError::IoctlFailed("pipe", std::io::Error::from(e))
        })?;
        self.read_end = Some(read_end);
        self.write_end = Some(write_end);
        self.tuned_with = Some(*config);
        self.state = TunerState::Streaming;
        Ok(())
    }

    fn add_pid(&mut self, _pid: u16) -> Result<(), TunerError> {
        Ok(())
    }

    fn stop(&mut self) {
        self.read_end = None;
        self.write_end = None;
        self.state = TunerState::Closed;
    }

    fn signal_strength(&self) -> Result<f32, TunerError> {
        Ok(1.0)
    }

    fn dvr_fd(&self) -> Option<RawFd> {
        self.read_end.as_ref().map(|f| f.as_raw_fd())
    }
}
