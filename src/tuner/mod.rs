//! Tuner driver: opens a DVB-S/S2 frontend, programs DiSEqC/LNB/property
//! state, waits for lock, installs per-PID demux filters and returns the
//! DVR tap as a readable byte stream (spec §4.A).
//!
//! Grounded on `examples/mich181189-libdvb/src/fe/mod.rs` for the
//! open/get_info/set_properties/diseqc_master_cmd/read_status call shapes
//! and on `examples/other_examples/09a52bf8_hiroshiyui-epgrab__src-scan.rs.rs`
//! for the demux filter install sequence. The raw ioctl bindings live in
//! `sys`; this module owns the state machine and the DiSEqC/property
//! sequencing the original's `dvb-tuner.c` performs.

pub mod sys;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::channel::{DeliverySystem, ModulationCode, Polarisation, RollOffCode, TunerConfig};
use crate::error::TunerError;
use sys::*;

const HIGH_BAND_THRESHOLD_KHZ: u32 = 11_700_000;
const HIGH_BAND_LO_KHZ: u32 = 10_600_000;
const LOW_BAND_LO_KHZ: u32 = 9_750_000;

const DISEQC_SETTLE: Duration = Duration::from_millis(15);
const LOCK_EVENT_TIMEOUT: Duration = Duration::from_secs(3);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// `Closed -> FrontendOpen -> Tuned -> Streaming -> Closed`. Retune always
/// transitions back through `Closed` first (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerState {
    Closed,
    FrontendOpen,
    Tuned,
    Streaming,
}

/// Abstraction over the hardware tuner so the reader coordinator (and its
/// tests) don't depend on `/dev/dvb` existing. `LinuxTuner` is the real
/// implementation; `fake::PipeTuner` stands in for tests.
pub trait TunerDriver: Send {
    fn state(&self) -> TunerState;
    fn tune(&mut self, config: &TunerConfig, pids: &[u16]) -> Result<(), TunerError>;
    fn add_pid(&mut self, pid: u16) -> Result<(), TunerError>;
    fn stop(&mut self);
    /// 0.0..=1.0, derived from `FE_READ_SIGNAL_STRENGTH / 65535`.
    fn signal_strength(&self) -> Result<f32, TunerError>;
    /// The DVR tap fd, once `Streaming`.
    fn dvr_fd(&self) -> Option<RawFd>;
}

struct DemuxFilter {
    file: std::fs::File,
}

/// Real Linux DVB frontend/demux/DVR driver.
pub struct LinuxTuner {
    adapter: u32,
    state: TunerState,
    frontend: Option<std::fs::File>,
    caps: FeCaps,
    filters: Vec<DemuxFilter>,
    dvr: Option<std::fs::File>,
}

impl LinuxTuner {
    /// Opens `/dev/dvb/adapter<N>/frontend0` and queries its capabilities.
    /// Fails with `UnsupportedFrontend` unless the frontend reports
    /// `FE_QPSK` (DVB-S/S2 only; spec §4.A contract).
    pub fn open(adapter_index: u32) -> Result<Self, TunerError> {
        let path = format!("/dev/dvb/adapter{}/frontend0", adapter_index);
        let frontend = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(&path)
            .map_err(TunerError::DeviceOpen)?;

        let mut info = FeInfo::default();
        unsafe { fe_get_info(frontend.as_raw_fd(), &mut info as *mut _) }
            .map_err(|e| TunerError::IoctlFailed("FE_GET_INFO", std::io::Error::from(e)))?;

        if info.fe_type != FeType::FeQpsk as u32 {
            return Err(TunerError::UnsupportedFrontend);
        }

        info!("opened frontend {} ({:?})", path, cstr_to_string(&info.name));

        Ok(LinuxTuner {
            adapter: adapter_index,
            state: TunerState::FrontendOpen,
            frontend: Some(frontend),
            caps: FeCaps::from_bits_truncate(info.caps),
            filters: Vec::new(),
            dvr: None,
        })
    }

    fn frontend_fd(&self) -> RawFd {
        self.frontend.as_ref().expect("frontend open in Tuned/Streaming state").as_raw_fd()
    }

    /// Steps 1-2 of spec §4.A: band/tone selection and the DiSEqC burst.
    fn program_diseqc(&self, config: &TunerConfig) -> Result<u32, TunerError> {
        let fd = self.frontend_fd();
        let (band_offset, high_band) = if config.frequency > HIGH_BAND_THRESHOLD_KHZ {
            (HIGH_BAND_LO_KHZ, true)
        } else {
            (LOW_BAND_LO_KHZ, false)
        };

        unsafe { fe_set_tone(fd, FeSecTone::ToneOff as i32) }
            .map_err(|e| TunerError::IoctlFailed("FE_SET_TONE(off)", std::io::Error::from(e)))?;

        let voltage = if config.polarisation.is_high_voltage() {
            FeSecVoltage::Voltage18
        } else {
            FeSecVoltage::Voltage13
        };
        unsafe { fe_set_voltage(fd, voltage as i32) }
            .map_err(|e| TunerError::IoctlFailed("FE_SET_VOLTAGE", std::io::Error::from(e)))?;
        std::thread::sleep(DISEQC_SETTLE);

        // flags = 0xf0 | ((sat_no<<2)&0x0f) | ((polarisation?1:0)<<1) | (tone?1:0)
        let pol_bit: u8 = if config.polarisation.is_high_voltage() { 0 } else { 1 };
        let tone_bit: u8 = if high_band { 1 } else { 0 };
        let flags = 0xF0 | ((config.satellite_port << 2) & 0x0F) | (pol_bit << 1) | tone_bit;
        let mut cmd = DiseqcMasterCmd {
            msg: [0xE0, 0x10, 0x38, flags, 0x00, 0x00],
            len: 4,
        };
        unsafe { fe_diseqc_send_master_cmd(fd, &mut cmd as *mut _) }
            .map_err(|e| TunerError::IoctlFailed("FE_DISEQC_SEND_MASTER_CMD", std::io::Error::from(e)))?;
        std::thread::sleep(DISEQC_SETTLE);

        let burst = if config.satellite_port & 0x02 != 0 {
            FeSecMiniCmd::MiniB
        } else {
            FeSecMiniCmd::MiniA
        };
        unsafe { fe_diseqc_send_burst(fd, burst as i32) }
            .map_err(|e| TunerError::IoctlFailed("FE_DISEQC_SEND_BURST", std::io::Error::from(e)))?;
        std::thread::sleep(DISEQC_SETTLE);

        let final_tone = if high_band { FeSecTone::ToneOn } else { FeSecTone::ToneOff };
        unsafe { fe_set_tone(fd, final_tone as i32) }
            .map_err(|e| TunerError::IoctlFailed("FE_SET_TONE(final)", std::io::Error::from(e)))?;

        Ok(config.frequency - band_offset)
    }

    /// Step 3: the DTV property sequence.
    fn program_properties(&self, config: &TunerConfig, intermediate_freq: u32) -> Result<(), TunerError> {
        let delivery_system = match config.delivery_system {
            DeliverySystem::DvbS => fe_delivery_system::SYS_DVBS,
            DeliverySystem::DvbS2 => fe_delivery_system::SYS_DVBS2,
        };
        let modulation = match config.modulation {
            ModulationCode::Qpsk => fe_modulation::QPSK,
            ModulationCode::Psk8 => fe_modulation::PSK_8,
            ModulationCode::Apsk16 => fe_modulation::APSK_16,
            ModulationCode::Apsk32 => fe_modulation::APSK_32,
        };
        let roll_off = match config.roll_off {
            RollOffCode::R20 => fe_rolloff::ROLLOFF_20,
            RollOffCode::R25 => fe_rolloff::ROLLOFF_25,
            RollOffCode::R35 => fe_rolloff::ROLLOFF_35,
            RollOffCode::Auto => fe_rolloff::ROLLOFF_AUTO,
        };
        let inversion = if self.caps.contains(FeCaps::FE_CAN_INVERSION_AUTO) {
            fe_spectral_inversion::INVERSION_AUTO
        } else {
            0 // INVERSION_OFF
        };

        let props = [
            DtvProperty::new(dtv_cmd::DTV_DELIVERY_SYSTEM, delivery_system),
            DtvProperty::new(dtv_cmd::DTV_FREQUENCY, intermediate_freq),
            DtvProperty::new(dtv_cmd::DTV_MODULATION, modulation),
            DtvProperty::new(dtv_cmd::DTV_SYMBOL_RATE, config.symbol_rate),
            DtvProperty::new(dtv_cmd::DTV_INNER_FEC, fe_code_rate::FEC_AUTO),
            DtvProperty::new(dtv_cmd::DTV_INVERSION, inversion),
            DtvProperty::new(dtv_cmd::DTV_ROLLOFF, roll_off),
            DtvProperty::new(dtv_cmd::DTV_PILOT, fe_pilot::PILOT_AUTO),
            DtvProperty::new(dtv_cmd::DTV_TUNE, 0),
        ];

        unsafe { sys::set_properties(self.frontend_fd(), &props) }
            .map_err(|e| TunerError::IoctlFailed("FE_SET_PROPERTY", std::io::Error::from(e)))
    }

    /// Step 4: wait for a frontend event, then poll `FE_READ_STATUS`.
    fn wait_for_lock(&self) -> Result<(), TunerError> {
        let fd = self.frontend_fd();

        let mut event = FeEvent::default();
        let event_deadline = Instant::now() + LOCK_EVENT_TIMEOUT;
        while Instant::now() < event_deadline {
            match unsafe { fe_get_event(fd, &mut event as *mut _) } {
                Ok(_) => break,
                Err(nix::errno::Errno::EAGAIN) => std::thread::sleep(LOCK_POLL_INTERVAL),
                Err(e) => {
                    debug!("FE_GET_EVENT returned {e}, falling back to status polling");
                    break;
                }
            }
        }

        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            let mut raw = 0u32;
            unsafe { fe_read_status(fd, &mut raw as *mut _) }
                .map_err(|e| TunerError::IoctlFailed("FE_READ_STATUS", std::io::Error::from(e)))?;
            let status = FeStatus::from_bits_truncate(raw);
            if status.contains(FeStatus::FE_HAS_LOCK) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TunerError::LockTimeout);
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Step 5: install a PES filter for `pid` on the demux device.
    fn install_pid_filter(&mut self, pid: u16) -> Result<(), TunerError> {
        let path = format!("/dev/dvb/adapter{}/demux0", self.adapter);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(&path)
            .map_err(TunerError::DeviceOpen)?;

        let params = DmxPesFilterParams {
            pid,
            input: dmx_input::DMX_IN_FRONTEND,
            output: dmx_output::DMX_OUT_TS_TAP,
            pes_type: dmx_pes_type::DMX_PES_OTHER,
            flags: DMX_IMMEDIATE_START,
        };
        unsafe { dmx_set_pes_filter(file.as_raw_fd(), &params as *const _) }
            .map_err(|e| TunerError::IoctlFailed("DMX_SET_PES_FILTER", std::io::Error::from(e)))?;
        unsafe { sys::start_filter(file.as_raw_fd()) }
            .map_err(|e| TunerError::IoctlFailed("DMX_START", std::io::Error::from(e)))?;

        self.filters.push(DemuxFilter { file });
        Ok(())
    }

    /// Step 6: open the DVR tap, read-only, non-blocking.
    fn open_dvr(&mut self) -> Result<(), TunerError> {
        let path = format!("/dev/dvb/adapter{}/dvr0", self.adapter);
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(&path)
            .map_err(TunerError::DeviceOpen)?;
        self.dvr = Some(file);
        Ok(())
    }
}

impl TunerDriver for LinuxTuner {
    fn state(&self) -> TunerState {
        self.state
    }

    fn tune(&mut self, config: &TunerConfig, pids: &[u16]) -> Result<(), TunerError> {
        if self.state != TunerState::FrontendOpen {
            self.stop();
            *self = LinuxTuner::open(self.adapter)?;
        }

        let intermediate_freq = self.program_diseqc(config)?;
        self.program_properties(config, intermediate_freq)?;
        self.wait_for_lock()?;
        self.state = TunerState::Tuned;

        for &pid in pids {
            self.install_pid_filter(pid)?;
        }
        self.open_dvr()?;
        self.state = TunerState::Streaming;
        Ok(())
    }

    fn add_pid(&mut self, pid: u16) -> Result<(), TunerError> {
        if self.state != TunerState::Streaming {
            return Err(TunerError::Unsupported);
        }
        self.install_pid_filter(pid)
    }

    fn stop(&mut self) {
        for filter in self.filters.drain(..) {
            if let Err(e) = unsafe { sys::stop_filter(filter.file.as_raw_fd()) } {
                warn!("DMX_STOP failed: {e}");
            }
        }
        self.dvr = None;
        self.frontend = None;
        self.state = TunerState::Closed;
    }

    fn signal_strength(&self) -> Result<f32, TunerError> {
        let mut raw: u16 = 0;
        unsafe { fe_read_signal_strength(self.frontend_fd(), &mut raw as *mut _) }
            .map_err(|e| TunerError::IoctlFailed("FE_READ_SIGNAL_STRENGTH", std::io::Error::from(e)))?;
        Ok(raw as f32 / 65535.0)
    }

    fn dvr_fd(&self) -> Option<RawFd> {
        self.dvr.as_ref().map(|f| f.as_raw_fd())
    }
}

fn cstr_to_string(raw: &[std::ffi::c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
