//! Raw ioctl numbers and wire structs for the Linux DVB frontend and demux
//! APIs (`linux/dvb/frontend.h`, `linux/dvb/dmx.h`).
//!
//! Grounded on `examples/mich181189-libdvb/src/fe/{mod,sys}.rs` for the
//! frontend ioctl numbers (magic byte `b'o'`, `FE_GET_INFO=61` through
//! `FE_GET_PROPERTY=83`) and on
//! `examples/other_examples/09a52bf8_hiroshiyui-epgrab__src-scan.rs.rs` for
//! the demux section-filter ioctl (`DMX_SET_FILTER=43`). `DMX_SET_PES_FILTER`
//! is not directly grounded in the retrieved pack; its number (44) and
//! `dmx_pes_filter_params` layout follow the adjacent, already-grounded
//! `DMX_SET_FILTER=43` in the same kernel header family (see DESIGN.md).

#![allow(non_camel_case_types)]

use std::ffi::c_char;

use nix::{ioctl_read, ioctl_write_int_bad, ioctl_write_ptr, request_code_none};

pub const DVB_IOCTL_MAGIC: u8 = b'o';

bitflags::bitflags! {
    /// `fe_caps` (subset actually consulted by this crate).
    #[derive(Default)]
    pub struct FeCaps: u32 {
        const FE_IS_STUPID             = 0;
        const FE_CAN_INVERSION_AUTO    = 0x1;
        const FE_CAN_FEC_1_2           = 0x2;
        const FE_CAN_FEC_AUTO          = 0x200;
        const FE_CAN_QPSK              = 0x400;
        const FE_CAN_2G_MODULATION     = 0x10000000;
    }
}

bitflags::bitflags! {
    /// `fe_status`.
    #[derive(Default)]
    pub struct FeStatus: u32 {
        const FE_HAS_SIGNAL  = 0x01;
        const FE_HAS_CARRIER = 0x02;
        const FE_HAS_VITERBI = 0x04;
        const FE_HAS_SYNC    = 0x08;
        const FE_HAS_LOCK    = 0x10;
        const FE_TIMEDOUT    = 0x20;
        const FE_REINIT      = 0x40;
    }
}

/// `fe_type`. Only `FE_QDPSK` (satellite) is accepted by `LinuxTuner::open`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeType {
    FeQpsk = 0,
    FeQam = 1,
    FeOfdm = 2,
    FeAtsc = 3,
}

/// `FE_GET_INFO` payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FeInfo {
    pub name: [c_char; 128],
    pub fe_type: u32,
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub frequency_stepsize: u32,
    pub frequency_tolerance: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    pub symbol_rate_tolerance: u32,
    pub notifier_delay: u32,
    pub caps: u32,
}

impl Default for FeInfo {
    fn default() -> Self {
        // SAFETY: an all-zero FeInfo (plain-old-data, no pointers) is valid.
        unsafe { std::mem::zeroed() }
    }
}

/// `FE_DISEQC_SEND_MASTER_CMD` payload.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct DiseqcMasterCmd {
    pub msg: [u8; 6],
    pub len: u8,
}

/// `fe_sec_voltage`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeSecVoltage {
    Voltage13 = 0,
    Voltage18 = 1,
    VoltageOff = 2,
}

/// `fe_sec_tone_mode`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeSecTone {
    ToneOn = 0,
    ToneOff = 1,
}

/// `fe_sec_mini_cmd`, used by `FE_DISEQC_SEND_BURST`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeSecMiniCmd {
    MiniA = 0,
    MiniB = 1,
}

/// `FE_GET_EVENT` payload (only the status word is consulted).
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct FeEvent {
    pub status: u32,
    // Followed by a `dvb_frontend_parameters` union in the kernel header;
    // this crate only tunes through the v5 property API so it is never read.
    pub _parameters: [u8; 40],
}

/// One entry of a `FE_SET_PROPERTY`/`FE_GET_PROPERTY` command sequence
/// (`struct dtv_property`). Only the scalar `u.data` member of the kernel
/// union is used; every property this driver sets or reads is a plain u32.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DtvProperty {
    pub cmd: u32,
    reserved: [u32; 3],
    pub data: u32,
    _buffer_padding: [u8; 32],
    pub result: i32,
}

impl DtvProperty {
    pub fn new(cmd: u32, data: u32) -> Self {
        DtvProperty {
            cmd,
            reserved: [0; 3],
            data,
            _buffer_padding: [0; 32],
            result: 0,
        }
    }
}

#[repr(C)]
struct DtvProperties {
    num: u32,
    props: *const DtvProperty,
}

#[repr(C)]
struct DtvPropertiesMut {
    num: u32,
    props: *mut DtvProperty,
}

pub mod dtv_cmd {
    pub const DTV_TUNE: u32 = 1;
    pub const DTV_FREQUENCY: u32 = 3;
    pub const DTV_INVERSION: u32 = 6;
    pub const DTV_SYMBOL_RATE: u32 = 8;
    pub const DTV_INNER_FEC: u32 = 9;
    pub const DTV_VOLTAGE: u32 = 10;
    pub const DTV_TONE: u32 = 11;
    pub const DTV_PILOT: u32 = 12;
    pub const DTV_ROLLOFF: u32 = 13;
    pub const DTV_DELIVERY_SYSTEM: u32 = 17;
    pub const DTV_MODULATION: u32 = 4;
}

pub mod fe_modulation {
    pub const QPSK: u32 = 0;
    pub const PSK_8: u32 = 5;
    pub const APSK_16: u32 = 6;
    pub const APSK_32: u32 = 7;
}

pub mod fe_rolloff {
    pub const ROLLOFF_35: u32 = 0;
    pub const ROLLOFF_20: u32 = 1;
    pub const ROLLOFF_25: u32 = 2;
    pub const ROLLOFF_AUTO: u32 = 3;
}

pub mod fe_delivery_system {
    pub const SYS_DVBS: u32 = 9;
    pub const SYS_DVBS2: u32 = 10;
}

pub mod fe_code_rate {
    pub const FEC_AUTO: u32 = 9;
}

pub mod fe_spectral_inversion {
    pub const INVERSION_AUTO: u32 = 2;
}

pub mod fe_pilot {
    pub const PILOT_AUTO: u32 = 2;
}

ioctl_read!(fe_get_info, DVB_IOCTL_MAGIC, 61, FeInfo);
ioctl_write_ptr!(fe_diseqc_send_master_cmd, DVB_IOCTL_MAGIC, 63, DiseqcMasterCmd);
ioctl_write_int_bad!(fe_diseqc_send_burst, request_code_none!(DVB_IOCTL_MAGIC, 65));
ioctl_write_int_bad!(fe_set_tone, request_code_none!(DVB_IOCTL_MAGIC, 66));
ioctl_write_int_bad!(fe_set_voltage, request_code_none!(DVB_IOCTL_MAGIC, 67));
ioctl_read!(fe_read_status, DVB_IOCTL_MAGIC, 69, u32);
ioctl_read!(fe_read_ber, DVB_IOCTL_MAGIC, 70, u32);
ioctl_read!(fe_read_signal_strength, DVB_IOCTL_MAGIC, 71, u16);
ioctl_read!(fe_read_snr, DVB_IOCTL_MAGIC, 72, u16);
ioctl_read!(fe_read_uncorrected_blocks, DVB_IOCTL_MAGIC, 73, u32);
ioctl_read!(fe_get_event, DVB_IOCTL_MAGIC, 78, FeEvent);
ioctl_write_ptr!(fe_set_property, DVB_IOCTL_MAGIC, 82, DtvProperties);
ioctl_read!(fe_get_property, DVB_IOCTL_MAGIC, 83, DtvPropertiesMut);

/// `struct dmx_sct_filter_params` (section filter, used for PSI/SI PIDs).
#[repr(C)]
pub struct DmxSctFilterParams {
    pub pid: u16,
    pub filter: [u8; 16],
    pub mask: [u8; 16],
    pub mode: [u8; 16],
    pub timeout: u32,
    pub flags: u32,
}

pub const DMX_IMMEDIATE_START: u32 = 0x4;

/// `struct dmx_pes_filter_params` (PES filter, used to tap every PID the
/// tracker/listener fabric asks for onto the DVR device).
#[repr(C)]
pub struct DmxPesFilterParams {
    pub pid: u16,
    pub input: u32,
    pub output: u32,
    pub pes_type: u32,
    pub flags: u32,
}

pub mod dmx_input {
    pub const DMX_IN_FRONTEND: u32 = 0;
}

pub mod dmx_output {
    pub const DMX_OUT_TS_TAP: u32 = 2;
}

pub mod dmx_pes_type {
    pub const DMX_PES_OTHER: u32 = 5;
}

ioctl_write_ptr!(dmx_set_filter, DVB_IOCTL_MAGIC, 43, DmxSctFilterParams);
ioctl_write_ptr!(dmx_set_pes_filter, DVB_IOCTL_MAGIC, 44, DmxPesFilterParams);
ioctl_write_int_bad!(dmx_start, request_code_none!(DVB_IOCTL_MAGIC, 41));
ioctl_write_int_bad!(dmx_stop, request_code_none!(DVB_IOCTL_MAGIC, 42));

pub unsafe fn set_properties(fd: std::os::unix::io::RawFd, props: &[DtvProperty]) -> nix::Result<()> {
    let cmd = DtvProperties {
        num: props.len() as u32,
        props: props.as_ptr(),
    };
    fe_set_property(fd, &cmd as *const _).map(|_| ())
}

pub unsafe fn start_filter(fd: std::os::unix::io::RawFd) -> nix::Result<()> {
    dmx_start(fd, 0).map(|_| ())
}

pub unsafe fn stop_filter(fd: std::os::unix::io::RawFd) -> nix::Result<()> {
    dmx_stop(fd, 0).map(|_| ())
}
