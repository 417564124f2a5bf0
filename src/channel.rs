//! `ChannelRecord` and `TunerConfig`: the tuning inputs consumed from the
//! channel/favourites database collaborator (out of scope as a subsystem,
//! per spec.md §1) and handed to the tuner driver.
//!
//! Grounded on `channels.h`/`channel-db.h` in the reference implementation
//! for the field set, re-expressed as enums instead of raw integer codes
//! where the original overloads a `guint32`/`gchar*` field with a closed set
//! of values (polarisation, delivery system, modulation, roll-off).

/// LNB polarisation, selects LNB voltage (`Horizontal`/`Left` -> 18V,
/// `Vertical`/`Right` -> 13V).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarisation {
    Horizontal,
    Vertical,
    Left,
    Right,
}

impl Polarisation {
    /// `true` selects the 18V rail (spec §4.A step 2).
    pub fn is_high_voltage(self) -> bool {
        matches!(self, Polarisation::Horizontal | Polarisation::Left)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySystem {
    DvbS,
    DvbS2,
}

/// Modulation code as carried in `ChannelRecord`; mapped to a hardware
/// constant by the tuner driver (spec §4.A step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulationCode {
    Qpsk,
    Psk8,
    Apsk16,
    Apsk32,
}

impl ModulationCode {
    /// `{2->QPSK, 5->PSK_8, 6->APSK_16, 7->APSK_32, default->QPSK}`.
    pub fn from_db_code(code: u8) -> Self {
        match code {
            5 => ModulationCode::Psk8,
            6 => ModulationCode::Apsk16,
            7 => ModulationCode::Apsk32,
            _ => ModulationCode::Qpsk,
        }
    }
}

/// Roll-off code as carried in `ChannelRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOffCode {
    R20,
    R25,
    R35,
    Auto,
}

impl RollOffCode {
    /// `{20->0.20, 25->0.25, 0->Auto, default->0.35}`.
    pub fn from_db_code(code: u8) -> Self {
        match code {
            20 => RollOffCode::R20,
            25 => RollOffCode::R25,
            0 => RollOffCode::Auto,
            _ => RollOffCode::R35,
        }
    }
}

/// Channel/favourites database record, immutable once read for a tune
/// cycle (spec §3 `ChannelRecord`).
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: u32,
    pub raw_name: String,
    pub name: String,
    pub provider: String,
    /// Frequency, kHz (see `TunerConfig::normalize_khz`).
    pub frequency: u32,
    /// Symbol rate, symbols/s (see `TunerConfig::normalize_khz`).
    pub symbol_rate: u32,
    pub polarisation: Polarisation,
    pub signal_source: String,
    pub delivery_system: DeliverySystem,
    pub modulation: ModulationCode,
    pub roll_off: RollOffCode,
    pub service_id: u16,
    pub network_id: u16,
    pub transport_id: u16,
    pub video_pid: Option<u16>,
    pub audio_pid: Option<u16>,
    pub teletext_pid: Option<u16>,
}

/// Tuning parameters handed to the tuner driver. Only the v5-property
/// tuning path is implemented (spec §9 Open Question 1): the earlier
/// single-program-number signature is treated as removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerConfig {
    /// kHz, normalized (see `normalize_khz`).
    pub frequency: u32,
    /// symbols/s, normalized (see `normalize_khz`).
    pub symbol_rate: u32,
    pub polarisation: Polarisation,
    /// DiSEqC/multiswitch port, 0..=3.
    pub satellite_port: u8,
    pub delivery_system: DeliverySystem,
    pub modulation: ModulationCode,
    pub roll_off: RollOffCode,
}

impl TunerConfig {
    pub fn from_channel(channel: &ChannelRecord, satellite_port: u8) -> Self {
        TunerConfig {
            frequency: normalize_khz(channel.frequency),
            symbol_rate: normalize_khz(channel.symbol_rate),
            polarisation: channel.polarisation,
            satellite_port,
            delivery_system: channel.delivery_system,
            modulation: channel.modulation,
            roll_off: channel.roll_off,
        }
    }
}

/// Normalise a frequency or symbol rate to kHz/sps by repeatedly
/// multiplying by 1000 while below 10^6 (spec §3 `TunerConfig` invariant:
/// the source accepts MHz or kHz for the same field).
pub fn normalize_khz(mut value: u32) -> u32 {
    while value != 0 && value < 1_000_000 {
        value *= 1000;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mhz_value_up_to_khz() {
        assert_eq!(normalize_khz(1234), 1_234_000_000);
    }

    #[test]
    fn leaves_khz_value_unchanged() {
        assert_eq!(normalize_khz(1_234_000), 1_234_000);
    }

    #[test]
    fn modulation_code_defaults_to_qpsk() {
        assert_eq!(ModulationCode::from_db_code(99), ModulationCode::Qpsk);
        assert_eq!(ModulationCode::from_db_code(7), ModulationCode::Apsk32);
    }

    #[test]
    fn polarisation_voltage_mapping() {
        assert!(Polarisation::Horizontal.is_high_voltage());
        assert!(Polarisation::Left.is_high_voltage());
        assert!(!Polarisation::Vertical.is_high_voltage());
        assert!(!Polarisation::Right.is_high_voltage());
    }
}
