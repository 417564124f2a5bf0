//! EIT (Event Information Table), present/following subset.
//!
//! No reference file covers EIT directly; the section walk follows the same
//! shape as `pat.rs`/`pmt.rs` in this crate, and the event fields mirror
//! `EPGEvent`/`EPGEventRunningStatus`/`EPGShortEvent` from the original
//! implementation's `epg.h` (present in the retrieved reference material),
//! re-expressed as owned Rust types instead of a tagged struct hierarchy.

use super::descriptors::{parse_descriptor_loop, ExtendedEventDescriptor, ShortEventDescriptor};
use super::{descriptor_tag, table_id, PsiSection};
use crate::error::SectionError;
use chrono::{DateTime, Duration, Utc};

/// Running status of an EIT event, matching `EPGEventRunningStatus` in the
/// original implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningStatus {
    Undefined,
    NotRunning,
    StartsInAFewSeconds,
    Pausing,
    Running,
    ServiceOffAir,
    Reserved(u8),
}

impl RunningStatus {
    fn from_id(id: u8) -> Self {
        match id {
            0 => RunningStatus::Undefined,
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsInAFewSeconds,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            5 => RunningStatus::ServiceOffAir,
            other => RunningStatus::Reserved(other),
        }
    }
}

/// One `short_event_descriptor`, mirroring `EPGShortEvent`'s
/// language/description/text triple.
#[derive(Debug, Clone)]
pub struct ShortDescription {
    pub language_code: [u8; 3],
    pub title: String,
    pub text: String,
}

/// One `extended_event_descriptor`, mirroring `EPGExtendedEvent`'s
/// language, ordered item list and trailing text.
#[derive(Debug, Clone)]
pub struct ExtendedDescription {
    pub language_code: [u8; 3],
    pub items: Vec<super::descriptors::ExtendedEventItem>,
    pub text: String,
}

/// A single EIT event entry (present or following), the crate's `EpgEvent`.
/// `table_id` records which table this entry came from (0x4e/0x4f
/// present-following vs. 0x50..=0x6f schedule) the same way `EPGEvent`
/// carries its own `table_id` alongside `event_id`.
#[derive(Debug, Clone)]
pub struct EpgEvent {
    pub table_id: u8,
    pub event_id: u16,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub running_status: RunningStatus,
    pub free_ca_mode: bool,
    pub short_descriptions: Vec<ShortDescription>,
    pub extended_descriptions: Vec<ExtendedDescription>,
}

impl EpgEvent {
    /// The first short description's title, the common case of a single
    /// language carried per event.
    pub fn event_name(&self) -> Option<&str> {
        self.short_descriptions.first().map(|d| d.title.as_str())
    }

    /// The first short description's summary text.
    pub fn short_description(&self) -> Option<&str> {
        self.short_descriptions.first().map(|d| d.text.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EitTable {
    /// The section's own table_id (0x4e/0x4f present-following, 0x50..=0x6f
    /// schedule); this, not `service_id`, is the table's identity.
    pub table_id: u8,
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version_number: u8,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<EpgEvent>,
}

impl EitTable {
    pub fn parse(section: &PsiSection) -> Result<Self, SectionError> {
        if !table_id::is_eit(section.header.table_id) {
            return Err(SectionError::WrongTableId);
        }

        let data = section.data;
        if data.len() < 6 {
            return Err(SectionError::TooShort);
        }

        let transport_stream_id = ((data[0] as u16) << 8) | data[1] as u16;
        let original_network_id = ((data[2] as u16) << 8) | data[3] as u16;
        let segment_last_section_number = data[4];
        let last_table_id = data[5];

        let mut events = Vec::new();
        let mut offset = 6;
        while offset + 12 <= data.len() {
            let event_id = ((data[offset] as u16) << 8) | data[offset + 1] as u16;
            let start_time = decode_mjd_utc(&data[offset + 2..offset + 7]);
            let duration = decode_bcd_duration(&data[offset + 7..offset + 10]);
            let running_status = RunningStatus::from_id((data[offset + 10] >> 5) & 0x07);
            let free_ca_mode = data[offset + 10] & 0x10 != 0;
            let descriptors_loop_length =
                ((data[offset + 10] as usize & 0x0F) << 8) | data[offset + 11] as usize;
            offset += 12;

            if offset + descriptors_loop_length > data.len() {
                break;
            }
            let descriptors = &data[offset..offset + descriptors_loop_length];
            offset += descriptors_loop_length;

            let mut short_descriptions = Vec::new();
            let mut extended_descriptions = Vec::new();
            for (tag, payload) in parse_descriptor_loop(descriptors) {
                match tag {
                    descriptor_tag::SHORT_EVENT => {
                        if let Ok(sed) = ShortEventDescriptor::parse(payload) {
                            short_descriptions.push(ShortDescription {
                                language_code: sed.language_code,
                                title: sed.event_name,
                                text: sed.text,
                            });
                        }
                    }
                    descriptor_tag::EXTENDED_EVENT => {
                        if let Ok(eed) = ExtendedEventDescriptor::parse(payload) {
                            extended_descriptions.push(ExtendedDescription {
                                language_code: eed.language_code,
                                items: eed.items,
                                text: eed.text,
                            });
                        }
                    }
                    _ => {}
                }
            }

            events.push(EpgEvent {
                table_id: section.header.table_id,
                event_id,
                start_time,
                duration,
                running_status,
                free_ca_mode,
                short_descriptions,
                extended_descriptions,
            });
        }

        Ok(EitTable {
            table_id: section.header.table_id,
            service_id: section.header.table_id_extension,
            transport_stream_id,
            original_network_id,
            version_number: section.header.version_number,
            segment_last_section_number,
            last_table_id,
            events,
        })
    }

    /// The "present" event, conventionally the first table entry for a
    /// present/following EIT section.
    pub fn present_event(&self) -> Option<&EpgEvent> {
        self.events.first()
    }

    /// The "following" event, the second entry when present.
    pub fn following_event(&self) -> Option<&EpgEvent> {
        self.events.get(1)
    }
}

/// Decode a 5-byte MJD + BCD UTC start_time field (ETSI EN 300 468 Annex C).
fn decode_mjd_utc(data: &[u8]) -> DateTime<Utc> {
    let mjd = ((data[0] as u32) << 8) | data[1] as u32;
    let hour = bcd_digit(data[2]);
    let minute = bcd_digit(data[3]);
    let second = bcd_digit(data[4]);

    // MJD epoch 1858-11-17 is day 0; chrono's NaiveDate epoch is 0000-01-01
    // with a Julian day offset handled internally via `from_num_days_from_ce`.
    let days_from_ce = mjd as i64 + 678576; // 1858-11-17 in days-from-CE
    let date = chrono::NaiveDate::from_num_days_from_ce_opt(days_from_ce as i32)
        .unwrap_or(chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
    let time = chrono::NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
        .unwrap_or(chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    DateTime::from_naive_utc_and_offset(date.and_time(time), Utc)
}

fn decode_bcd_duration(data: &[u8]) -> Duration {
    let hours = bcd_digit(data[0]) as i64;
    let minutes = bcd_digit(data[1]) as i64;
    let seconds = bcd_digit(data[2]) as i64;
    Duration::seconds(hours * 3600 + minutes * 60 + seconds)
}

fn bcd_digit(byte: u8) -> u8 {
    (byte >> 4) * 10 + (byte & 0x0F)
}
