//! PMT (Program Map Table) parsing.
//!
//! Grounded on `recisdb-proxy/src/ts_analyzer/pmt.rs` in the reference
//! implementation; stream-type classification here follows the DVB-S/S2
//! elementary stream types this crate targets instead of that file's
//! ISDB-oriented video/audio groupings.

use super::{table_id, PsiSection};
use crate::error::SectionError;
use crate::packet::{pid, FilterMask};

/// Stream type constants carried in a PMT elementary stream entry.
pub mod stream_type {
    pub const MPEG2_VIDEO: u8 = 0x01;
    pub const MPEG2_VIDEO_ALT: u8 = 0x02;
    pub const H264_VIDEO: u8 = 0x1b;
    pub const MPEG1_AUDIO: u8 = 0x03;
    pub const MPEG2_AUDIO: u8 = 0x04;
    pub const TELETEXT: u8 = 0x06;
}

/// Classify a stream type:
/// `{0x01,0x02,0x1b -> Video; 0x03,0x04 -> Audio; 0x06 -> Teletext; others -> Other}`.
pub fn classify_stream_type(stream_type: u8) -> FilterMask {
    match stream_type {
        stream_type::MPEG2_VIDEO | stream_type::MPEG2_VIDEO_ALT | stream_type::H264_VIDEO => {
            FilterMask::VIDEO
        }
        stream_type::MPEG1_AUDIO | stream_type::MPEG2_AUDIO => FilterMask::AUDIO,
        stream_type::TELETEXT => FilterMask::TELETEXT,
        _ => FilterMask::OTHER,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<u8>,
}

impl PmtStream {
    pub fn filter_mask(&self) -> FilterMask {
        classify_stream_type(self.stream_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PmtTable {
    pub program_number: u16,
    pub version_number: u8,
    pub pcr_pid: u16,
    pub program_info: Vec<u8>,
    pub streams: Vec<PmtStream>,
}

impl PmtTable {
    pub fn parse(section: &PsiSection) -> Result<Self, SectionError> {
        if section.header.table_id != table_id::PMT {
            return Err(SectionError::WrongTableId);
        }

        let data = section.data;
        if data.len() < 4 {
            return Err(SectionError::TooShort);
        }

        let pcr_pid = ((data[0] as u16 & 0x1F) << 8) | data[1] as u16;
        let program_info_length = ((data[2] as usize & 0x0F) << 8) | data[3] as usize;

        if data.len() < 4 + program_info_length {
            return Err(SectionError::TooShort);
        }
        let program_info = data[4..4 + program_info_length].to_vec();

        let mut streams = Vec::new();
        let mut offset = 4 + program_info_length;
        while offset + 5 <= data.len() {
            let stream_type = data[offset];
            let elementary_pid = ((data[offset + 1] as u16 & 0x1F) << 8) | data[offset + 2] as u16;
            let es_info_length = ((data[offset + 3] as usize & 0x0F) << 8) | data[offset + 4] as usize;
            offset += 5;
            if offset + es_info_length > data.len() {
                break;
            }
            let descriptors = data[offset..offset + es_info_length].to_vec();
            offset += es_info_length;

            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(PmtTable {
            program_number: section.header.table_id_extension,
            version_number: section.header.version_number,
            pcr_pid,
            program_info,
            streams,
        })
    }

    /// `None` when the PMT declares no dedicated PCR PID (sentinel `0x1FFF`).
    pub fn pcr_pid(&self) -> Option<u16> {
        if self.pcr_pid == pid::NO_PCR {
            None
        } else {
            Some(self.pcr_pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::PsiHeader;

    fn section<'a>(data: &'a [u8], program_number: u16) -> PsiSection<'a> {
        PsiSection {
            header: PsiHeader {
                table_id: table_id::PMT,
                section_syntax_indicator: true,
                section_length: (5 + data.len() + 4) as u16,
                table_id_extension: program_number,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            },
            data,
            crc32: 0,
        }
    }

    #[test]
    fn tune_and_receive_scenario_streams() {
        // PMT(4096) with ES {0x1b on 4097 (video), 0x03 on 4098 (audio)}.
        let data = [
            0x1F, 0xFF, // pcr_pid = 0x1FFF (no PCR)
            0x00, 0x00, // program_info_length = 0
            0x1b, (4097u16 >> 8) as u8 | 0xE0, (4097u16 & 0xFF) as u8, 0x00, 0x00,
            0x03, (4098u16 >> 8) as u8 | 0xE0, (4098u16 & 0xFF) as u8, 0x00, 0x00,
        ];
        let sec = section(&data, 100);
        let pmt = PmtTable::parse(&sec).unwrap();

        assert_eq!(pmt.pcr_pid(), None);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[0].elementary_pid, 4097);
        assert_eq!(pmt.streams[0].filter_mask(), FilterMask::VIDEO);
        assert_eq!(pmt.streams[1].elementary_pid, 4098);
        assert_eq!(pmt.streams[1].filter_mask(), FilterMask::AUDIO);
    }
}
