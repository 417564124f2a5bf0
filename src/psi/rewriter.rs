//! Clean single-program PAT/PMT rewriter.
//!
//! Builds a PAT carrying only the target program and a PMT carrying only
//! its elementary streams. No reference file builds sections (only parses
//! them), so the section layout here mirrors
//! `psi::PsiSection`/`pat::PatTable`/`pmt::PmtTable` in reverse, and packet
//! framing mirrors `packet::TsPacket`. Splitting an oversized section across
//! multiple packets follows
//! `examples/original_source/dvbreader.c`'s
//! `dvb_reader_dvbpsi_section_to_ts_packets` exactly: `ceil((size+1)/184)`
//! packets, 183 payload bytes in the first packet (to make room for the
//! pointer field), 184 in every following one, continuity counter
//! incrementing per packet.

use super::crc32_mpeg2;
use super::pmt::PmtStream;
use crate::packet::{pid, TsPacket, TS_PACKET_SIZE};

/// Builds the rewritten PAT, holding the continuity counter for PID 0
/// across calls.
#[derive(Debug, Default)]
pub struct PatRewriter {
    continuity_counter: u8,
}

impl PatRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single-program PAT naming only `program_number` -> `pmt_pid`,
    /// as one or more TS packets in transmission order.
    pub fn build(&mut self, transport_stream_id: u16, program_number: u16, pmt_pid: u16) -> Vec<TsPacket> {
        let mut section_data = Vec::with_capacity(4);
        section_data.push((program_number >> 8) as u8);
        section_data.push(program_number as u8);
        section_data.push(0xE0 | ((pmt_pid >> 8) as u8 & 0x1F));
        section_data.push(pmt_pid as u8);

        let section = build_long_section(super::table_id::PAT, transport_stream_id, 0, &section_data);
        split_section_into_packets(pid::PAT, &section, &mut self.continuity_counter)
    }
}

/// Builds the rewritten PMT, holding its own continuity counter.
#[derive(Debug, Default)]
pub struct PmtRewriter {
    continuity_counter: u8,
}

impl PmtRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a PMT for `program_number` listing exactly `streams`, with no
    /// program-level descriptors, as one or more TS packets in transmission
    /// order. CA descriptors are never carried through; this crate does not
    /// attempt descrambling.
    pub fn build(&mut self, pmt_pid: u16, program_number: u16, pcr_pid: u16, streams: &[PmtStream]) -> Vec<TsPacket> {
        let mut section_data = Vec::new();
        section_data.push(0xE0 | ((pcr_pid >> 8) as u8 & 0x1F));
        section_data.push(pcr_pid as u8);
        section_data.push(0xF0); // program_info_length = 0
        section_data.push(0x00);

        for stream in streams {
            section_data.push(stream.stream_type);
            section_data.push(0xE0 | ((stream.elementary_pid >> 8) as u8 & 0x1F));
            section_data.push(stream.elementary_pid as u8);
            section_data.push(0xF0 | ((stream.descriptors.len() >> 8) as u8 & 0x0F));
            section_data.push(stream.descriptors.len() as u8);
            section_data.extend_from_slice(&stream.descriptors);
        }

        let section = build_long_section(super::table_id::PMT, program_number, 0, &section_data);
        split_section_into_packets(pmt_pid, &section, &mut self.continuity_counter)
    }
}

/// Encode a complete long-form PSI section (header + data + CRC32), with
/// `current_next_indicator` set and a single-section table
/// (`section_number == last_section_number == 0`).
fn build_long_section(table_id: u8, table_id_extension: u16, version_number: u8, data: &[u8]) -> Vec<u8> {
    let section_length = 5 + data.len() + 4; // table_id_extension..last_section_number + data + crc
    let mut section = Vec::with_capacity(3 + section_length);

    section.push(table_id);
    section.push(0x80 | ((section_length >> 8) as u8 & 0x0F)); // section_syntax_indicator=1, reserved=1
    section.push(section_length as u8);
    section.push((table_id_extension >> 8) as u8);
    section.push(table_id_extension as u8);
    section.push(0xC0 | ((version_number & 0x1F) << 1) | 0x01); // reserved=11, current_next=1
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    section.extend_from_slice(data);

    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// Split a complete section across as many 188-byte TS packets as it takes:
/// the first packet carries `payload_unit_start` and a pointer field of 0,
/// leaving 183 bytes for section data; every following packet carries up to
/// 184 bytes with no pointer field. The last packet's unused tail is padded
/// with `0xFF`. `continuity_counter` is read and advanced in place, one
/// increment per packet, so it keeps counting correctly across calls.
fn split_section_into_packets(pid: u16, section: &[u8], continuity_counter: &mut u8) -> Vec<TsPacket> {
    const CONT_CAPACITY: usize = TS_PACKET_SIZE - 4; // sync+header, no pointer

    let packet_count = ((section.len() + 1 + CONT_CAPACITY - 1) / CONT_CAPACITY).max(1);
    let mut packets = Vec::with_capacity(packet_count);
    let mut offset = 0;

    for i in 0..packet_count {
        let mut bytes = [0xFFu8; TS_PACKET_SIZE];
        bytes[0] = crate::packet::SYNC_BYTE;
        *continuity_counter = (*continuity_counter + 1) & 0x0F;
        bytes[3] = 0x10 | (*continuity_counter & 0x0F); // adaptation_field_control=01 (payload only)

        let payload_start = if i == 0 {
            bytes[1] = 0x40 | ((pid >> 8) as u8 & 0x1F); // payload_unit_start=1
            bytes[2] = pid as u8;
            bytes[4] = 0x00; // pointer field
            5
        } else {
            bytes[1] = (pid >> 8) as u8 & 0x1F;
            bytes[2] = pid as u8;
            4
        };

        let capacity = TS_PACKET_SIZE - payload_start;
        let copy_len = (section.len() - offset).min(capacity);
        bytes[payload_start..payload_start + copy_len].copy_from_slice(&section[offset..offset + copy_len]);
        offset += copy_len;

        packets.push(TsPacket::from_raw(bytes));
    }

    debug_assert_eq!(offset, section.len());
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::pat::PatTable;
    use crate::psi::pmt::PmtTable;
    use crate::psi::{PsiSection, SectionCollector};

    /// Reassemble the section carried by a run of packets on the same PID,
    /// the way `SectionCollector` does for a real incoming stream.
    fn reassemble(packets: &[TsPacket]) -> Vec<u8> {
        let mut collector = SectionCollector::new();
        for packet in packets {
            let header = packet.header();
            if collector.add_data(packet.payload(), header.continuity_counter, header.payload_unit_start) {
                return collector.section().unwrap().to_vec();
            }
        }
        panic!("packets never assembled a complete section");
    }

    #[test]
    fn rewritten_pat_round_trips_through_parser() {
        let mut rewriter = PatRewriter::new();
        let packets = rewriter.build(1, 100, 4096);

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].pid(), pid::PAT);
        assert!(packets[0].header().payload_unit_start);

        let section_bytes = reassemble(&packets);
        let section = PsiSection::parse(&section_bytes).unwrap();
        PsiSection::verify_crc(&section_bytes[..section.total_length()]).unwrap();
        let pat = PatTable::parse(&section).unwrap();
        assert_eq!(pat.get_pmt_pid(100), Some(4096));
    }

    #[test]
    fn rewritten_pmt_round_trips_through_parser() {
        let streams = vec![
            PmtStream {
                stream_type: 0x1b,
                elementary_pid: 256,
                descriptors: vec![],
            },
            PmtStream {
                stream_type: 0x03,
                elementary_pid: 257,
                descriptors: vec![],
            },
        ];
        let mut rewriter = PmtRewriter::new();
        let packets = rewriter.build(4096, 100, pid::NO_PCR, &streams);

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].pid(), 4096);
        let section_bytes = reassemble(&packets);
        let section = PsiSection::parse(&section_bytes).unwrap();
        let pmt = PmtTable::parse(&section).unwrap();
        assert_eq!(pmt.pcr_pid(), None);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[0].elementary_pid, 256);
        assert_eq!(pmt.streams[1].elementary_pid, 257);
    }

    #[test]
    fn oversized_pmt_splits_across_multiple_packets_with_incrementing_cc() {
        // A single elementary stream carrying a 250-byte descriptor blob pushes
        // the section well past the 183-byte first-packet capacity.
        let streams = vec![PmtStream {
            stream_type: 0x1b,
            elementary_pid: 512,
            descriptors: vec![0xAB; 250],
        }];
        let mut rewriter = PmtRewriter::new();
        let packets = rewriter.build(4096, 100, pid::NO_PCR, &streams);

        assert!(packets.len() > 1, "expected the oversized PMT to span multiple packets");

        assert!(packets[0].header().payload_unit_start);
        for packet in &packets[1..] {
            assert!(!packet.header().payload_unit_start);
        }

        let ccs: Vec<u8> = packets.iter().map(|p| p.header().continuity_counter).collect();
        for window in ccs.windows(2) {
            assert_eq!(window[1], (window[0] + 1) & 0x0F);
        }

        let section_bytes = reassemble(&packets);
        let section = PsiSection::parse(&section_bytes).unwrap();
        PsiSection::verify_crc(&section_bytes[..section.total_length()]).unwrap();
        let pmt = PmtTable::parse(&section).unwrap();
        assert_eq!(pmt.streams.len(), 1);
        assert_eq!(pmt.streams[0].elementary_pid, 512);
        assert_eq!(pmt.streams[0].descriptors.len(), 250);
    }

    #[test]
    fn continuity_counter_keeps_incrementing_across_successive_builds() {
        let mut rewriter = PatRewriter::new();
        let first = rewriter.build(1, 100, 4096);
        let second = rewriter.build(1, 100, 4096);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].header().continuity_counter,
            (first[0].header().continuity_counter + 1) & 0x0F
        );
    }
}
