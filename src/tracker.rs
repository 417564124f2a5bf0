//! PSI/SI tracker: routes packets by PID to PAT/PMT/EIT/SDT
//! section decoders and derives the active-PID set, EPG store and service
//! snapshot for the configured target program.
//!
//! Grounded on this crate's own per-table parsers (`psi::pat`, `psi::pmt`,
//! `psi::sdt`, `psi::eit`, themselves adapted from
//! `recisdb-rs/src/ts_analyzer/*`); the reference implementation parses
//! sections on demand rather than tracking table identity across an open
//! stream, so the routing/latching state machine here is new.

use std::collections::HashMap;

use crate::packet::{pid as wellknown, ActivePidSet, FilterMask, TsPacket};
use crate::psi::eit::EitTable;
use crate::psi::pat::PatTable;
use crate::psi::pmt::{PmtStream, PmtTable};
use crate::psi::rewriter::{PatRewriter, PmtRewriter};
use crate::psi::sdt::SdtTable;
use crate::psi::{table_id, PsiSection, SectionCollector};
use crate::status::StatusEvent;

/// Service metadata snapshot, replaced atomically on SDT acceptance.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub provider: String,
    pub name: String,
    pub service_type: u8,
}

/// Output of feeding one packet to the tracker: zero or more freshly
/// rewritten PAT/PMT packets to prime listeners with (each may itself be
/// more than one TS packet, see `psi::rewriter`), and zero or more status
/// events to surface.
#[derive(Debug, Default)]
pub struct TrackerOutput {
    pub rewritten_pat: Option<Vec<TsPacket>>,
    pub rewritten_pmt: Option<Vec<TsPacket>>,
    pub events: Vec<StatusEvent>,
}

pub struct PsiTracker {
    target_program: u16,
    transport_stream_id: u16,
    collectors: HashMap<u16, SectionCollector>,

    have_pat: bool,
    have_pmt: bool,
    have_sdt: bool,

    pmt_pid: Option<u16>,
    active_pids: ActivePidSet,
    eit_tables: Vec<EitTable>,
    service_info: Option<ServiceInfo>,

    pat_rewriter: PatRewriter,
    pmt_rewriter: PmtRewriter,
}

impl PsiTracker {
    /// `target_program` doubles as the SDT service_id to watch for, which
    /// holds for every broadcaster this crate has been run against.
    pub fn new(target_program: u16) -> Self {
        let mut tracker = PsiTracker {
            target_program,
            transport_stream_id: 0,
            collectors: HashMap::new(),
            have_pat: false,
            have_pmt: false,
            have_sdt: false,
            pmt_pid: None,
            active_pids: ActivePidSet::new(),
            eit_tables: Vec::new(),
            service_info: None,
            pat_rewriter: PatRewriter::new(),
            pmt_rewriter: PmtRewriter::new(),
        };
        tracker.seed_well_known_pids();
        tracker
    }

    fn seed_well_known_pids(&mut self) {
        self.active_pids.add(wellknown::PAT, FilterMask::PAT);
        self.active_pids.add(wellknown::SDT, FilterMask::SDT);
        self.active_pids.add(wellknown::EIT, FilterMask::EIT);
        self.active_pids.add(wellknown::RST, FilterMask::RST);
    }

    /// Full reset on retune or stop.
    pub fn reset(&mut self) {
        self.collectors.clear();
        self.have_pat = false;
        self.have_pmt = false;
        self.have_sdt = false;
        self.pmt_pid = None;
        self.active_pids.clear();
        self.eit_tables.clear();
        self.service_info = None;
        self.pat_rewriter = PatRewriter::new();
        self.pmt_rewriter = PmtRewriter::new();
        self.seed_well_known_pids();
    }

    pub fn active_pids(&self) -> &ActivePidSet {
        &self.active_pids
    }

    pub fn service_info(&self) -> Option<&ServiceInfo> {
        self.service_info.as_ref()
    }

    pub fn eit_tables(&self) -> &[EitTable] {
        &self.eit_tables
    }

    /// The event whose `running_status == Running` on table 0x4e, falling
    /// back to one covering the current wall clock.
    pub fn currently_running(&self, now: chrono::DateTime<chrono::Utc>) -> Option<&crate::psi::eit::EpgEvent> {
        let present_following = self
            .eit_tables
            .iter()
            .find(|t| t.table_id == table_id::EIT_PF_ACTUAL)?;

        present_following
            .events
            .iter()
            .find(|e| e.running_status == crate::psi::eit::RunningStatus::Running)
            .or_else(|| {
                present_following
                    .events
                    .iter()
                    .find(|e| now >= e.start_time && now <= e.start_time + e.duration)
            })
    }

    /// Feed one TS packet, returning any rewritten PAT/PMT packets and
    /// status events produced by processing it.
    pub fn feed(&mut self, packet: &TsPacket) -> TrackerOutput {
        let mut out = TrackerOutput::default();
        let pid = packet.pid();
        let header = packet.header();

        if pid == wellknown::PAT && !self.have_pat {
            self.feed_pat(packet, &header, &mut out);
        } else if Some(pid) == self.pmt_pid && !self.have_pmt {
            self.feed_pmt(packet, &header, &mut out);
        } else if pid == wellknown::SDT && !self.have_sdt {
            self.feed_sdt(packet, &header, &mut out);
        } else if pid == wellknown::EIT {
            self.feed_eit(packet, &header, &mut out);
        }

        out
    }

    fn feed_pat(&mut self, packet: &TsPacket, header: &crate::packet::TsHeader, out: &mut TrackerOutput) {
        let collector = self.collectors.entry(wellknown::PAT).or_default();
        if !collector.add_data(packet.payload(), header.continuity_counter, header.payload_unit_start) {
            return;
        }
        let section_bytes = collector.section().unwrap().to_vec();
        collector.clear();

        let Ok(section) = PsiSection::parse(&section_bytes) else {
            return;
        };
        let Ok(pat) = PatTable::parse(&section) else {
            return;
        };

        self.transport_stream_id = pat.transport_stream_id;
        if let Some(pmt_pid) = pat.get_pmt_pid(self.target_program) {
            self.pmt_pid = Some(pmt_pid);
            self.active_pids.add(pmt_pid, FilterMask::PMT);
            self.have_pat = true;

            let rewritten = self
                .pat_rewriter
                .build(self.transport_stream_id, self.target_program, pmt_pid);
            out.rewritten_pat = Some(rewritten);
        }
    }

    fn feed_pmt(&mut self, packet: &TsPacket, header: &crate::packet::TsHeader, out: &mut TrackerOutput) {
        let pmt_pid = self.pmt_pid.expect("pmt_pid set before routing reaches feed_pmt");
        let collector = self.collectors.entry(pmt_pid).or_default();
        if !collector.add_data(packet.payload(), header.continuity_counter, header.payload_unit_start) {
            return;
        }
        let section_bytes = collector.section().unwrap().to_vec();
        collector.clear();

        let Ok(section) = PsiSection::parse(&section_bytes) else {
            return;
        };
        let Ok(pmt) = PmtTable::parse(&section) else {
            return;
        };

        for stream in &pmt.streams {
            self.active_pids.add(stream.elementary_pid, stream.filter_mask());
        }
        if let Some(pcr_pid) = pmt.pcr_pid() {
            self.active_pids.add(pcr_pid, FilterMask::PCR);
        }
        self.have_pmt = true;

        let streams: Vec<PmtStream> = pmt.streams.clone();
        let rewritten = self.pmt_rewriter.build(pmt_pid, pmt.program_number, pmt.pcr_pid, &streams);
        out.rewritten_pmt = Some(rewritten);
    }

    fn feed_sdt(&mut self, packet: &TsPacket, header: &crate::packet::TsHeader, out: &mut TrackerOutput) {
        let collector = self.collectors.entry(wellknown::SDT).or_default();
        if !collector.add_data(packet.payload(), header.continuity_counter, header.payload_unit_start) {
            return;
        }
        let section_bytes = collector.section().unwrap().to_vec();
        collector.clear();

        let Ok(section) = PsiSection::parse(&section_bytes) else {
            return;
        };
        if section.header.table_id != table_id::SDT_ACTUAL {
            return;
        }
        let Ok(sdt) = SdtTable::parse(&section) else {
            return;
        };

        if let Some(service) = sdt.find_service(self.target_program) {
            if let Some(desc) = service.service_descriptor() {
                self.service_info = Some(ServiceInfo {
                    provider: desc.provider_name,
                    name: desc.service_name,
                    service_type: desc.service_type,
                });
                self.have_sdt = true;
                out.events.push(StatusEvent::SdtChanged);
            }
        }
    }

    fn feed_eit(&mut self, packet: &TsPacket, header: &crate::packet::TsHeader, out: &mut TrackerOutput) {
        let collector = self.collectors.entry(wellknown::EIT).or_default();
        if !collector.add_data(packet.payload(), header.continuity_counter, header.payload_unit_start) {
            return;
        }
        let section_bytes = collector.section().unwrap().to_vec();
        collector.clear();

        let Ok(section) = PsiSection::parse(&section_bytes) else {
            return;
        };
        if section.header.table_id_extension != self.target_program {
            return;
        }
        let table_id = section.header.table_id;
        let Ok(parsed) = EitTable::parse(&section) else {
            return;
        };

        if let Some(slot) = self.eit_tables.iter_mut().find(|t| t.table_id == table_id) {
            if slot.version_number == parsed.version_number && !slot.events.is_empty() {
                return;
            }
            *slot = parsed;
        } else {
            let position = self
                .eit_tables
                .iter()
                .position(|t| t.table_id > table_id)
                .unwrap_or(self.eit_tables.len());
            self.eit_tables.insert(position, parsed);
        }

        out.events.push(StatusEvent::EitChanged(table_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{pid as wellknown, SYNC_BYTE, TS_PACKET_SIZE};

    fn pat_packet(ts_id: u16, program: u16, pmt_pid: u16, cc: u8) -> TsPacket {
        let section_data = [
            (program >> 8) as u8,
            program as u8,
            0xE0 | ((pmt_pid >> 8) as u8 & 0x1F),
            pmt_pid as u8,
        ];
        let mut section = vec![table_id::PAT, 0x80, 0x0D];
        section.push((ts_id >> 8) as u8);
        section.push(ts_id as u8);
        section.push(0xC1);
        section.push(0x00);
        section.push(0x00);
        section.extend_from_slice(&section_data);
        let crc = crate::psi::crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let mut bytes = [0xFFu8; TS_PACKET_SIZE];
        bytes[0] = SYNC_BYTE;
        bytes[1] = 0x40; // payload_unit_start, pid high bits 0
        bytes[2] = 0x00;
        bytes[3] = 0x10 | (cc & 0x0F);
        bytes[4] = 0x00; // pointer
        bytes[5..5 + section.len()].copy_from_slice(&section);
        TsPacket::from_raw(bytes)
    }

    #[test]
    fn tune_and_receive_scenario_primes_pat() {
        //: PAT(ts_id=1, prog 100 -> pid 4096).
        let mut tracker = PsiTracker::new(100);
        let packet = pat_packet(1, 100, 4096, 0);

        let out = tracker.feed(&packet);
        assert!(out.rewritten_pat.is_some());
        assert_eq!(tracker.active_pids().mask_for(4096), Some(FilterMask::PMT));

        // A second PAT must be discarded.
        let second = pat_packet(1, 100, 9999, 1);
        let out2 = tracker.feed(&second);
        assert!(out2.rewritten_pat.is_none());
        assert_eq!(tracker.active_pids().mask_for(9999), None);
    }

    #[test]
    fn reset_clears_learned_state() {
        let mut tracker = PsiTracker::new(100);
        tracker.feed(&pat_packet(1, 100, 4096, 0));
        assert!(tracker.active_pids().contains(4096));

        tracker.reset();
        assert!(!tracker.active_pids().contains(4096));
        assert!(tracker.active_pids().contains(wellknown::PAT));
    }
}
