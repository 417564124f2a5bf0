//! PAT (Program Association Table) parsing, PID 0x0000.
//!
//! Grounded on `ts_analyzer/pat.rs` / `recisdb-rs/src/ts_analyzer/pat.rs` in
//! the reference implementation.

use super::{table_id, PsiSection};
use crate::error::SectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    /// Program number (0 = NIT, others = service).
    pub program_number: u16,
    pub pid: u16,
}

#[derive(Debug, Clone, Default)]
pub struct PatTable {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub programs: Vec<PatEntry>,
    pub nit_pid: Option<u16>,
}

impl PatTable {
    pub fn parse(section: &PsiSection) -> Result<Self, SectionError> {
        if section.header.table_id != table_id::PAT {
            return Err(SectionError::WrongTableId);
        }

        let data = section.data;
        if data.len() % 4 != 0 {
            return Err(SectionError::Malformed("PAT data length not a multiple of 4"));
        }

        let mut pat = PatTable {
            transport_stream_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            programs: Vec::new(),
            nit_pid: None,
        };

        for chunk in data.chunks(4) {
            let program_number = ((chunk[0] as u16) << 8) | chunk[1] as u16;
            let pid = ((chunk[2] as u16 & 0x1F) << 8) | chunk[3] as u16;

            if program_number == 0 {
                pat.nit_pid = Some(pid);
            } else {
                pat.programs.push(PatEntry { program_number, pid });
            }
        }

        Ok(pat)
    }

    /// Find the PMT PID for the entry whose program_number equals the
    /// configured target program.
    pub fn get_pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == program_number)
            .map(|p| p.pid)
    }
}
