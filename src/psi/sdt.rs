//! SDT (Service Description Table) parsing, PID 17.
//!
//! Grounded on `recisdb-rs/src/ts_analyzer/sdt.rs` in the reference implementation.

use super::descriptors::{find_descriptor, ServiceDescriptor};
use super::{descriptor_tag, table_id, PsiSection};
use crate::error::SectionError;

#[derive(Debug, Clone, Default)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule_flag: bool,
    pub eit_present_following_flag: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<u8>,
}

impl SdtService {
    pub fn service_descriptor(&self) -> Option<ServiceDescriptor> {
        find_descriptor(&self.descriptors, descriptor_tag::SERVICE)
            .and_then(|d| ServiceDescriptor::parse(d).ok())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SdtTable {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version_number: u8,
    pub services: Vec<SdtService>,
}

impl SdtTable {
    pub fn parse(section: &PsiSection) -> Result<Self, SectionError> {
        if section.header.table_id != table_id::SDT_ACTUAL
            && section.header.table_id != table_id::SDT_OTHER
        {
            return Err(SectionError::WrongTableId);
        }

        let data = section.data;
        if data.len() < 3 {
            return Err(SectionError::TooShort);
        }

        let original_network_id = ((data[0] as u16) << 8) | data[1] as u16;

        let mut sdt = SdtTable {
            transport_stream_id: section.header.table_id_extension,
            original_network_id,
            version_number: section.header.version_number,
            services: Vec::new(),
        };

        let mut offset = 3;
        while offset + 5 <= data.len() {
            let service_id = ((data[offset] as u16) << 8) | data[offset + 1] as u16;
            let eit_schedule_flag = data[offset + 2] & 0x02 != 0;
            let eit_present_following_flag = data[offset + 2] & 0x01 != 0;
            let running_status = (data[offset + 3] >> 5) & 0x07;
            let free_ca_mode = data[offset + 3] & 0x10 != 0;
            let descriptors_length = ((data[offset + 3] as usize & 0x0F) << 8) | data[offset + 4] as usize;
            offset += 5;

            if offset + descriptors_length > data.len() {
                break;
            }
            let descriptors = data[offset..offset + descriptors_length].to_vec();
            offset += descriptors_length;

            sdt.services.push(SdtService {
                service_id,
                eit_schedule_flag,
                eit_present_following_flag,
                running_status,
                free_ca_mode,
                descriptors,
            });
        }

        Ok(sdt)
    }

    pub fn find_service(&self, service_id: u16) -> Option<&SdtService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::PsiHeader;

    #[test]
    fn parses_service_descriptor() {
        let name = b"demo";
        let provider = b"acme";
        let mut descriptors = vec![descriptor_tag::SERVICE, (3 + provider.len() + 1 + name.len()) as u8];
        descriptors.push(0x01); // service_type
        descriptors.push(provider.len() as u8);
        descriptors.extend_from_slice(provider);
        descriptors.push(name.len() as u8);
        descriptors.extend_from_slice(name);

        let mut data = vec![0x00, 0x01, 0x00]; // onid=1, reserved
        data.push(0x00); // service_id hi
        data.push(100); // service_id lo
        data.push(0b0000_0000); // eit flags off
        data.push(0x00 | ((descriptors.len() as u8) & 0x0F));
        data.push(descriptors.len() as u8);
        data.extend_from_slice(&descriptors);

        let sec = PsiSection {
            header: PsiHeader {
                table_id: table_id::SDT_ACTUAL,
                section_syntax_indicator: true,
                section_length: (5 + data.len() + 4) as u16,
                table_id_extension: 1,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            },
            data: &data,
            crc32: 0,
        };

        let sdt = SdtTable::parse(&sec).unwrap();
        let svc = sdt.find_service(100).unwrap();
        let desc = svc.service_descriptor().unwrap();
        assert_eq!(desc.service_name, "demo");
        assert_eq!(desc.provider_name, "acme");
    }
}
