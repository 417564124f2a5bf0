//! Descriptor parsing for SDT and EIT service/event descriptors.
//!
//! Grounded on `recisdb-rs/src/ts_analyzer/descriptors.rs`: the
//! descriptor-loop walk and `ServiceDescriptor` layout are kept, but text
//! fields go through `crate::text::decode_si_string` instead of that file's
//! ARIB fallback, and the descriptor set is extended with the short/extended
//! event descriptors needed for EIT.

use crate::error::SectionError;
use crate::text::decode_si_string;

/// Walk a descriptor loop, returning `(tag, payload)` pairs.
pub fn parse_descriptor_loop(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut descriptors = Vec::new();
    let mut offset = 0;

    while offset + 2 <= data.len() {
        let tag = data[offset];
        let length = data[offset + 1] as usize;
        offset += 2;

        if offset + length > data.len() {
            break;
        }

        descriptors.push((tag, &data[offset..offset + length]));
        offset += length;
    }

    descriptors
}

/// Find the first descriptor with the given tag in a descriptor loop.
pub fn find_descriptor(data: &[u8], tag: u8) -> Option<&[u8]> {
    parse_descriptor_loop(data)
        .into_iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, d)| d)
}

/// Service descriptor (tag 0x48), carried in the SDT.
#[derive(Debug, Clone, Default)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub provider_name: String,
    pub service_name: String,
}

impl ServiceDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, SectionError> {
        if data.len() < 3 {
            return Err(SectionError::Malformed("service descriptor too short"));
        }

        let service_type = data[0];
        let provider_name_length = data[1] as usize;
        if data.len() < 2 + provider_name_length + 1 {
            return Err(SectionError::Malformed("invalid provider name length"));
        }
        let provider_name = decode_si_string(&data[2..2 + provider_name_length]);

        let service_name_offset = 2 + provider_name_length;
        let service_name_length = data[service_name_offset] as usize;
        if data.len() < service_name_offset + 1 + service_name_length {
            return Err(SectionError::Malformed("invalid service name length"));
        }
        let service_name = decode_si_string(
            &data[service_name_offset + 1..service_name_offset + 1 + service_name_length],
        );

        Ok(ServiceDescriptor {
            service_type,
            provider_name,
            service_name,
        })
    }
}

/// Short event descriptor (tag 0x4d), the EPG title/summary text.
#[derive(Debug, Clone, Default)]
pub struct ShortEventDescriptor {
    pub language_code: [u8; 3],
    pub event_name: String,
    pub text: String,
}

impl ShortEventDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, SectionError> {
        if data.len() < 4 {
            return Err(SectionError::Malformed("short event descriptor too short"));
        }
        let mut language_code = [0u8; 3];
        language_code.copy_from_slice(&data[0..3]);

        let event_name_length = data[3] as usize;
        let event_name_start = 4;
        if data.len() < event_name_start + event_name_length + 1 {
            return Err(SectionError::Malformed("invalid event name length"));
        }
        let event_name = decode_si_string(&data[event_name_start..event_name_start + event_name_length]);

        let text_length_offset = event_name_start + event_name_length;
        let text_length = data[text_length_offset] as usize;
        let text_start = text_length_offset + 1;
        if data.len() < text_start + text_length {
            return Err(SectionError::Malformed("invalid short event text length"));
        }
        let text = decode_si_string(&data[text_start..text_start + text_length]);

        Ok(ShortEventDescriptor {
            language_code,
            event_name,
            text,
        })
    }
}

/// One `(item_description, item)` pair out of an extended event
/// descriptor's item loop, e.g. `("Director", "Jane Doe")`.
#[derive(Debug, Clone)]
pub struct ExtendedEventItem {
    pub description: String,
    pub content: String,
}

/// Extended event descriptor (tag 0x4e).
#[derive(Debug, Clone, Default)]
pub struct ExtendedEventDescriptor {
    pub descriptor_number: u8,
    pub last_descriptor_number: u8,
    pub language_code: [u8; 3],
    pub items: Vec<ExtendedEventItem>,
    pub text: String,
}

impl ExtendedEventDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, SectionError> {
        if data.len() < 5 {
            return Err(SectionError::Malformed("extended event descriptor too short"));
        }
        let descriptor_number = (data[0] >> 4) & 0x0F;
        let last_descriptor_number = data[0] & 0x0F;
        let mut language_code = [0u8; 3];
        language_code.copy_from_slice(&data[1..4]);

        let items_length = data[4] as usize;
        let items_end = 5 + items_length;
        if items_end > data.len() {
            return Err(SectionError::Malformed("invalid items length"));
        }

        let mut items = Vec::new();
        let mut cursor = 5;
        while cursor < items_end {
            if cursor + 1 > items_end {
                return Err(SectionError::Malformed("truncated extended event item"));
            }
            let description_length = data[cursor] as usize;
            cursor += 1;
            if cursor + description_length > items_end {
                return Err(SectionError::Malformed("invalid item description length"));
            }
            let description = decode_si_string(&data[cursor..cursor + description_length]);
            cursor += description_length;

            if cursor + 1 > items_end {
                return Err(SectionError::Malformed("truncated extended event item"));
            }
            let content_length = data[cursor] as usize;
            cursor += 1;
            if cursor + content_length > items_end {
                return Err(SectionError::Malformed("invalid item content length"));
            }
            let content = decode_si_string(&data[cursor..cursor + content_length]);
            cursor += content_length;

            items.push(ExtendedEventItem { description, content });
        }

        let mut offset = items_end;
        if offset >= data.len() {
            return Err(SectionError::Malformed("missing extended text length"));
        }
        let text_length = data[offset] as usize;
        offset += 1;
        if data.len() < offset + text_length {
            return Err(SectionError::Malformed("invalid extended text length"));
        }
        let text = decode_si_string(&data[offset..offset + text_length]);

        Ok(ExtendedEventDescriptor {
            descriptor_number,
            last_descriptor_number,
            language_code,
            items,
            text,
        })
    }
}
