//! TS resynchroniser.
//!
//! Consumes arbitrary byte chunks and emits aligned, validated 188-byte
//! packets via a callback, resyncing on sync-byte loss. The five-window
//! confirmation is load-bearing for recovery after a DVR `EOVERFLOW` and is
//! kept exactly as specified, not simplified to "first 0x47 wins".

use crate::packet::{TsPacket, SYNC_BYTE, TS_PACKET_SIZE};

/// Number of consecutive 188-byte windows that must all start with the sync
/// byte before a candidate offset is accepted as the start of alignment.
const CONFIRM_WINDOWS: usize = 5;

/// Single-threaded, stateful resynchroniser. Holds no ownership of packets
/// past the callback return.
pub struct Resynchroniser {
    /// Bytes observed since the last delivered packet (or since the last
    /// resync), used both to search for alignment and to assemble the
    /// current in-progress packet.
    buffer: Vec<u8>,
    aligned: bool,
}

impl Default for Resynchroniser {
    fn default() -> Self {
        Self::new()
    }
}

impl Resynchroniser {
    pub fn new() -> Self {
        Resynchroniser {
            buffer: Vec::with_capacity(TS_PACKET_SIZE * (CONFIRM_WINDOWS + 1)),
            aligned: false,
        }
    }

    /// Feed an arbitrary chunk of bytes, invoking `deliver` once per emitted
    /// packet, in input order.
    pub fn feed(&mut self, data: &[u8], mut deliver: impl FnMut(TsPacket)) {
        self.buffer.extend_from_slice(data);

        loop {
            if !self.aligned {
                match self.find_confirmed_offset() {
                    Some(offset) => {
                        if offset > 0 {
                            self.buffer.drain(0..offset);
                        }
                        self.aligned = true;
                    }
                    None => {
                        // Drop everything that cannot possibly be confirmed:
                        // keep only the last (CONFIRM_WINDOWS-1) windows'
                        // worth of bytes as a tail that might still grow
                        // into a confirmable run once more data arrives.
                        let keep_from = self
                            .buffer
                            .len()
                            .saturating_sub(TS_PACKET_SIZE * (CONFIRM_WINDOWS - 1));
                        if keep_from > 0 {
                            self.buffer.drain(0..keep_from);
                        }
                        return;
                    }
                }
            }

            if self.buffer.len() < TS_PACKET_SIZE {
                return;
            }

            if self.buffer[0] != SYNC_BYTE {
                // Lost alignment mid-stream; resync from scratch.
                self.aligned = false;
                continue;
            }

            let mut bytes = [0u8; TS_PACKET_SIZE];
            bytes.copy_from_slice(&self.buffer[..TS_PACKET_SIZE]);
            self.buffer.drain(0..TS_PACKET_SIZE);
            deliver(TsPacket::from_raw(bytes));
        }
    }

    /// Scan the buffer for the first offset whose `CONFIRM_WINDOWS`
    /// successive 188-byte windows all begin with `SYNC_BYTE`.
    fn find_confirmed_offset(&self) -> Option<usize> {
        let needed = TS_PACKET_SIZE * CONFIRM_WINDOWS;
        if self.buffer.len() < needed {
            // Not enough data buffered to confirm any offset yet; check the
            // offsets that *could* still be confirmed once more data
            // arrives, but don't accept any of them prematurely.
            return None;
        }
        let max_offset = self.buffer.len() - needed;
        'offsets: for offset in 0..=max_offset {
            for w in 0..CONFIRM_WINDOWS {
                let idx = offset + w * TS_PACKET_SIZE;
                if self.buffer[idx] != SYNC_BYTE {
                    continue 'offsets;
                }
            }
            return Some(offset);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_at(n: u8) -> [u8; TS_PACKET_SIZE] {
        let mut buf = [0u8; TS_PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[1] = n; // marker so tests can distinguish packets
        buf
    }

    #[test]
    fn emits_aligned_packets_in_order() {
        let mut stream = Vec::new();
        for i in 0..10u8 {
            stream.extend_from_slice(&packet_at(i));
        }

        let mut r = Resynchroniser::new();
        let mut seen = Vec::new();
        r.feed(&stream, |pkt| seen.push(pkt.as_bytes()[1]));

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn resyncs_after_garbage_prefix() {
        let mut stream = vec![0xAAu8; 37]; // garbage, not a multiple of 188
        for i in 0..6u8 {
            stream.extend_from_slice(&packet_at(i));
        }

        let mut r = Resynchroniser::new();
        let mut seen = Vec::new();
        r.feed(&stream, |pkt| seen.push(pkt.as_bytes()[1]));

        assert_eq!(seen, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn single_sync_byte_without_stride_is_not_accepted() {
        // One 0x47 at a random position, not followed by 4 more at
        // 188-byte stride: must not be treated as an alignment point.
        let mut stream = vec![0u8; 50];
        stream[10] = SYNC_BYTE;
        // Not enough trailing data to ever confirm 5 windows.
        let mut r = Resynchroniser::new();
        let mut seen = 0;
        r.feed(&stream, |_| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn arbitrary_partition_yields_same_packets() {
        let mut stream = Vec::new();
        for i in 0..8u8 {
            stream.extend_from_slice(&packet_at(i));
        }

        // Feed the same bytes in small, uneven chunks.
        let mut r = Resynchroniser::new();
        let mut seen = Vec::new();
        for chunk in stream.chunks(17) {
            r.feed(chunk, |pkt| seen.push(pkt.as_bytes()[1]));
        }

        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn resyncs_when_continuity_breaks_mid_stream() {
        let mut stream = Vec::new();
        for i in 0..3u8 {
            stream.extend_from_slice(&packet_at(i));
        }
        // Corrupt the sync byte of the 4th packet only.
        let mut bad = packet_at(3);
        bad[0] = 0x00;
        stream.extend_from_slice(&bad);
        for i in 4..9u8 {
            stream.extend_from_slice(&packet_at(i));
        }

        let mut r = Resynchroniser::new();
        let mut seen = Vec::new();
        r.feed(&stream, |pkt| seen.push(pkt.as_bytes()[1]));

        // Packets 0..3 pass through; the corrupted packet never deemed
        // valid. After it, byte-by-byte resync finds the next run.
        assert!(seen.starts_with(&[0, 1, 2]));
        assert!(seen.contains(&8));
    }
}
