//! End-to-end scenarios from `SPEC_FULL.md` §8, driven without any real
//! DVB hardware: a canned TS byte stream is fed straight through
//! `PsiTracker` and a `ListenerFabric`, the same two pieces `DvbReader`'s
//! data thread wires together on every packet (see `src/reader.rs`).

use std::sync::{Arc, Mutex};

use dvbreader::listener::{ListenerFabric, ListenerSink};
use dvbreader::packet::{FilterMask, TsPacket, SYNC_BYTE, TS_PACKET_SIZE};
use dvbreader::psi::{crc32_mpeg2, table_id};
use dvbreader::status::{CallbackSink, StatusSink};
use dvbreader::tracker::PsiTracker;

/// Build a single-packet PAT section announcing `program_number -> pmt_pid`
/// on a transport stream `ts_id`.
fn pat_packet(ts_id: u16, program_number: u16, pmt_pid: u16, cc: u8) -> TsPacket {
    let mut section = vec![table_id::PAT, 0x80, 0x00];
    section.push((ts_id >> 8) as u8);
    section.push(ts_id as u8);
    section.push(0xC1); // version 0, current_next=1
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    section.push((program_number >> 8) as u8);
    section.push(program_number as u8);
    section.push(0xE0 | ((pmt_pid >> 8) as u8 & 0x1F));
    section.push(pmt_pid as u8);
    let section_length = section.len() - 3 + 4;
    section[1] = 0x80 | ((section_length >> 8) as u8 & 0x0F);
    section[2] = section_length as u8;
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    wrap_section(0, &section, cc)
}

/// Build a single-packet PMT section for `program_number` on `pmt_pid`
/// with two elementary streams: H.264 video and MPEG audio.
fn pmt_packet(pmt_pid: u16, program_number: u16, video_pid: u16, audio_pid: u16, cc: u8) -> TsPacket {
    let mut section = vec![table_id::PMT, 0x80, 0x00];
    section.push((program_number >> 8) as u8);
    section.push(program_number as u8);
    section.push(0xC1);
    section.push(0x00);
    section.push(0x00);
    section.push(0x1F); // pcr_pid = 0x1FFF (no PCR), high bits
    section.push(0xFF);
    section.push(0xF0); // program_info_length = 0
    section.push(0x00);
    // video stream, type 0x1b (H.264)
    section.push(0x1b);
    section.push(0xE0 | ((video_pid >> 8) as u8 & 0x1F));
    section.push(video_pid as u8);
    section.push(0xF0);
    section.push(0x00);
    // audio stream, type 0x03 (MPEG-1 audio)
    section.push(0x03);
    section.push(0xE0 | ((audio_pid >> 8) as u8 & 0x1F));
    section.push(audio_pid as u8);
    section.push(0xF0);
    section.push(0x00);
    let section_length = section.len() - 3 + 4;
    section[1] = 0x80 | ((section_length >> 8) as u8 & 0x0F);
    section[2] = section_length as u8;
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    wrap_section(pmt_pid, &section, cc)
}

fn wrap_section(pid: u16, section: &[u8], cc: u8) -> TsPacket {
    let mut bytes = [0xFFu8; TS_PACKET_SIZE];
    bytes[0] = SYNC_BYTE;
    bytes[1] = 0x40 | ((pid >> 8) as u8 & 0x1F); // payload_unit_start
    bytes[2] = pid as u8;
    bytes[3] = 0x10 | (cc & 0x0F); // payload only
    bytes[4] = 0x00; // pointer field
    let copy_len = section.len().min(TS_PACKET_SIZE - 5);
    bytes[5..5 + copy_len].copy_from_slice(&section[..copy_len]);
    TsPacket::from_slice(&bytes).unwrap()
}

/// A plain payload packet on `pid`, carrying `marker` as its first payload
/// byte so tests can tell packets apart.
fn payload_packet(pid: u16, marker: u8, cc: u8) -> TsPacket {
    let mut bytes = [0u8; TS_PACKET_SIZE];
    bytes[0] = SYNC_BYTE;
    bytes[1] = (pid >> 8) as u8 & 0x1F;
    bytes[2] = pid as u8;
    bytes[3] = 0x10 | (cc & 0x0F);
    bytes[4] = marker;
    TsPacket::from_slice(&bytes).unwrap()
}

fn noop_status() -> Arc<dyn StatusSink> {
    Arc::new(CallbackSink::new(|_| {}))
}

/// A callback sink that records the first payload byte of every delivered
/// packet, tagged with which PID it arrived on (PAT/PMT are recognizable
/// by their fixed marker bytes in this test's packets; payload packets by
/// their own marker).
fn collecting_sink() -> (ListenerSink, Arc<Mutex<Vec<Vec<u8>>>>) {
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    let sink = ListenerSink::Cb(Arc::new(move |bytes: &[u8]| {
        received_clone.lock().unwrap().push(bytes.to_vec());
    }));
    (sink, received)
}

/// Scenario 1 (spec §8): tune, receive PAT/PMT priming then payload, in
/// order, only on the PIDs the listener's filter selects.
#[test]
fn tune_and_receive_delivers_pat_pmt_then_payload_in_order() {
    let fabric = ListenerFabric::new(noop_status());
    let mut tracker = PsiTracker::new(100);

    let (sink, received) = collecting_sink();
    let id = fabric.set_listener(FilterMask::VIDEO | FilterMask::AUDIO | FilterMask::PAT | FilterMask::PMT, sink, None, None);

    // PAT(ts_id=1, prog 100 -> pid 4096).
    let out = tracker.feed(&pat_packet(1, 100, 4096, 0));
    assert!(out.rewritten_pat.is_some());
    // No PMT yet: fabric hasn't been re-primed (reader.rs only re-primes on
    // a *fresh* PMT arriving alongside an already-known PAT).

    // PMT(4096) with ES {0x1b on 4097 (video), 0x03 on 4098 (audio)}.
    let out = tracker.feed(&pmt_packet(4096, 100, 4097, 4098, 0));
    let pat = tracker_pat(&mut tracker);
    let pmt = out.rewritten_pmt.expect("pmt rewritten");
    fabric.reprime_all(&pat, &pmt);

    // Payload on video/audio PIDs.
    let video = payload_packet(4097, 0xAA, 0);
    let audio = payload_packet(4098, 0xBB, 0);
    fabric.dispatch(&video, FilterMask::VIDEO);
    fabric.dispatch(&audio, FilterMask::AUDIO);
    fabric.flush_all();

    std::thread::sleep(std::time::Duration::from_millis(100));

    let seen = received.lock().unwrap();
    assert_eq!(seen.len(), 3, "expected PAT, PMT, then one coalesced payload flush");
    assert_eq!(seen[0][0], SYNC_BYTE);
    assert_eq!(pid_of(&seen[0]), 0); // PAT on pid 0
    assert_eq!(pid_of(&seen[1]), 4096); // PMT on its own pid
    // The third message is the coalesced video+audio payload, video first.
    assert_eq!(seen[2][4], 0xAA);
    assert_eq!(seen[2][TS_PACKET_SIZE + 4], 0xBB);

    fabric.remove_listener(id);
}

/// Scenario 2 (spec §8): a listener registered mid-stream, after PAT/PMT
/// have already been observed, still receives a synthesised PAT and PMT
/// before any payload.
#[test]
fn mid_stream_join_is_primed_before_payload() {
    let fabric = ListenerFabric::new(noop_status());
    let mut tracker = PsiTracker::new(100);

    tracker.feed(&pat_packet(1, 100, 4096, 0));
    let out = tracker.feed(&pmt_packet(4096, 100, 4097, 4098, 0));
    let pat = tracker_pat(&mut tracker);
    let pmt = out.rewritten_pmt.unwrap();

    // New listener joins after PAT/PMT are already known: `DvbReader::
    // set_listener` looks up the last-rendered PAT/PMT and passes them as
    // the priming packets, exactly as modeled here.
    let (sink, received) = collecting_sink();
    fabric.set_listener(FilterMask::ALL, sink, Some(pat.as_slice()), Some(pmt.as_slice()));

    let video = payload_packet(4097, 0xCC, 0);
    fabric.dispatch(&video, FilterMask::VIDEO);
    fabric.flush_all();

    std::thread::sleep(std::time::Duration::from_millis(100));

    let seen = received.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(pid_of(&seen[0]), 0);
    assert_eq!(pid_of(&seen[1]), 4096);
    assert_eq!(seen[2][4], 0xCC);
}

/// Scenario 4 (spec §8): retuning resets `ActivePids` to the well-known set
/// plus whatever the new PAT/PMT declare, and clears EIT tables.
#[test]
fn retune_resets_active_pids_and_eit_tables() {
    let mut tracker = PsiTracker::new(100);
    tracker.feed(&pat_packet(1, 100, 4096, 0));
    tracker.feed(&pmt_packet(4096, 100, 4097, 4098, 0));

    assert!(tracker.active_pids().contains(4097));
    assert!(tracker.active_pids().contains(4098));

    tracker.reset();

    assert!(!tracker.active_pids().contains(4097));
    assert!(!tracker.active_pids().contains(4098));
    assert!(tracker.active_pids().contains(0));
    assert!(tracker.active_pids().contains(17));
    assert!(tracker.active_pids().contains(18));
    assert!(tracker.active_pids().contains(19));
    assert!(tracker.eit_tables().is_empty());
    assert!(tracker.service_info().is_none());

    // A retune to a different program re-learns PAT/PMT from scratch.
    let mut retuned = PsiTracker::new(200);
    let out = retuned.feed(&pat_packet(2, 200, 5000, 0));
    assert!(out.rewritten_pat.is_some());
    assert_eq!(retuned.active_pids().mask_for(5000), Some(FilterMask::PMT));
}

fn pid_of(bytes: &[u8]) -> u16 {
    ((bytes[1] as u16 & 0x1F) << 8) | bytes[2] as u16
}

/// Re-feeding the same PAT packet is a no-op once `have_pat` has latched
/// (the tracker discards later PATs), so to get a `TsPacket` for the
/// already-accepted PAT in these tests we simply rebuild it from the same
/// inputs the test already fed in: real callers get this from
/// `DvbReader`'s `last_pat` cache (`src/reader.rs`) instead of refeeding.
fn tracker_pat(_tracker: &mut PsiTracker) -> Vec<TsPacket> {
    let mut rewriter = dvbreader::psi::rewriter::PatRewriter::new();
    rewriter.build(1, 100, 4096)
}
