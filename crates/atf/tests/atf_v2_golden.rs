//! Golden end-to-end checks of the on-disk format.

use ada_atf::types::NO_DETAIL_SEQ;
use ada_atf::{
    ClockType, DetailEventHeader, DetailFooter, DetailHeader, EventKind, IndexEvent, IndexFooter,
    IndexHeader, ThreadWriter, DETAIL_EVENT_HEADER_SIZE, INDEX_EVENT_SIZE,
};
use std::io::Read;
use std::path::Path;

fn read_all(path: &Path) -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut bytes = Vec::new();
    std::fs::File::open(path)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    bytes
}

#[test]
fn index_only_100_events_has_exact_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ThreadWriter::create(dir.path(), 0, ClockType::Boottime).unwrap();

    const DELTA: u64 = 17;
    for i in 0..100u64 {
        let seq = w.write_event(i * DELTA, 0xF000 + i, EventKind::Call, 0, None);
        assert_eq!(seq, i as u32);
    }
    w.finalize().unwrap();

    assert!(!dir.path().join("thread_0/detail.atf").exists());

    let bytes = read_all(&dir.path().join("thread_0/index.atf"));
    assert_eq!(bytes.len(), 64 + 100 * 32 + 64, "3328-byte golden size");

    let header = IndexHeader::decode(bytes[0..64].try_into().unwrap()).unwrap();
    assert_eq!(header.event_count, 100);
    assert_eq!(header.events_offset, 64);
    assert_eq!(header.footer_offset, 64 + 100 * 32);
    assert_eq!(header.time_start_ns, 0);
    assert_eq!(header.time_end_ns, 99 * DELTA);

    let footer = IndexFooter::decode(bytes[3264..3328].try_into().unwrap()).unwrap();
    assert_eq!(footer.event_count, 100);
    assert_eq!(footer.bytes_written, 3200);
    assert_eq!(footer.time_start_ns, header.time_start_ns);
    assert_eq!(footer.time_end_ns, header.time_end_ns);

    // Footer count equals the number of 32-byte slots between offsets.
    let slots = (header.footer_offset - header.events_offset) / INDEX_EVENT_SIZE as u64;
    assert_eq!(slots, footer.event_count);
}

#[test]
fn bidirectional_links_hold_for_mixed_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ThreadWriter::create(dir.path(), 1, ClockType::Boottime).unwrap();
    let payload = [0xAAu8; 100];

    // Alternating detail-bearing events across a longer stream.
    for i in 0..50u64 {
        let with_detail = i % 3 == 0;
        w.write_event(
            1000 + i,
            i,
            if i % 2 == 0 { EventKind::Call } else { EventKind::Return },
            (i % 5) as u32,
            with_detail.then_some(&payload[..]),
        );
    }
    w.finalize().unwrap();

    let idx = read_all(&dir.path().join("thread_1/index.atf"));
    let det = read_all(&dir.path().join("thread_1/detail.atf"));

    // Walk the detail stream into a map: detail ordinal -> header.
    let det_header = DetailHeader::decode(det[0..64].try_into().unwrap()).unwrap();
    let mut details = Vec::new();
    let mut at = det_header.events_offset as usize;
    for _ in 0..det_header.event_count {
        let h = DetailEventHeader::decode(det[at..at + 24].try_into().unwrap());
        details.push((h, at));
        at += h.total_length as usize;
    }

    // Every index event with a detail_seq must have exactly one partner
    // whose back link names its ordinal and whose timestamp matches.
    let idx_header = IndexHeader::decode(idx[0..64].try_into().unwrap()).unwrap();
    let mut linked = 0;
    for ordinal in 0..idx_header.event_count as usize {
        let s = 64 + ordinal * 32;
        let e = IndexEvent::decode(idx[s..s + 32].try_into().unwrap());
        if e.detail_seq == NO_DETAIL_SEQ {
            continue;
        }
        let (dh, _) = details[e.detail_seq as usize];
        assert_eq!(dh.index_seq, ordinal as u32);
        assert_eq!(dh.timestamp_ns, e.timestamp_ns);
        assert_eq!(dh.thread_id, e.thread_id);
        linked += 1;
    }
    assert_eq!(linked as u64, det_header.event_count);

    // Payload lengths agree with the headers' total_length prefix.
    for (h, at) in &details {
        assert_eq!(
            h.total_length as usize,
            DETAIL_EVENT_HEADER_SIZE + 100,
            "payload at {at} has the fixed function-payload length"
        );
    }

    let det_footer = DetailFooter::decode(det[det.len() - 64..].try_into().unwrap()).unwrap();
    assert_eq!(det_footer.event_count, det_header.event_count);
    assert_eq!(det_footer.bytes_length, det_header.bytes_length);
}

#[test]
fn event_count_equals_valid_write_calls() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ThreadWriter::create(dir.path(), 9, ClockType::Boottime).unwrap();

    let mut valid = 0u64;
    for i in 0..25u64 {
        if w.write_event(i, i, EventKind::Call, 0, None) != u32::MAX {
            valid += 1;
        }
    }
    assert_eq!(w.index_event_count(), valid);
    w.finalize().unwrap();

    let bytes = read_all(&dir.path().join("thread_9/index.atf"));
    let header = IndexHeader::decode(bytes[0..64].try_into().unwrap()).unwrap();
    assert_eq!(u64::from(header.event_count), valid);
}

#[test]
fn reopen_after_finalize_matches_written_state() {
    let dir = tempfile::tempdir().unwrap();
    let payload = [1u8; 100];
    {
        let mut w = ThreadWriter::create(dir.path(), 3, ClockType::Boottime).unwrap();
        w.write_event(5, 1, EventKind::Call, 0, Some(&payload));
        w.write_event(6, 1, EventKind::Return, 0, None);
        w.finalize().unwrap();
    }

    // Re-open both headers and footers cold: all counts and ranges match.
    let idx = read_all(&dir.path().join("thread_3/index.atf"));
    let header = IndexHeader::decode(idx[0..64].try_into().unwrap()).unwrap();
    let footer =
        IndexFooter::decode(idx[header.footer_offset as usize..][..64].try_into().unwrap())
            .unwrap();
    assert_eq!(header.event_count, 2);
    assert_eq!(footer.event_count, 2);
    assert_eq!((header.time_start_ns, header.time_end_ns), (5, 6));
    assert_eq!((footer.time_start_ns, footer.time_end_ns), (5, 6));

    let det = read_all(&dir.path().join("thread_3/detail.atf"));
    let dh = DetailHeader::decode(det[0..64].try_into().unwrap()).unwrap();
    assert_eq!(dh.event_count, 1);
    assert_eq!(dh.index_seq_start, 0);
    assert_eq!(dh.index_seq_end, 0);
}
