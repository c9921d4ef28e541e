use pocolog::block_stream::{read_prologue, BlockStream, BlockWriter, LogWriter};
use pocolog::decode::{DecoderResolver, PayloadDecoder};
use pocolog::{
    compress_logfile, rename_streams, to_new_format, BlockType, DataStream, Endianness, JointStream,
    LogCatalog, LogError, MigrationOutcome, StreamDeclaration, Timestamp,
};
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Write};
use std::rc::Rc;
use tempfile::NamedTempFile;

fn ts(sec: u32) -> Timestamp {
    Timestamp::new(sec, 0)
}

fn payload_for(name: &str, t: u32) -> Vec<u8> {
    format!("{name}@{t}").into_bytes()
}

/// One logfile with the given streams; samples are interleaved in logical
/// time order, rt = lg + 1000 s.
fn build_logfile(streams: &[(&str, &[u32])], endianness: Endianness) -> Vec<u8> {
    let mut writer = LogWriter::create(Cursor::new(Vec::new()), endianness).unwrap();
    let indexes: Vec<u16> = streams
        .iter()
        .map(|(name, _)| writer.create_stream(name, "/base/samples/Sample", b"", b"").unwrap())
        .collect();

    let mut samples: Vec<(u32, usize)> = Vec::new();
    for (slot, (_, times)) in streams.iter().enumerate() {
        samples.extend(times.iter().map(|&t| (t, slot)));
    }
    samples.sort();

    for (t, slot) in samples {
        let (name, _) = streams[slot];
        writer
            .write_sample(indexes[slot], ts(t + 1000), ts(t), &payload_for(name, t))
            .unwrap();
    }
    writer.into_inner().into_inner()
}

fn open_catalog(bytes: Vec<u8>) -> Rc<RefCell<LogCatalog<Cursor<Vec<u8>>>>> {
    Rc::new(RefCell::new(LogCatalog::open(Cursor::new(bytes)).unwrap()))
}

fn open_stream(bytes: Vec<u8>, name: &str) -> DataStream<Cursor<Vec<u8>>> {
    DataStream::open_by_name(open_catalog(bytes), name).unwrap()
}

// ── Block layer ──────────────────────────────────────────────────────────────

#[test]
fn test_block_round_trip() {
    let decl = StreamDeclaration {
        index: 0,
        name: "imu".to_string(),
        type_name: "/base/samples/IMUSensors".to_string(),
        registry: b"<registry blob>".to_vec(),
        metadata: b"rock_stream: imu".to_vec(),
    };

    let mut writer = BlockWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
    writer.write_stream_declaration(&decl).unwrap();
    writer
        .write_data_block(0, Timestamp::new(100, 250_000), ts(42), false, b"sample payload")
        .unwrap();
    writer.write_control_block(0, ts(100), ts(42), &[7]).unwrap();
    let bytes = writer.into_inner().into_inner();

    let mut stream = BlockStream::new(Cursor::new(bytes)).unwrap();

    let info = stream.read_next_block_header().unwrap().unwrap();
    assert_eq!(info.kind, BlockType::StreamDecl);
    assert_eq!(info.stream_index, 0);
    let parsed =
        StreamDeclaration::parse(info.stream_index, &stream.read_payload().unwrap(), Endianness::Little)
            .unwrap();
    assert_eq!(parsed, decl);

    let info = stream.read_next_block_header().unwrap().unwrap();
    assert_eq!(info.kind, BlockType::Data);
    let header = stream.read_data_block_header().unwrap();
    assert_eq!(header.rt, Timestamp::new(100, 250_000));
    assert_eq!(header.lg, ts(42));
    assert!(!header.compressed);
    assert_eq!(stream.read_payload().unwrap(), b"sample payload");

    let info = stream.read_next_block_header().unwrap().unwrap();
    assert_eq!(info.kind, BlockType::Control);
    assert_eq!(info.payload_size, 17);

    assert!(stream.read_next_block_header().unwrap().is_none());
}

#[test]
fn test_big_endian_file_round_trip() {
    let bytes = build_logfile(&[("imu", &[10, 11])], Endianness::Big);
    let catalog = open_catalog(bytes);
    assert_eq!(catalog.borrow().endianness(), Endianness::Big);

    let mut stream = DataStream::open_by_name(catalog, "imu").unwrap();
    let sample = stream.next().unwrap().unwrap();
    assert_eq!(sample.lg, ts(10));
    assert_eq!(sample.data, payload_for("imu", 10));
}

#[test]
fn test_missing_prologue_detection() {
    let err = LogCatalog::open(Cursor::new(b"not a logfile at all".to_vec())).unwrap_err();
    assert!(matches!(err, LogError::MissingPrologue));
}

#[test]
fn test_obsolete_version_detection() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"POCOLOG\0");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    let err = read_prologue(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, LogError::ObsoleteVersion { found: 1, .. }));
}

#[test]
fn test_writer_rejects_undeclared_stream() {
    let mut writer = LogWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
    writer.create_stream("imu", "/base/samples/Sample", b"", b"").unwrap();
    let err = writer.write_sample(3, ts(1001), ts(1), b"x").unwrap_err();
    assert!(matches!(err, LogError::UnknownStream(3)));
}

// ── Catalog and stream cursors ───────────────────────────────────────────────

#[test]
fn test_stream_table() {
    let bytes = build_logfile(&[("imu", &[10, 12, 14]), ("gps", &[11, 13])], Endianness::Little);
    let catalog = open_catalog(bytes);
    let mut cat = catalog.borrow_mut();

    let names: Vec<String> = cat.declarations().unwrap().iter().map(|d| d.name.clone()).collect();
    assert_eq!(names, ["imu", "gps"]);

    let imu = cat.info(0).unwrap();
    assert_eq!(imu.size, 3);
    assert_eq!(imu.interval_lg, Some((ts(10), ts(14))));
    assert_eq!(imu.interval_rt, Some((ts(1010), ts(1014))));

    let gps = cat.info(1).unwrap();
    assert_eq!(gps.size, 2);
    assert_eq!(gps.interval_lg, Some((ts(11), ts(13))));
}

#[test]
fn test_sequential_replay_matches_block_order() {
    let times = [10u32, 11, 12, 13, 14];
    let mut stream = open_stream(build_logfile(&[("imu", &times)], Endianness::Little), "imu");

    let mut seen = Vec::new();
    while let Some(sample) = stream.next().unwrap() {
        assert_eq!(sample.data, payload_for("imu", sample.lg.sec));
        seen.push(sample.lg.sec);
    }
    assert_eq!(seen, times);
}

#[test]
fn test_rewind_skips_null_logical_times() {
    let mut writer = LogWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
    let s = writer.create_stream("imu", "/base/samples/Sample", b"", b"").unwrap();
    writer.write_sample(s, ts(1000), Timestamp::default(), b"unstamped-1").unwrap();
    writer.write_sample(s, ts(1001), Timestamp::default(), b"unstamped-2").unwrap();
    writer.write_sample(s, ts(1010), ts(10), b"first real").unwrap();
    writer.write_sample(s, ts(1011), ts(11), b"second").unwrap();
    let bytes = writer.into_inner().into_inner();

    let mut stream = open_stream(bytes, "imu");
    assert_eq!(stream.size(), 4);

    let first = stream.first().unwrap().unwrap();
    assert_eq!(first.lg, ts(10));
    assert_eq!(first.data, b"first real");
    assert_eq!(stream.sample_index(), 2);

    let next = stream.next().unwrap().unwrap();
    assert_eq!(next.lg, ts(11));
}

#[test]
fn test_seek_by_index_and_time() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13, 14])], Endianness::Little);
    let mut stream = open_stream(bytes, "imu");

    let sample = stream.seek(2u64).unwrap();
    assert_eq!(sample.lg, ts(12));
    assert_eq!(stream.sample_index(), 2);
    assert_eq!(stream.time(), Some((ts(1012), ts(12))));

    // Between two samples: the one at or before wins.
    let sample = stream.seek(Timestamp::new(12, 500_000)).unwrap();
    assert_eq!(sample.lg, ts(12));

    // The caller reaches the first strictly-after sample with one next().
    let after = stream.next().unwrap().unwrap();
    assert_eq!(after.lg, ts(13));

    // Past the last sample: the last one wins.
    let sample = stream.seek(ts(1000)).unwrap();
    assert_eq!(sample.lg, ts(14));
}

#[test]
fn test_seek_monotonicity() {
    let times = [10u32, 11, 12, 13, 14, 15];
    let bytes = build_logfile(&[("imu", &times)], Endianness::Little);
    let mut stream = open_stream(bytes, "imu");

    for i in 0..times.len() {
        for j in i..times.len() {
            let at_i = stream.seek(ts(times[i])).unwrap().lg;
            let at_j = stream.seek(ts(times[j])).unwrap().lg;
            assert!(at_i <= at_j);
        }
    }
}

#[test]
fn test_seek_out_of_range() {
    let mut writer = LogWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
    writer.create_stream("empty", "/base/samples/Sample", b"", b"").unwrap();
    let bytes = writer.into_inner().into_inner();

    let mut stream = open_stream(bytes, "empty");
    assert!(matches!(stream.seek(0u64), Err(LogError::OutOfRange { .. })));

    let bytes = build_logfile(&[("imu", &[10, 11])], Endianness::Little);
    let mut stream = open_stream(bytes, "imu");
    assert!(matches!(stream.seek(5u64), Err(LogError::OutOfRange { .. })));
    assert!(matches!(stream.seek(ts(5)), Err(LogError::OutOfRange { .. })));
}

#[test]
fn test_last_sample_without_scan() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13])], Endianness::Little);
    let mut stream = open_stream(bytes, "imu");

    let last = stream.last().unwrap();
    assert_eq!(last.lg, ts(13));
    assert_eq!(stream.sample_index(), 3);
    assert!(stream.next().unwrap().is_none());
}

#[test]
fn test_time_interval_from_stream_table() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12])], Endianness::Little);
    let stream = open_stream(bytes, "imu");
    assert_eq!(stream.time_interval(false), Some((ts(10), ts(12))));
    assert_eq!(stream.time_interval(true), Some((ts(1010), ts(1012))));
}

// ── Joint streams ────────────────────────────────────────────────────────────

fn joint_fixture() -> JointStream<Cursor<Vec<u8>>> {
    let bytes = build_logfile(&[("a", &[10, 12, 14]), ("b", &[11, 13, 15])], Endianness::Little);
    let catalog = open_catalog(bytes);
    let a = DataStream::open_by_name(Rc::clone(&catalog), "a").unwrap();
    let b = DataStream::open_by_name(catalog, "b").unwrap();
    JointStream::new(vec![a, b])
}

#[test]
fn test_joint_merge_ordering_and_stale_hold() {
    let mut joint = joint_fixture();

    let mut merged = Vec::new();
    let mut at_13 = None;
    while let Some((time, data)) = joint.next().unwrap() {
        if time == ts(13) {
            at_13 = Some(data.clone());
        }
        merged.push(time.sec);
    }
    assert_eq!(merged, [10, 11, 12, 13, 14, 15]);

    // At merged time 13, stream a still holds its sample from t=12.
    let at_13 = at_13.unwrap();
    assert_eq!(at_13[0], payload_for("a", 12));
    assert_eq!(at_13[1], payload_for("b", 13));
}

#[test]
fn test_joint_seek_advances_to_limit() {
    let mut joint = joint_fixture();

    let (time, data) = joint.seek(Some(ts(13))).unwrap().unwrap();
    assert_eq!(time, ts(14));
    assert_eq!(data[0], payload_for("a", 14));
    assert_eq!(data[1], payload_for("b", 13));

    let remaining: Vec<u32> = std::iter::from_fn(|| joint.next().unwrap())
        .map(|(time, _)| time.sec)
        .collect();
    assert_eq!(remaining, [13, 14, 15]);
}

#[test]
fn test_joint_seek_past_end_reports_no_data() {
    let mut joint = joint_fixture();
    assert!(joint.seek(Some(ts(100))).unwrap().is_none());
    assert!(joint.next().unwrap().is_none());
}

#[test]
fn test_joint_header_snapshot_is_reproducible() {
    let mut joint = joint_fixture();

    let mut snapshot = None;
    while let Some((time, _)) = joint.next().unwrap() {
        if time == ts(13) {
            snapshot = joint.data_header();
        }
    }
    // The live state has moved on to t=15; the snapshot has not.
    let snapshot = snapshot.unwrap();
    let data = joint.data(Some(&snapshot)).unwrap();
    assert_eq!(data[0], payload_for("a", 12));
    assert_eq!(data[1], payload_for("b", 13));
}

#[test]
fn test_joint_stream_enumeration() {
    let joint = joint_fixture();

    // The first candidate is the initial merged state (time = max of the
    // first samples); decimation then walks the merge steps.
    let emitted: Vec<(u32, Vec<Vec<u8>>)> = joint
        .samples()
        .every(ts(2))
        .map(|s| {
            let (time, data) = s.unwrap();
            (time.sec, data)
        })
        .collect();

    let times: Vec<u32> = emitted.iter().map(|(t, _)| *t).collect();
    assert_eq!(times, [11, 13, 15]);

    // Stale-hold at merged time 13: stream a still holds its t=12 sample.
    assert_eq!(emitted[1].1[0], payload_for("a", 12));
    assert_eq!(emitted[1].1[1], payload_for("b", 13));
}

#[test]
fn test_joint_realtime_basis() {
    let mut joint = joint_fixture().realtime(true);
    let (time, _) = joint.rewind().unwrap().unwrap();
    assert_eq!(time, ts(1011));
}

// ── Sample enumeration ───────────────────────────────────────────────────────

#[test]
fn test_every_interval_decimation() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13, 14, 15])], Endianness::Little);
    let stream = open_stream(bytes, "imu");

    let emitted: Vec<u32> = stream
        .samples()
        .from(ts(10))
        .every(ts(2))
        .map(|s| s.unwrap().lg.sec)
        .collect();
    assert_eq!(emitted, [10, 12, 14]);
}

#[test]
fn test_time_decimation_catches_up_over_gaps() {
    let bytes = build_logfile(&[("imu", &[10, 11, 20, 21])], Endianness::Little);
    let stream = open_stream(bytes, "imu");

    // The gap advances the threshold past 20 in one catch-up, not one
    // emission per elapsed interval.
    let emitted: Vec<u32> = stream
        .samples()
        .every(ts(2))
        .map(|s| s.unwrap().lg.sec)
        .collect();
    assert_eq!(emitted, [10, 20]);
}

#[test]
fn test_index_step_decimation() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13, 14, 15])], Endianness::Little);
    let stream = open_stream(bytes, "imu");

    let emitted: Vec<u32> = stream
        .samples()
        .every(2u64)
        .map(|s| s.unwrap().lg.sec)
        .collect();
    assert_eq!(emitted, [10, 12, 14]);
}

#[test]
fn test_time_lower_bound_brackets_the_request() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13, 14])], Endianness::Little);
    let stream = open_stream(bytes, "imu");

    let emitted: Vec<u32> = stream
        .samples()
        .from(Timestamp::new(12, 500_000))
        .map(|s| s.unwrap().lg.sec)
        .collect();
    // One sample on each side of the requested time, then the rest.
    assert_eq!(emitted, [12, 13, 14]);
}

#[test]
fn test_decode_through_the_type_seam() {
    struct FirstByte;
    impl PayloadDecoder for FirstByte {
        type Value = u8;
        fn decode(&self, payload: &[u8], _endian_swap: bool) -> pocolog::Result<u8> {
            Ok(payload[0])
        }
    }
    struct ByTypeName;
    impl DecoderResolver for ByTypeName {
        type Decoder = FirstByte;
        fn resolve(&self, type_name: &str, _registry: &[u8]) -> pocolog::Result<FirstByte> {
            assert_eq!(type_name, "/base/samples/Sample");
            Ok(FirstByte)
        }
    }

    let bytes = build_logfile(&[("imu", &[10])], Endianness::Little);
    let mut stream = open_stream(bytes, "imu");
    let decoder = ByTypeName.resolve(stream.type_name(), stream.registry()).unwrap();

    let header = stream.rewind().unwrap().unwrap();
    assert_eq!(stream.decode(&decoder, &header).unwrap(), b'i');
}

#[test]
fn test_index_range_and_max_count() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13, 14, 15])], Endianness::Little);
    let stream = open_stream(bytes.clone(), "imu");

    let emitted: Vec<u32> = stream
        .samples()
        .between(1u64, 4u64)
        .map(|s| s.unwrap().lg.sec)
        .collect();
    assert_eq!(emitted, [11, 12, 13, 14]);

    let stream = open_stream(bytes, "imu");
    let emitted: Vec<u32> = stream.samples().max(2).map(|s| s.unwrap().lg.sec).collect();
    assert_eq!(emitted, [10, 11]);
}

#[test]
fn test_at_returns_the_sample_at_or_before() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12, 13])], Endianness::Little);

    let stream = open_stream(bytes.clone(), "imu");
    let emitted: Vec<u32> = stream
        .samples()
        .at(Timestamp::new(11, 500_000))
        .map(|s| s.unwrap().lg.sec)
        .collect();
    assert_eq!(emitted, [11]);

    let stream = open_stream(bytes, "imu");
    let emitted: Vec<u32> = stream.samples().at(ts(12)).map(|s| s.unwrap().lg.sec).collect();
    assert_eq!(emitted, [12]);
}

#[test]
fn test_enumerator_restarts() {
    let bytes = build_logfile(&[("imu", &[10, 11, 12])], Endianness::Little);
    let stream = open_stream(bytes, "imu");

    let mut samples = stream.samples().max(2);
    let first_pass: Vec<u32> = samples.by_ref().map(|s| s.unwrap().lg.sec).collect();
    samples.restart();
    let second_pass: Vec<u32> = samples.map(|s| s.unwrap().lg.sec).collect();
    assert_eq!(first_pass, second_pass);
}

// ── Compression rewriting ────────────────────────────────────────────────────

fn compressible_logfile() -> Vec<u8> {
    let mut writer = LogWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
    let s = writer.create_stream("scan", "/base/samples/LaserScan", b"", b"").unwrap();
    writer.write_sample(s, ts(1010), ts(10), &vec![0x42u8; 4096]).unwrap();
    writer.write_sample(s, ts(1011), ts(11), b"tiny").unwrap();
    writer.into_inner().into_inner()
}

#[test]
fn test_compress_roundtrip_and_threshold() {
    let original = compressible_logfile();
    let mut compressed = Cursor::new(Vec::new());
    compress_logfile(Cursor::new(original.clone()), &mut compressed).unwrap();
    let compressed = compressed.into_inner();
    assert!(compressed.len() < original.len());

    let mut stream = open_stream(compressed.clone(), "scan");
    let big = stream.next().unwrap().unwrap();
    assert_eq!(big.data, vec![0x42u8; 4096]);
    let small = stream.next().unwrap().unwrap();
    assert_eq!(small.data, b"tiny");

    // The large payload is flagged, the small one stays verbatim.
    let mut blocks = BlockStream::new(Cursor::new(compressed)).unwrap();
    let mut flags = Vec::new();
    while let Some(info) = blocks.read_next_block_header().unwrap() {
        if info.kind == BlockType::Data {
            flags.push(blocks.read_data_block_header().unwrap().compressed);
        }
    }
    assert_eq!(flags, [true, false]);
}

#[test]
fn test_compress_is_idempotent() {
    let mut once = Cursor::new(Vec::new());
    compress_logfile(Cursor::new(compressible_logfile()), &mut once).unwrap();
    let once = once.into_inner();

    let mut twice = Cursor::new(Vec::new());
    compress_logfile(Cursor::new(once.clone()), &mut twice).unwrap();
    assert_eq!(once, twice.into_inner());
}

#[test]
fn test_corrupt_compressed_payload_is_an_error() {
    let mut writer = BlockWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
    let decl = StreamDeclaration::new(0, "scan", "/base/samples/LaserScan");
    writer.write_stream_declaration(&decl).unwrap();
    writer.write_data_block(0, ts(1010), ts(10), true, b"this is not zlib data").unwrap();
    let bytes = writer.into_inner().into_inner();

    let mut stream = open_stream(bytes, "scan");
    assert!(matches!(stream.next(), Err(LogError::Decompression(_))));
}

// ── Stream renaming ──────────────────────────────────────────────────────────

#[test]
fn test_rename_streams_keeps_everything_else() {
    let original = build_logfile(&[("imu", &[10, 11]), ("gps", &[12])], Endianness::Little);
    let mut renamed = Cursor::new(Vec::new());
    let mappings = HashMap::from([("imu".to_string(), "imu_fixed".to_string())]);
    rename_streams(Cursor::new(original.clone()), &mut renamed, &mappings).unwrap();
    let renamed = renamed.into_inner();

    let catalog = open_catalog(renamed);
    let mut cat = catalog.borrow_mut();
    let names: Vec<String> = cat.declarations().unwrap().iter().map(|d| d.name.clone()).collect();
    assert_eq!(names, ["imu_fixed", "gps"]);
    drop(cat);

    let mut stream = DataStream::open_by_name(catalog, "imu_fixed").unwrap();
    let sample = stream.next().unwrap().unwrap();
    assert_eq!(sample.data, payload_for("imu", 10));
}

// ── v1 migration ─────────────────────────────────────────────────────────────

fn v1_time(t: Timestamp) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&t.sec.to_le_bytes());
    out.extend_from_slice(&t.usec.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

fn v1_block(kind: BlockType, stream_index: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.push(kind.as_u8());
    out.push(0);
    out.extend_from_slice(&stream_index.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// A little-endian v1 file: one stream declaration, three data blocks with
/// the padded wide time encoding, one control block.
fn v1_logfile() -> Vec<u8> {
    let decl = StreamDeclaration::new(0, "imu", "/base/samples/IMUSensors");
    let mut bytes = v1_block(BlockType::StreamDecl, 0, &decl.encode(Endianness::Little));
    for t in [10u32, 11, 12] {
        let mut payload = v1_time(ts(t + 1000));
        payload.extend_from_slice(&v1_time(ts(t)));
        payload.extend_from_slice(&payload_for("imu", t));
        bytes.extend_from_slice(&v1_block(BlockType::Data, 0, &payload));
    }
    let mut control = v1_time(ts(1013));
    control.extend_from_slice(&v1_time(ts(13)));
    control.push(7);
    bytes.extend_from_slice(&v1_block(BlockType::Control, 0, &control));
    bytes
}

#[test]
fn test_migration_preserves_count_order_and_times() {
    let mut migrated = Cursor::new(Vec::new());
    let outcome =
        to_new_format(Cursor::new(v1_logfile()), &mut migrated, Some(Endianness::Little)).unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated);
    let migrated = migrated.into_inner();

    let catalog = open_catalog(migrated.clone());
    {
        let mut cat = catalog.borrow_mut();
        let kinds: Vec<BlockType> = cat
            .block_headers(true)
            .map(|info| info.unwrap().kind)
            .collect();
        assert_eq!(
            kinds,
            [BlockType::StreamDecl, BlockType::Data, BlockType::Data, BlockType::Data, BlockType::Control]
        );
    }

    let mut stream = DataStream::open_by_name(catalog, "imu").unwrap();
    assert_eq!(stream.size(), 3);
    let mut times = Vec::new();
    while let Some(sample) = stream.next().unwrap() {
        assert_eq!(sample.rt, ts(sample.lg.sec + 1000));
        assert_eq!(sample.data, payload_for("imu", sample.lg.sec));
        times.push(sample.lg.sec);
    }
    assert_eq!(times, [10, 11, 12]);

    // The control block kept its body with the times compacted: 16 bytes of
    // time pair plus the one-byte command.
    let mut blocks = BlockStream::new(Cursor::new(migrated)).unwrap();
    let mut control_size = None;
    while let Some(info) = blocks.read_next_block_header().unwrap() {
        if info.kind == BlockType::Control {
            control_size = Some(info.payload_size);
        }
    }
    assert_eq!(control_size, Some(17));
}

#[test]
fn test_migration_requires_declared_endianness() {
    let err = to_new_format(Cursor::new(v1_logfile()), Cursor::new(Vec::new()), None).unwrap_err();
    assert!(matches!(err, LogError::MissingPrologue));
}

#[test]
fn test_migration_skips_current_format_files() {
    let current = build_logfile(&[("imu", &[10])], Endianness::Little);
    let mut out = Cursor::new(Vec::new());
    let outcome = to_new_format(Cursor::new(current), &mut out, None).unwrap();
    assert_eq!(outcome, MigrationOutcome::AlreadyCurrent);
    assert!(out.into_inner().is_empty());
}

// ── File-backed usage ────────────────────────────────────────────────────────

#[test]
fn test_file_backed_catalog() {
    let temp_file = NamedTempFile::new().unwrap();
    let bytes = build_logfile(&[("imu", &[10, 11, 12])], Endianness::Little);
    temp_file.as_file().write_all(&bytes).unwrap();

    let catalog = Rc::new(RefCell::new(
        LogCatalog::open(File::open(temp_file.path()).unwrap()).unwrap(),
    ));
    let mut stream = DataStream::open_by_name(catalog, "imu").unwrap();
    let last = stream.last().unwrap();
    assert_eq!(last.lg, ts(12));
}

// ── Properties ───────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_data_block_round_trip(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        rt_sec in 1u32..1 << 30,
        rt_usec in 0u32..1_000_000,
        lg_sec in 1u32..1 << 30,
        lg_usec in 0u32..1_000_000,
    ) {
        let rt = Timestamp::new(rt_sec, rt_usec);
        let lg = Timestamp::new(lg_sec, lg_usec);

        let mut writer = BlockWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
        writer.write_data_block(5, rt, lg, false, &payload).unwrap();
        let bytes = writer.into_inner().into_inner();

        let mut stream = BlockStream::new(Cursor::new(bytes)).unwrap();
        let info = stream.read_next_block_header().unwrap().unwrap();
        prop_assert_eq!(info.stream_index, 5);
        let header = stream.read_data_block_header().unwrap();
        prop_assert_eq!(header.rt, rt);
        prop_assert_eq!(header.lg, lg);
        prop_assert_eq!(stream.read_payload().unwrap(), payload);
    }

    #[test]
    fn prop_compressed_samples_survive_the_rewrite(
        payload in proptest::collection::vec(any::<u8>(), 501..3000),
    ) {
        let mut writer = LogWriter::create(Cursor::new(Vec::new()), Endianness::Little).unwrap();
        let s = writer.create_stream("s", "/t", b"", b"").unwrap();
        writer.write_sample(s, ts(1001), ts(1), &payload).unwrap();
        let original = writer.into_inner().into_inner();

        let mut compressed = Cursor::new(Vec::new());
        compress_logfile(Cursor::new(original), &mut compressed).unwrap();
        // Never larger than storing the payload uncompressed.
        prop_assert!(compressed.get_ref().len() <= 16 + 8 + 4 * 4 + 3 + 8 + 17 + payload.len());

        let mut stream = open_stream(compressed.into_inner(), "s");
        let sample = stream.next().unwrap().unwrap();
        prop_assert_eq!(sample.data, payload);
    }
}
