use hako_mp4::recovery;
use hako_mp4::{
    CodecConfig, Demux, Mux, MuxConfig, MuxSample, MuxTrackParams, RecoveryConfig, TrackType,
    VideoDecoderConfig,
};
use std::io::Write;
use std::path::Path;

const SPS: [u8; 8] = [0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0xf0, 0x28];
const PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

fn recovery_mux(dir: &Path, name: &str) -> (Mux, std::path::PathBuf, std::path::PathBuf) {
    let media = dir.join(format!("{name}.mp4"));
    let link = dir.join(format!("{name}.lnk"));
    let tables = dir.join(format!("{name}.tables"));
    let mut config = MuxConfig::new(&media, 90000);
    config.recovery = Some(RecoveryConfig {
        link_file: link.clone(),
        tables_file: tables.clone(),
        check_storage_uuid: false,
    });
    (Mux::open(config).unwrap(), link, media)
}

fn add_video_track(mux: &mut Mux) -> u32 {
    let video = mux
        .add_track(&MuxTrackParams {
            track_type: TrackType::Video,
            name: None,
            enabled: true,
            in_movie: true,
            in_preview: true,
            timescale: 90000,
            creation_time: 1_700_000_000,
            modification_time: 0,
        })
        .unwrap();
    mux.set_video_decoder_config(
        video,
        &VideoDecoderConfig {
            width: 1280,
            height: 720,
            codec: CodecConfig::Avc {
                sps: SPS.to_vec(),
                pps: PPS.to_vec(),
            },
        },
    )
    .unwrap();
    video
}

fn payload(i: u64) -> Vec<u8> {
    (0..4096).map(|b| ((b as u64 + i) % 251) as u8).collect()
}

/// Crash scenario: 57 samples written to the media file, but only the first
/// 50 sample rows reached the journal before the process died.
#[test]
fn recover_after_crash_keeps_journaled_samples() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mux, link, media) = recovery_mux(dir.path(), "crash");
    let video = add_video_track(&mut mux);

    for i in 0..57u64 {
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &payload(i),
                sync: i % 30 == 0,
                dts: i * 1000,
            },
        )
        .unwrap();
        // Journal sync every 10 samples; the rows 50..57 never make it
        if i + 1 == 50 {
            mux.sync(false).unwrap();
        } else if (i + 1) % 10 == 0 && i + 1 < 50 {
            mux.sync(false).unwrap();
        }
    }
    // Simulated crash: the muxer is dropped without close, no moov written
    drop(mux);

    let recovered = recovery::recover_file(&link).unwrap();
    assert_eq!(recovered, media);

    let mut demux = Demux::from_file(&media).unwrap();
    assert_eq!(demux.track_count(), 1);
    let id = demux.track_ids()[0];
    let info = demux.track_info(0).unwrap();
    assert_eq!(info.sample_count, 50);
    assert_eq!(info.video_width, 1280);

    for i in 0..50u64 {
        let mut buf = vec![0u8; 4096];
        let sample = demux
            .get_track_sample(id, true, Some(&mut buf), None)
            .unwrap();
        assert_eq!(sample.size, 4096);
        assert_eq!(sample.dts, i * 1000);
        assert_eq!(buf, payload(i));
        assert_eq!(sample.sync, i % 30 == 0);
    }
    let end = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(end.size, 0);
}

/// A record torn mid-payload reads as end-of-journal, not as corruption.
#[test]
fn torn_tail_record_is_end_of_journal() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mux, link, media) = recovery_mux(dir.path(), "torn");
    let video = add_video_track(&mut mux);

    for i in 0..10u64 {
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &payload(i),
                sync: i == 0,
                dts: i * 1000,
            },
        )
        .unwrap();
    }
    mux.sync(false).unwrap();
    drop(mux);

    // Append a header that promises more rows than follow
    let info = recovery::parse_link_file(&link).unwrap();
    let mut tables = std::fs::OpenOptions::new()
        .append(true)
        .open(&info.tables_file)
        .unwrap();
    tables.write_all(&1u32.to_be_bytes()).unwrap(); // track handle
    tables.write_all(&u32::from_be_bytes(*b"stsz").to_be_bytes()).unwrap();
    tables.write_all(&4u32.to_be_bytes()).unwrap(); // 4 rows promised
    tables.write_all(&[0u8; 10]).unwrap(); // half a row delivered
    drop(tables);

    recovery::recover_file(&link).unwrap();
    let demux = Demux::from_file(&media).unwrap();
    assert_eq!(demux.track_info(0).unwrap().sample_count, 10);
}

#[test]
fn recovery_restores_metadata_and_cover() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mux, link, media) = recovery_mux(dir.path(), "meta");
    let video = add_video_track(&mut mux);

    mux.add_sample(
        video,
        &MuxSample {
            buffer: &payload(0),
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.add_file_metadata("com.apple.quicktime.artist", "ACME")
        .unwrap();
    let cover: Vec<u8> = (0..512).map(|i| i as u8).collect();
    mux.set_file_cover(hako_mp4::CoverType::Png, &cover).unwrap();
    mux.sync(false).unwrap();
    drop(mux);

    recovery::recover_file(&link).unwrap();

    let mut demux = Demux::from_file(&media).unwrap();
    assert!(demux
        .metadata_strings()
        .iter()
        .any(|(k, v)| k == "com.apple.quicktime.artist" && v == "ACME"));
    let (bytes, cover_type) = demux.metadata_cover_bytes().unwrap().unwrap();
    assert_eq!(cover_type, hako_mp4::CoverType::Png);
    assert_eq!(bytes, cover);
}

#[test]
fn recovery_without_any_sync_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mux, link, _media) = recovery_mux(dir.path(), "nosync");
    let video = add_video_track(&mut mux);
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &payload(0),
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    drop(mux);

    // Empty tables file: the record stopped before any sync
    assert!(recovery::recover_file(&link).is_err());
}

#[test]
fn finalize_removes_side_files() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mux, link, media) = recovery_mux(dir.path(), "fin");
    let video = add_video_track(&mut mux);
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &payload(0),
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.sync(false).unwrap();
    let info = recovery::parse_link_file(&link).unwrap();
    mux.close().unwrap();

    recovery::finalize(&link, false).unwrap();
    assert!(!link.exists());
    assert!(!info.tables_file.exists());
    assert!(media.exists());

    // The closed file is fully readable without recovery
    let demux = Demux::from_file(&media).unwrap();
    assert_eq!(demux.track_info(0).unwrap().sample_count, 1);
}

#[test]
fn sync_with_tables_makes_the_file_readable_midway() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("midway.mp4");

    let mut mux = Mux::open(MuxConfig::new(&media, 90000)).unwrap();
    let video = add_video_track(&mut mux);
    for i in 0..5u64 {
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &payload(i),
                sync: i == 0,
                dts: i * 3000,
            },
        )
        .unwrap();
    }
    mux.sync(true).unwrap();

    // Readable while the muxer is still open
    {
        let demux = Demux::from_file(&media).unwrap();
        assert_eq!(demux.track_info(0).unwrap().sample_count, 5);
    }

    for i in 5..8u64 {
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &payload(i),
                sync: false,
                dts: i * 3000,
            },
        )
        .unwrap();
    }
    mux.close().unwrap();

    let demux = Demux::from_file(&media).unwrap();
    assert_eq!(demux.track_info(0).unwrap().sample_count, 8);
}
