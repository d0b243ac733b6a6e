use hako_mp4::{
    CodecConfig, CoverType, Demux, HvccInfo, Mux, MuxConfig, MuxSample, MuxTrackParams, TrackType,
    VideoDecoderConfig,
};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const SPS: [u8; 23] = [
    0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0xf0, 0x28, 0xd0, 0x80, 0x00, 0x00, 0x03, 0x00, 0x80,
    0x00, 0x00, 0x1e, 0x07, 0x8b, 0x16, 0xcb, 0x80,
];
const PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

fn video_params(timescale: u32) -> MuxTrackParams {
    MuxTrackParams {
        track_type: TrackType::Video,
        name: Some("DefaultVideo".to_string()),
        enabled: true,
        in_movie: true,
        in_preview: true,
        timescale,
        creation_time: 1_000_000,
        modification_time: 0,
    }
}

fn avc_config() -> VideoDecoderConfig {
    VideoDecoderConfig {
        width: 1920,
        height: 1080,
        codec: CodecConfig::Avc {
            sps: SPS.to_vec(),
            pps: PPS.to_vec(),
        },
    }
}

fn sample_payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

fn open_mux(path: &Path, timescale: u32) -> Mux {
    Mux::open(MuxConfig::new(path, timescale)).unwrap()
}

#[test]
fn single_avc_sample_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single.mp4");

    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    let payload = sample_payload(1024, 0);
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &payload,
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.close().unwrap();

    let mut demux = Demux::from_file(&path).unwrap();
    assert_eq!(demux.track_count(), 1);

    let track = demux.track_info(0).unwrap();
    assert_eq!(track.track_type, TrackType::Video);
    assert_eq!(track.sample_count, 1);
    assert_eq!(track.timescale, 30000);
    assert_eq!(track.video_width, 1920);
    assert_eq!(track.video_height, 1080);
    assert_eq!(demux.track_sample_sizes(track.id).unwrap(), &[1024]);

    let mut buf = vec![0u8; 2048];
    let sample = demux
        .get_track_sample(track.id, true, Some(&mut buf), None)
        .unwrap();
    assert_eq!(sample.size, 1024);
    assert_eq!(sample.dts, 0);
    assert!(sample.sync);
    assert!(!sample.silent);
    assert_eq!(&buf[..1024], &payload[..]);

    // End of track is a zero-size sample, not an error
    let end = demux.get_track_sample(track.id, true, None, None).unwrap();
    assert_eq!(end.size, 0);

    // The submitted bytes sit at the very start of the mdat payload
    let mut file = std::fs::File::open(&path).unwrap();
    file.seek(SeekFrom::Start(sample.offset)).unwrap();
    let mut on_disk = vec![0u8; 1024];
    file.read_exact(&mut on_disk).unwrap();
    assert_eq!(on_disk, payload);
}

#[test]
fn avc_decoder_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("avc.mp4");

    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &[0u8; 16],
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.close().unwrap();

    let demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];
    let config = demux.video_decoder_config(id).unwrap();
    assert_eq!(config.width, 1920);
    assert_eq!(config.height, 1080);
    match config.codec {
        CodecConfig::Avc { sps, pps } => {
            assert_eq!(sps, SPS.to_vec());
            assert_eq!(pps, PPS.to_vec());
        }
        other => panic!("expected AVC config, got {:?}", other),
    }
}

#[test]
fn hevc_decoder_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hevc.mp4");

    let hvcc_info = HvccInfo {
        general_profile_space: 0,
        general_tier_flag: 0,
        general_profile_idc: 1,
        general_profile_compatibility_flags: 0x6000_0000,
        general_constraints_indicator_flags: 0x9000_0000_0000,
        general_level_idc: 120,
        min_spatial_segmentation_idc: 0,
        parallelism_type: 0,
        chroma_format: 1,
        bit_depth_luma: 8,
        bit_depth_chroma: 8,
        avg_framerate: 0,
        constant_framerate: 0,
        num_temporal_layers: 1,
        temporal_id_nested: 1,
        length_size: 4,
    };
    let vps = vec![0x40, 0x01, 0x0c, 0x01, 0xff, 0xff];
    let sps = vec![0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03];
    let pps = vec![0x44, 0x01, 0xc1, 0x72, 0xb4, 0x62];

    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(
        video,
        &VideoDecoderConfig {
            width: 3840,
            height: 2160,
            codec: CodecConfig::Hevc {
                hvcc_info,
                vps: vps.clone(),
                sps: sps.clone(),
                pps: pps.clone(),
            },
        },
    )
    .unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &[0u8; 16],
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.close().unwrap();

    let demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];
    let config = demux.video_decoder_config(id).unwrap();
    match config.codec {
        CodecConfig::Hevc {
            hvcc_info: parsed,
            vps: r_vps,
            sps: r_sps,
            pps: r_pps,
        } => {
            assert_eq!(parsed, hvcc_info);
            assert_eq!(r_vps, vps);
            assert_eq!(r_sps, sps);
            assert_eq!(r_pps, pps);
        }
        other => panic!("expected HEVC config, got {:?}", other),
    }
}

#[test]
fn aac_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aac.mp4");

    // AAC-LC, 48 kHz, stereo
    let asc = vec![0x11, 0x90];

    let mut mux = open_mux(&path, 48000);
    let audio = mux
        .add_track(&MuxTrackParams {
            track_type: TrackType::Audio,
            name: None,
            enabled: true,
            in_movie: true,
            in_preview: true,
            timescale: 48000,
            creation_time: 0,
            modification_time: 0,
        })
        .unwrap();
    mux.set_audio_specific_config(audio, &asc, 2, 16, 48000.0)
        .unwrap();
    for i in 0..4u64 {
        mux.add_sample(
            audio,
            &MuxSample {
                buffer: &sample_payload(256, i as u8),
                sync: true,
                dts: i * 1024,
            },
        )
        .unwrap();
    }
    mux.close().unwrap();

    let demux = Demux::from_file(&path).unwrap();
    let info = demux.track_info(0).unwrap();
    assert_eq!(info.track_type, TrackType::Audio);
    assert_eq!(info.audio_channel_count, 2);
    assert_eq!(info.audio_sample_size, 16);
    assert!((info.audio_sample_rate - 48000.0).abs() < 0.01);
    assert_eq!(demux.audio_specific_config(info.id).unwrap(), &asc[..]);
}

#[test]
fn metadata_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.mp4");

    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &[0u8; 8],
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.add_file_metadata("com.apple.quicktime.artist", "ACME")
        .unwrap();
    mux.close().unwrap();

    let demux = Demux::from_file(&path).unwrap();
    let metadata = demux.metadata_strings();
    assert!(metadata
        .iter()
        .any(|(k, v)| k == "com.apple.quicktime.artist" && v == "ACME"));
    assert!(metadata
        .iter()
        .any(|(k, v)| k == hako_mp4::UDTA_KEY_FRIENDLY_NAME && v == "ACME"));
}

#[test]
fn mirrored_key_never_overrides_caller_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta2.mp4");

    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &[0u8; 8],
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    // The explicit UDTA value wins over the later mirror write
    mux.add_file_metadata(hako_mp4::UDTA_KEY_TITLE, "udta title")
        .unwrap();
    mux.add_file_metadata(hako_mp4::META_KEY_TITLE, "meta title")
        .unwrap();
    mux.close().unwrap();

    let demux = Demux::from_file(&path).unwrap();
    let metadata = demux.metadata_strings();
    assert!(metadata
        .iter()
        .any(|(k, v)| k == hako_mp4::UDTA_KEY_TITLE && v == "udta title"));
    assert!(metadata
        .iter()
        .any(|(k, v)| k == hako_mp4::META_KEY_TITLE && v == "meta title"));
}

#[test]
fn cover_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cover.mp4");

    let cover = sample_payload(1024, 0x42);
    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &[0u8; 8],
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.set_file_cover(CoverType::Jpeg, &cover).unwrap();
    mux.close().unwrap();

    let mut demux = Demux::from_file(&path).unwrap();
    let (size, cover_type) = demux.metadata_cover(None).unwrap().expect("cover present");
    assert_eq!(size, 1024);
    assert_eq!(cover_type, CoverType::Jpeg);

    let (bytes, _) = demux.metadata_cover_bytes().unwrap().unwrap();
    assert_eq!(bytes, cover);

    // Undersized buffer fails without touching the file
    let mut small = vec![0u8; 16];
    assert!(demux.metadata_cover(Some(&mut small)).is_err());
}

#[test]
fn track_cover_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track_cover.mp4");

    let cover = sample_payload(600, 0x11);
    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &[0u8; 8],
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.set_track_cover(video, CoverType::Png, &cover).unwrap();
    mux.close().unwrap();

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    let (size, cover_type) = demux
        .track_metadata_cover(id, None)
        .unwrap()
        .expect("track cover present");
    assert_eq!(size, 600);
    assert_eq!(cover_type, CoverType::Png);

    let (bytes, _) = demux.track_metadata_cover_bytes(id).unwrap().unwrap();
    assert_eq!(bytes, cover);

    // The track cover does not leak into the file-level cover
    assert!(demux.metadata_cover(None).unwrap().is_none());

    let mut small = vec![0u8; 16];
    assert!(demux.track_metadata_cover(id, Some(&mut small)).is_err());
}

#[test]
fn tracks_are_sorted_video_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sorted.mp4");

    let mut mux = open_mux(&path, 30000);
    let audio = mux
        .add_track(&MuxTrackParams {
            track_type: TrackType::Audio,
            name: None,
            enabled: true,
            in_movie: true,
            in_preview: true,
            timescale: 48000,
            creation_time: 0,
            modification_time: 0,
        })
        .unwrap();
    mux.set_audio_specific_config(audio, &[0x11, 0x90], 2, 16, 48000.0)
        .unwrap();
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();

    for i in 0..3u64 {
        mux.add_sample(
            audio,
            &MuxSample {
                buffer: &sample_payload(64, i as u8),
                sync: true,
                dts: i * 1024,
            },
        )
        .unwrap();
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &sample_payload(128, 0x80 + i as u8),
                sync: i == 0,
                dts: i * 1000,
            },
        )
        .unwrap();
    }
    mux.close().unwrap();

    let demux = Demux::from_file(&path).unwrap();
    assert_eq!(demux.track_count(), 2);
    let first = demux.track_info(0).unwrap();
    let second = demux.track_info(1).unwrap();
    assert_eq!(first.track_type, TrackType::Video);
    assert_eq!(first.id, 1);
    assert_eq!(second.track_type, TrackType::Audio);
    assert_eq!(second.id, 2);
}

#[test]
fn interleaved_samples_come_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("interleave.mp4");

    let mut mux = open_mux(&path, 1000);
    let video = mux.add_track(&video_params(1000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    let audio = mux
        .add_track(&MuxTrackParams {
            track_type: TrackType::Audio,
            name: None,
            enabled: true,
            in_movie: true,
            in_preview: true,
            timescale: 1000,
            creation_time: 0,
            modification_time: 0,
        })
        .unwrap();
    mux.set_audio_specific_config(audio, &[0x11, 0x90], 2, 16, 48000.0)
        .unwrap();

    let mut video_payloads = Vec::new();
    let mut audio_payloads = Vec::new();
    for i in 0..8u64 {
        // Arbitrary cross-track interleaving: audio first on odd steps
        let v = sample_payload(100 + i as usize, i as u8);
        let a = sample_payload(40 + i as usize, 0x40 + i as u8);
        if i % 2 == 1 {
            mux.add_sample(audio, &MuxSample { buffer: &a, sync: true, dts: i * 10 }).unwrap();
            mux.add_sample(video, &MuxSample { buffer: &v, sync: i == 1, dts: i * 33 }).unwrap();
        } else {
            mux.add_sample(video, &MuxSample { buffer: &v, sync: i == 0, dts: i * 33 }).unwrap();
            mux.add_sample(audio, &MuxSample { buffer: &a, sync: true, dts: i * 10 }).unwrap();
        }
        video_payloads.push(v);
        audio_payloads.push(a);
    }
    mux.close().unwrap();

    let mut demux = Demux::from_file(&path).unwrap();
    for (payloads, track_idx) in [(&video_payloads, 0), (&audio_payloads, 1)] {
        let id = demux.track_info(track_idx).unwrap().id;
        for expected in payloads.iter() {
            let mut buf = vec![0u8; 4096];
            let sample = demux
                .get_track_sample(id, true, Some(&mut buf), None)
                .unwrap();
            assert_eq!(sample.size as usize, expected.len());
            assert_eq!(&buf[..expected.len()], &expected[..]);
        }
    }
}

#[test]
fn buffer_exhausted_does_not_advance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small_buf.mp4");

    let mut mux = open_mux(&path, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    mux.add_sample(
        video,
        &MuxSample {
            buffer: &sample_payload(512, 7),
            sync: true,
            dts: 0,
        },
    )
    .unwrap();
    mux.close().unwrap();

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    let mut small = vec![0u8; 16];
    assert!(demux
        .get_track_sample(id, true, Some(&mut small), None)
        .is_err());

    // The cursor did not move: the sample is still deliverable
    let mut buf = vec![0u8; 512];
    let sample = demux
        .get_track_sample(id, true, Some(&mut buf), None)
        .unwrap();
    assert_eq!(sample.size, 512);
}

#[test]
fn remux_preserves_observable_state() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("original.mp4");
    let copy = dir.path().join("copy.mp4");

    let mut mux = open_mux(&original, 30000);
    let video = mux.add_track(&video_params(30000)).unwrap();
    mux.set_video_decoder_config(video, &avc_config()).unwrap();
    for i in 0..10u64 {
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &sample_payload(200 + i as usize, i as u8),
                sync: i % 5 == 0,
                dts: i * 1001,
            },
        )
        .unwrap();
    }
    mux.add_file_metadata("com.apple.quicktime.model", "hako-test")
        .unwrap();
    mux.close().unwrap();

    // Re-emit the parsed file through a fresh muxer
    let mut demux = Demux::from_file(&original).unwrap();
    let id = demux.track_ids()[0];
    let info = demux.track_info(0).unwrap();
    let config = demux.video_decoder_config(id).unwrap();

    let mut remux = open_mux(&copy, 30000);
    let track = remux
        .add_track(&MuxTrackParams {
            track_type: TrackType::Video,
            name: info.name.clone(),
            enabled: info.enabled,
            in_movie: info.in_movie,
            in_preview: info.in_preview,
            timescale: info.timescale,
            creation_time: info.creation_time,
            modification_time: info.modification_time,
        })
        .unwrap();
    remux.set_video_decoder_config(track, &config).unwrap();
    loop {
        let mut buf = vec![0u8; 4096];
        let sample = demux
            .get_track_sample(id, true, Some(&mut buf), None)
            .unwrap();
        if sample.size == 0 {
            break;
        }
        remux
            .add_sample(
                track,
                &MuxSample {
                    buffer: &buf[..sample.size as usize],
                    sync: sample.sync,
                    dts: sample.dts,
                },
            )
            .unwrap();
    }
    for (key, value) in demux.metadata_strings().to_vec() {
        remux.add_file_metadata(&key, &value).unwrap();
    }
    remux.close().unwrap();

    // Both files demux to the same observable state
    let mut a = Demux::from_file(&original).unwrap();
    let mut b = Demux::from_file(&copy).unwrap();
    assert_eq!(a.track_count(), b.track_count());
    let (id_a, id_b) = (a.track_ids()[0], b.track_ids()[0]);
    assert_eq!(
        a.track_sample_dts(id_a).unwrap(),
        b.track_sample_dts(id_b).unwrap()
    );
    assert_eq!(
        a.track_sample_sizes(id_a).unwrap(),
        b.track_sample_sizes(id_b).unwrap()
    );
    let mut metadata_a = a.metadata_strings().to_vec();
    let mut metadata_b = b.metadata_strings().to_vec();
    metadata_a.sort();
    metadata_b.sort();
    assert_eq!(metadata_a, metadata_b);
    loop {
        let mut buf_a = vec![0u8; 4096];
        let mut buf_b = vec![0u8; 4096];
        let sample_a = a.get_track_sample(id_a, true, Some(&mut buf_a), None).unwrap();
        let sample_b = b.get_track_sample(id_b, true, Some(&mut buf_b), None).unwrap();
        assert_eq!(sample_a.size, sample_b.size);
        assert_eq!(sample_a.dts, sample_b.dts);
        assert_eq!(sample_a.sync, sample_b.sync);
        assert_eq!(buf_a, buf_b);
        if sample_a.size == 0 {
            break;
        }
    }
}
