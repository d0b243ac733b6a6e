use hako_mp4::{
    CodecConfig, Demux, Mux, MuxConfig, MuxSample, MuxTrackParams, SeekMethod, TrackType,
    VideoDecoderConfig,
};
use std::path::{Path, PathBuf};

const SPS: [u8; 8] = [0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0xf0, 0x28];
const PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

/// Mux a one-video-track file whose timescale is 1 MHz so that microseconds
/// and decoding-time ticks coincide. `sync` lists 1-based sync samples.
fn build_track_file(path: &Path, dts: &[u64], sync: &[u32]) -> PathBuf {
    let mut mux = Mux::open(MuxConfig::new(path, 1_000_000)).unwrap();
    let video = mux
        .add_track(&MuxTrackParams {
            track_type: TrackType::Video,
            name: None,
            enabled: true,
            in_movie: true,
            in_preview: true,
            timescale: 1_000_000,
            creation_time: 0,
            modification_time: 0,
        })
        .unwrap();
    mux.set_video_decoder_config(
        video,
        &VideoDecoderConfig {
            width: 640,
            height: 480,
            codec: CodecConfig::Avc {
                sps: SPS.to_vec(),
                pps: PPS.to_vec(),
            },
        },
    )
    .unwrap();

    for (i, &ts) in dts.iter().enumerate() {
        mux.add_sample(
            video,
            &MuxSample {
                buffer: &[i as u8; 32],
                sync: sync.contains(&(i as u32 + 1)),
                dts: ts,
            },
        )
        .unwrap();
    }
    mux.close().unwrap();
    path.to_path_buf()
}

const DTS: [u64; 6] = [0, 33, 66, 99, 132, 165];

#[test]
fn seek_into_gap_lands_on_previous_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("gap.mp4"), &DTS, &[1, 4]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];
    demux.seek(100, SeekMethod::PreviousSync).unwrap();

    // Lands on sample 4 (dts=99), which is a sync: nothing is silent
    let sample = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(sample.dts, 99);
    assert!(sample.sync);
    assert!(!sample.silent);

    let next = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(next.dts, 132);
    assert!(!next.silent);
}

#[test]
fn nearest_sync_picks_the_closer_side() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("nearest.mp4"), &DTS, &[1, 4, 6]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    // |150-99| = 51 vs |165-150| = 15: the next sync (sample 6) wins
    demux.seek(150, SeekMethod::NearestSync).unwrap();
    let sample = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(sample.dts, 165);
    assert!(sample.sync);
    assert!(!sample.silent);
}

#[test]
fn previous_into_non_sync_requires_silent_decode() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("silent.mp4"), &DTS, &[1, 4, 6]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    // Sample 5 (dts=132) is not a sync: it must be decoded but not shown
    demux.seek(150, SeekMethod::Previous).unwrap();
    let sample = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(sample.dts, 132);
    assert!(!sample.sync);
    assert!(sample.silent);

    // The first sample at or after the requested time clears the marker
    let next = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(next.dts, 165);
    assert!(!next.silent);
}

#[test]
fn next_sync_skips_forward() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("next.mp4"), &DTS, &[1, 4, 6]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    // 140 lands between the sync at 99 and the one at 165
    demux.seek(140, SeekMethod::NextSync).unwrap();
    let sample = demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(sample.dts, 165);
    assert!(sample.sync);
}

#[test]
fn seek_past_end_clamps_to_last_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("clamp.mp4"), &DTS, &[1, 4]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    demux.seek(10_000_000, SeekMethod::Previous).unwrap();
    let sample = demux.get_track_sample(id, false, None, None).unwrap();
    assert_eq!(sample.dts, 165);
}

#[test]
fn sample_delivery_reports_sync_neighbors() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("neighbors.mp4"), &DTS, &[1, 4]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];
    demux.seek(66, SeekMethod::Previous).unwrap();

    let sample = demux.get_track_sample(id, false, None, None).unwrap();
    assert_eq!(sample.dts, 66);
    assert!(!sample.sync);
    assert_eq!(sample.prev_sync_dts, 0);
    assert_eq!(sample.next_sync_dts, 99);
    assert_eq!(sample.next_dts, 99);
}

#[test]
fn sample_time_queries() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("times.mp4"), &DTS, &[1, 4]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    assert_eq!(demux.track_next_sample_time(id).unwrap(), 0);
    assert!(demux.track_prev_sample_time(id).is_err());

    demux.get_track_sample(id, true, None, None).unwrap();
    demux.get_track_sample(id, true, None, None).unwrap();
    assert_eq!(demux.track_next_sample_time(id).unwrap(), 66);
    assert_eq!(demux.track_prev_sample_time(id).unwrap(), 0);

    // Directional queries, optionally sync-restricted
    assert_eq!(
        demux.track_prev_sample_time_before(id, 100, false).unwrap(),
        99
    );
    assert_eq!(
        demux.track_next_sample_time_after(id, 100, false).unwrap(),
        132
    );
    assert_eq!(
        demux.track_next_sample_time_after(id, 100, true).unwrap_err().to_string(),
        "no sample matching the requested time"
    );
    assert_eq!(
        demux.track_prev_sample_time_before(id, 100, true).unwrap(),
        99
    );
}

#[test]
fn step_to_next_and_previous_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_track_file(&dir.path().join("step.mp4"), &DTS, &[1, 4]);

    let mut demux = Demux::from_file(&path).unwrap();
    let id = demux.track_ids()[0];

    // Deliver samples 1 and 2, cursor now at index 2 (dts=66)
    demux.get_track_sample(id, true, None, None).unwrap();
    demux.get_track_sample(id, true, None, None).unwrap();

    demux.seek_to_track_next_sample(id).unwrap();
    assert_eq!(demux.track_next_sample_time(id).unwrap(), 99);

    demux.seek_to_track_prev_sample(id).unwrap();
    // Stepping back from a non-delivered position lands on the previous
    // sync at or before the prior sample
    let sample = demux.get_track_sample(id, false, None, None).unwrap();
    assert!(sample.sync);
}
