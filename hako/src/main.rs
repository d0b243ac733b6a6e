use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hako_mp4::{sample_time_to_usec, Demux, TrackType};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hako")]
#[command(about = "Inspect and recover MP4 files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print media and per-track information
    Info {
        /// Input MP4 file
        input: PathBuf,
    },
    /// List every sample of every track
    Frames {
        /// Input MP4 file
        input: PathBuf,
        /// Restrict the listing to one track ID
        #[arg(short, long)]
        track: Option<u32>,
    },
    /// Extract the cover image
    Cover {
        /// Input MP4 file
        input: PathBuf,
        /// Output file for the cover bytes
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Rebuild an interrupted recording from its recovery link file
    Recover {
        /// Link file written by the muxer
        link_file: PathBuf,
        /// Delete the recovery side files after a successful recovery
        #[arg(long)]
        finalize: bool,
    },
}

fn info(input: &PathBuf) -> anyhow::Result<()> {
    let demux = Demux::from_file(input)
        .with_context(|| format!("failed to open '{}'", input.display()))?;

    let media = demux.media_info();
    println!("file: {}", input.display());
    println!(
        "duration: {}.{:06}s, {} tracks",
        media.duration / 1_000_000,
        media.duration % 1_000_000,
        media.track_count
    );

    for idx in 0..demux.track_count() {
        let track = demux.track_info(idx)?;
        println!(
            "track {} ({}): timescale={} duration={} samples={}{}",
            track.id,
            track.track_type,
            track.timescale,
            track.duration,
            track.sample_count,
            if track.enabled { "" } else { " [disabled]" },
        );
        if let Some(name) = &track.name {
            println!("  name: {}", name);
        }
        match track.track_type {
            TrackType::Video => {
                let config = demux.video_decoder_config(track.id)?;
                println!(
                    "  video: {} {}x{}",
                    config.codec.name(),
                    config.width,
                    config.height
                );
            }
            TrackType::Audio => {
                println!(
                    "  audio: {} ch, {} bits, {:.2} Hz",
                    track.audio_channel_count,
                    track.audio_sample_size,
                    track.audio_sample_rate
                );
            }
            TrackType::Metadata => {
                println!(
                    "  metadata: encoding={} mime={}",
                    track.content_encoding.as_deref().unwrap_or("-"),
                    track.mime_format.as_deref().unwrap_or("-")
                );
            }
            _ => {}
        }
        for (key, value) in demux.track_metadata_strings(track.id)? {
            println!("  meta: {} = {}", key, value);
        }
    }

    for (key, value) in demux.metadata_strings() {
        println!("meta: {} = {}", key, value);
    }
    for chapter in demux.chapters() {
        println!(
            "chapter: {}.{:06}s '{}'",
            chapter.time / 1_000_000,
            chapter.time % 1_000_000,
            chapter.name
        );
    }
    Ok(())
}

fn frames(input: &PathBuf, only_track: Option<u32>) -> anyhow::Result<()> {
    let demux = Demux::from_file(input)
        .with_context(|| format!("failed to open '{}'", input.display()))?;

    for idx in 0..demux.track_count() {
        let track = demux.track_info(idx)?;
        if only_track.is_some_and(|id| id != track.id) {
            continue;
        }
        println!("track {} ({})", track.id, track.track_type);

        let sizes = demux.track_sample_sizes(track.id)?;
        let offsets = demux.track_sample_offsets(track.id)?;
        let dts = demux.track_sample_dts(track.id)?;
        for i in 0..sizes.len() {
            println!(
                "  #{:<6} dts={:<12} size={:<10} offset={}",
                i,
                sample_time_to_usec(dts[i], track.timescale),
                sizes[i],
                offsets[i],
            );
        }
    }
    Ok(())
}

fn cover(input: &PathBuf, output: &PathBuf) -> anyhow::Result<()> {
    let mut demux = Demux::from_file(input)
        .with_context(|| format!("failed to open '{}'", input.display()))?;

    let Some((bytes, cover_type)) = demux.metadata_cover_bytes()? else {
        bail!("'{}' has no cover", input.display());
    };
    let mut file = File::create(output)
        .with_context(|| format!("failed to create '{}'", output.display()))?;
    file.write_all(&bytes)?;
    println!(
        "wrote {} cover ({} bytes) to {}",
        cover_type.as_str(),
        bytes.len(),
        output.display()
    );
    Ok(())
}

fn recover(link_file: &PathBuf, finalize: bool) -> anyhow::Result<()> {
    let recovered = hako_mp4::recovery::recover_file(link_file)
        .with_context(|| format!("recovery from '{}' failed", link_file.display()))?;
    println!("recovered {}", recovered.display());
    if finalize {
        hako_mp4::recovery::finalize(link_file, false)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Info { input } => info(input),
        Command::Frames { input, track } => frames(input, *track),
        Command::Cover { input, output } => cover(input, output),
        Command::Recover {
            link_file,
            finalize,
        } => recover(link_file, *finalize),
    }
}
