//! `ms-record` — drive the capture muxer from the command line.
//!
//! `synth` records a synthetic H.264/AAC capture (one producer thread per
//! stream) and prints the close report as JSON. `defaults` prints the
//! resolved configuration for a given options file.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ms_common::PacketFlags;
use ms_recorder::{Muxer, MuxerOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ms-record")]
#[command(version, about = "Capture muxer command-line front end", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record synthetic audio/video packets into an MP4 file
    Synth {
        /// Muxer options file (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output file (overrides the options file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Packets per stream
        #[arg(short = 'n', long, default_value_t = 250)]
        packets: u32,

        /// Timestamp step between packets, in milliseconds
        #[arg(long, default_value_t = 40)]
        interval_ms: u32,

        /// Size of each synthetic payload
        #[arg(long, default_value_t = 512)]
        payload_bytes: usize,

        /// Number of pooled packet buffers
        #[arg(long)]
        pool_size: Option<usize>,

        /// Sleep `interval_ms` between packets, like a live source
        #[arg(long)]
        realtime: bool,

        /// Record only the audio stream
        #[arg(long, conflicts_with = "video_only")]
        audio_only: bool,

        /// Record only the video stream
        #[arg(long)]
        video_only: bool,
    },

    /// Print the resolved muxer configuration
    Defaults {
        /// Muxer options file (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ms_recorder=info,ms_mux=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Synth {
            config,
            output,
            packets,
            interval_ms,
            payload_bytes,
            pool_size,
            realtime,
            audio_only,
            video_only,
        } => {
            let mut options = load_options(config.as_deref())?;
            if output.is_some() {
                options.output = output;
            }
            if pool_size.is_some() {
                options.pool_size = pool_size;
            }
            if audio_only {
                options.enable_video = Some(false);
            }
            if video_only {
                options.enable_audio = Some(false);
            }
            let run = SynthRun {
                packets,
                interval_ms,
                payload_bytes: payload_bytes.max(1),
                realtime,
            };
            synth(&options, &run)
        }
        Commands::Defaults { config } => {
            let options = load_options(config.as_deref())?;
            let resolved = options.resolve().context("Invalid muxer options")?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(())
        }
    }
}

fn load_options(path: Option<&Path>) -> Result<MuxerOptions> {
    let Some(path) = path else {
        return Ok(MuxerOptions::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse options file {}", path.display()))
}

struct SynthRun {
    packets: u32,
    interval_ms: u32,
    payload_bytes: usize,
    realtime: bool,
}

fn synth(options: &MuxerOptions, run: &SynthRun) -> Result<()> {
    let muxer = Muxer::init(options).context("Failed to start muxer")?;
    let gop = muxer
        .config()
        .video_frame_rate
        .num
        .checked_div(muxer.config().video_frame_rate.den)
        .unwrap_or(1)
        .max(1);
    tracing::info!(
        output = %muxer.config().output.display(),
        packets = run.packets,
        audio = muxer.has_audio(),
        video = muxer.has_video(),
        "Recording synthetic capture"
    );

    let submitted: Result<()> = thread::scope(|s| {
        let audio = muxer.has_audio().then(|| {
            s.spawn(|| -> Result<()> {
                let payload = synthetic_aac(run.payload_bytes / 4);
                for i in 0..run.packets {
                    let pts = i64::from(i) * i64::from(run.interval_ms);
                    muxer
                        .submit_audio(PacketFlags::NONE, &payload, pts)
                        .with_context(|| format!("Audio packet {i} rejected"))?;
                    pace(run);
                }
                Ok(())
            })
        });
        let video = muxer.has_video().then(|| {
            s.spawn(|| -> Result<()> {
                let keyframe = synthetic_h264(true, run.payload_bytes);
                let delta = synthetic_h264(false, run.payload_bytes / 4);
                for i in 0..run.packets {
                    let pts = i64::from(i) * i64::from(run.interval_ms);
                    let (flags, payload) = if i % gop == 0 {
                        (PacketFlags::KEYFRAME, &keyframe)
                    } else {
                        (PacketFlags::NONE, &delta)
                    };
                    muxer
                        .submit_video(flags, payload, pts)
                        .with_context(|| format!("Video packet {i} rejected"))?;
                    pace(run);
                }
                Ok(())
            })
        });

        for producer in [audio, video].into_iter().flatten() {
            producer
                .join()
                .map_err(|_| anyhow::anyhow!("Producer thread panicked"))??;
        }
        Ok(())
    });

    // Close even when a producer failed so the file is finalized.
    let report = muxer.close().context("Failed to close muxer")?;
    submitted?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn pace(run: &SynthRun) {
    if run.realtime {
        thread::sleep(Duration::from_millis(u64::from(run.interval_ms)));
    }
}

/// Baseline profile SPS/PPS, used on every keyframe.
const SPS: [u8; 12] = [
    0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x02, 0x80, 0xF6, 0xC0, 0x44, 0x00, 0x01,
];
const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];

/// Annex-B access unit: SPS + PPS + IDR slice for keyframes, one non-IDR
/// slice otherwise. Slice bodies are filler.
fn synthetic_h264(keyframe: bool, body_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(body_len + 32);
    if keyframe {
        for nal in [&SPS[..], &PPS[..]] {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    } else {
        out.extend_from_slice(&[0, 0, 0, 1, 0x41]);
    }
    // 0x00 runs would read as start codes.
    out.extend(std::iter::repeat(0xA5).take(body_len.max(1)));
    out
}

/// Raw AAC frame-shaped filler.
fn synthetic_aac(len: usize) -> Vec<u8> {
    let mut out = vec![0x21, 0x10];
    out.extend(std::iter::repeat(0x5A).take(len.max(2)));
    out
}
