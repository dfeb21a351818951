//! vda-sim
//!
//! Runs a scripted stream through the OMX video decode accelerator against
//! the simulated hardware and the in-process resource broker, then prints a
//! summary of what the client saw.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vda_common::{
    AcceleratorConfig, BitstreamBuffer, DecoderConfig, PictureBuffer, PictureBufferId,
    Resolution, TextureId, VariantKind, VideoCodecProfile,
};
use vda_decoder::sim::{RecordingSurface, SimScript, SimulatedCore};
use vda_decoder::{DecoderState, DecoderStats, OmxVideoDecodeAccelerator, RecordCensus, VdaEvent};
use vda_resource::{ConflictType, FakeBroker, ResourceManager};

/// Bytes per simulated bitstream chunk.
const CHUNK_SIZE: usize = 16 * 1024;

/// vda-sim - Drive the video decode accelerator against simulated hardware
#[derive(Parser, Debug)]
#[command(name = "vda-sim")]
#[command(about = "Drive the OMX video decode accelerator against simulated hardware")]
#[command(version)]
struct Args {
    /// Number of bitstream chunks to decode
    #[arg(short, long, default_value = "30")]
    frames: u64,

    /// Hardware variant (generic, mfc)
    #[arg(long)]
    variant: Option<String>,

    /// Stream profile (h264, hevc, vp8, vp9, mpeg4)
    #[arg(long, default_value = "h264")]
    profile: String,

    /// Initial coded size, WIDTHxHEIGHT
    #[arg(long, default_value = "640x480")]
    size: String,

    /// Switch resolution at this frame index
    #[arg(long)]
    resize_at: Option<u64>,

    /// Resolution to switch to, WIDTHxHEIGHT
    #[arg(long, default_value = "1280x720")]
    resize_to: String,

    /// Every n-th frame is decoded but not shown
    #[arg(long)]
    hide_every: Option<u64>,

    /// Inject a hardware fault instead of decoding this frame
    #[arg(long)]
    fault_after: Option<u64>,

    /// Reclaim the decoder after this many pictures
    #[arg(long)]
    preempt_after: Option<u64>,

    /// Accelerator configuration (JSON); flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Teardown acknowledgment timeout in milliseconds
    #[arg(long)]
    teardown_timeout_ms: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// What the client saw.
#[derive(Debug, Default, Serialize)]
struct Summary {
    variant: String,
    chunks_submitted: u64,
    bitstreams_returned: u64,
    pictures: u64,
    picture_requests: Vec<Resolution>,
    dismissed: u64,
    flush_done: bool,
    errors: Vec<String>,
    preempted: bool,
    final_state: Option<DecoderState>,
    census: RecordCensus,
    stats: DecoderStats,
    elapsed_ms: u64,
}

fn parse_size(raw: &str) -> anyhow::Result<Resolution> {
    let (w, h) = raw
        .split_once('x')
        .with_context(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
    let size = Resolution::new(
        w.trim().parse().with_context(|| format!("bad width in {raw:?}"))?,
        h.trim().parse().with_context(|| format!("bad height in {raw:?}"))?,
    );
    if size.is_empty() {
        bail!("empty size {raw:?}");
    }
    Ok(size)
}

fn parse_profile(raw: &str) -> anyhow::Result<VideoCodecProfile> {
    Ok(match raw.to_lowercase().as_str() {
        "h264" | "avc" => VideoCodecProfile::H264Main,
        "hevc" | "h265" => VideoCodecProfile::HevcMain,
        "hevc10" => VideoCodecProfile::HevcMain10,
        "vp8" => VideoCodecProfile::Vp8,
        "vp9" => VideoCodecProfile::Vp9Profile0,
        "mpeg4" => VideoCodecProfile::Mpeg4Simple,
        other => bail!("unknown profile {other:?}"),
    })
}

fn parse_variant(raw: &str) -> anyhow::Result<VariantKind> {
    Ok(match raw.to_lowercase().as_str() {
        "generic" => VariantKind::Generic,
        "mfc" => VariantKind::Mfc,
        other => bail!("unknown variant {other:?}"),
    })
}

fn load_config(args: &Args) -> anyhow::Result<AcceleratorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => AcceleratorConfig::default(),
    };
    if let Some(variant) = &args.variant {
        config.variant = parse_variant(variant)?;
    }
    if let Some(ms) = args.teardown_timeout_ms {
        config.teardown_timeout_ms = ms;
    }
    Ok(config)
}

fn script(args: &Args, initial: Resolution) -> anyhow::Result<SimScript> {
    let mut script = SimScript::new(initial);
    if let Some(at) = args.resize_at {
        script = script.resize_at(at, parse_size(&args.resize_to)?);
    }
    if let Some(n) = args.hide_every {
        script = script.hide_every(n);
    }
    if let Some(n) = args.fault_after {
        script = script.fault_after(n);
    }
    Ok(script)
}

fn run(args: &Args) -> anyhow::Result<Summary> {
    let config = load_config(args)?;
    let coded_size = parse_size(&args.size)?;
    let profile = parse_profile(&args.profile)?;

    let broker = Arc::new(FakeBroker::new());
    let manager = ResourceManager::new(broker.clone());
    let core = Arc::new(SimulatedCore::new(script(args, coded_size)?));
    let surface = Arc::new(RecordingSurface::new());

    let mut vda = OmxVideoDecodeAccelerator::new(core, manager, surface, config);
    let mut summary = Summary {
        variant: vda.variant().name().to_string(),
        ..Summary::default()
    };

    let started = Instant::now();
    let events = vda
        .initialize(&DecoderConfig::new(profile, coded_size))
        .context("initializing accelerator")?;

    for i in 0..args.frames {
        let id = i32::try_from(i + 1).context("too many frames")?;
        let timestamp = i as i64 * 33_333;
        vda.decode(BitstreamBuffer::from_bytes(id, timestamp, vec![0; CHUNK_SIZE]));
        summary.chunks_submitted += 1;
    }
    vda.flush();

    let mut next_picture = 0;
    let mut conflict: Option<JoinHandle<()>> = None;
    loop {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .context("no event from the accelerator")?;
        match event {
            VdaEvent::ProvidePictureBuffers { count, size, .. } => {
                info!(count, %size, "Providing picture buffers");
                summary.picture_requests.push(size);
                let buffers = (0..count)
                    .map(|_| {
                        next_picture += 1;
                        PictureBuffer {
                            id: PictureBufferId(next_picture),
                            texture: TextureId(next_picture as u32),
                            size,
                        }
                    })
                    .collect();
                vda.assign_picture_buffers(buffers);
            }
            VdaEvent::PictureReady(picture) => {
                summary.pictures += 1;
                vda.reuse_picture_buffer(picture.picture_buffer_id, None);
                if args.preempt_after == Some(summary.pictures) && conflict.is_none() {
                    warn!(after = summary.pictures, "Reclaiming the decoder");
                    let ids = broker.granted_ids();
                    conflict = Some(
                        broker
                            .trigger_conflict(ConflictType::Conflict, ids)
                            .context("starting preemption")?,
                    );
                    summary.preempted = true;
                }
            }
            VdaEvent::DismissPictureBuffer(_) => summary.dismissed += 1,
            VdaEvent::NotifyEndOfBitstreamBuffer(_) => summary.bitstreams_returned += 1,
            VdaEvent::NotifyFlushDone => {
                summary.flush_done = true;
                break;
            }
            VdaEvent::NotifyResetDone => {}
            VdaEvent::NotifyError(kind) => {
                error!(?kind, "Accelerator reported an error");
                summary.errors.push(format!("{kind:?}"));
                // Nothing follows an error.
                break;
            }
        }
    }

    if let Some(handle) = conflict {
        if handle.join().is_err() {
            bail!("preemption thread panicked");
        }
    }

    summary.final_state = Some(vda.state());
    summary.census = vda.record_census();
    summary.stats = vda.stats();
    vda.destroy();
    if broker.granted_count() != 0 {
        bail!("{} hardware units still granted after destroy", broker.granted_count());
    }
    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(summary)
}

fn print_summary(summary: &Summary) {
    println!();
    println!("vda-sim ({} variant)", summary.variant);
    println!("  chunks submitted:   {}", summary.chunks_submitted);
    println!("  bitstreams returned:{:>4}", summary.bitstreams_returned);
    println!("  pictures delivered: {}", summary.pictures);
    println!("  picture requests:   {:?}", summary.picture_requests);
    println!("  dismissed:          {}", summary.dismissed);
    println!("  flush done:         {}", summary.flush_done);
    println!("  preempted:          {}", summary.preempted);
    println!("  errors:             {:?}", summary.errors);
    if let Some(state) = summary.final_state {
        println!("  final state:        {state}");
    }
    println!("  elapsed:            {} ms", summary.elapsed_ms);
    println!();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let summary = run(&args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse() {
        assert_eq!(parse_size("1280x720").unwrap(), Resolution::HD);
        assert_eq!(parse_size(" 640 x 480 ").unwrap(), Resolution::VGA);
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
    }

    #[test]
    fn names_parse() {
        assert_eq!(parse_profile("AVC").unwrap(), VideoCodecProfile::H264Main);
        assert!(parse_profile("av1").is_err());
        assert_eq!(parse_variant("generic").unwrap(), VariantKind::Generic);
        assert!(parse_variant("vaapi").is_err());
    }

    #[test]
    fn flags_override_the_config_file() {
        let args = Args::parse_from(["vda-sim", "--variant", "generic", "--teardown-timeout-ms", "10"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.variant, VariantKind::Generic);
        assert_eq!(config.teardown_timeout_ms, 10);
        assert_eq!(config.fence_timeout_ms, AcceleratorConfig::default().fence_timeout_ms);
    }

    #[test]
    fn short_run_with_resize_and_preemption() {
        let args = Args::parse_from([
            "vda-sim",
            "--frames",
            "12",
            "--resize-at",
            "4",
            "--resize-to",
            "1280x720",
            "--preempt-after",
            "8",
        ]);
        let summary = run(&args).unwrap();
        assert!(summary.preempted);
        assert_eq!(summary.errors, vec!["PlatformFailure".to_string()]);
        assert_eq!(summary.picture_requests, vec![Resolution::VGA, Resolution::HD]);
        assert!(summary.pictures >= 8);
        assert_eq!(summary.final_state, Some(DecoderState::Error));
    }

    #[test]
    fn clean_run_flushes() {
        let args = Args::parse_from(["vda-sim", "--frames", "6", "--variant", "generic"]);
        let summary = run(&args).unwrap();
        assert!(summary.flush_done);
        assert_eq!(summary.pictures, 6);
        assert_eq!(summary.bitstreams_returned, 6);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.variant, "generic");
    }
}
