//! pothole_scan - run pothole depth estimation over an image or video
//!
//! This tool:
//! 1. Loads configuration (POTHOLE_CONFIG + environment + flags)
//! 2. Selects a detector backend
//! 3. Writes a numbered CSV of measurements, annotated key frames and,
//!    for video input, an annotated video at half the source frame rate
//! 4. Prints per-category statistics

use anyhow::{anyhow, Result};
use clap::Parser;
use std::cell::Cell;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use pothole_depth::detect::BackendRegistry;
use pothole_depth::measurements::MeasurementWriter;
use pothole_depth::output::RunOutputs;
use pothole_depth::pipeline::RunSink;
use pothole_depth::{FileConfig, FileSource, Jitter, MediaKind, Pipeline, PotholeConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input image, video, or stub://name for a synthetic stream.
    #[arg(long)]
    input: Option<String>,
    /// Output directory (defaults to the configured output_dir).
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Detector backend name (stub, tract).
    #[arg(long)]
    backend: Option<String>,
    /// ONNX model path for the tract backend.
    #[arg(long, env = "POTHOLE_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Process every Nth frame.
    #[arg(long)]
    frame_skip: Option<u32>,
    /// Enable reproducible depth jitter with this seed.
    #[arg(long)]
    jitter_seed: Option<u64>,
    /// Skip writing annotated frames.
    #[arg(long)]
    no_frames: bool,
    /// Skip writing the annotated video.
    #[arg(long)]
    no_video: bool,
    /// UI mode: auto, plain, pretty.
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("load configuration");
        let mut cfg = PotholeConfig::load()?;
        if let Some(input) = args.input.clone() {
            cfg.input = Some(input);
        }
        if let Some(dir) = args.output_dir.clone() {
            cfg.output_dir = dir;
        }
        if let Some(model) = args.model.clone() {
            cfg.model_path = Some(model);
        }
        if let Some(skip) = args.frame_skip {
            cfg.frame_skip = skip;
        }
        if let Some(seed) = args.jitter_seed {
            cfg.jitter = Jitter::Seeded(seed);
        }
        if args.no_frames {
            cfg.save_frames = false;
        }
        cfg.validate()?;
        cfg
    };
    let input = cfg
        .input
        .take()
        .ok_or_else(|| anyhow!("no input given (use --input or POTHOLE_INPUT)"))?;

    let backend = {
        let _stage = ui.stage("load detector");
        let mut registry = BackendRegistry::from_config(&cfg)?;
        if let Some(name) = &args.backend {
            registry.set_default(name)?;
        }
        registry
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend available"))?
    };

    let mut source = FileSource::new(FileConfig::for_path(&input))?;
    source.connect()?;
    let outputs = RunOutputs::allocate(&cfg.output_dir, "pothole")?;
    log::info!(
        "run {}: {} -> {}",
        outputs.run,
        input,
        outputs.measurements.display()
    );

    let progress = ui.frames(source.total_frames());
    let detections = Rc::new(Cell::new(0u64));
    let mut pipeline = {
        let progress = progress.clone();
        let detections = Rc::clone(&detections);
        Pipeline::new(&cfg, Box::new(backend))?.with_observer(move |report| {
            detections.set(detections.get() + report.records.len() as u64);
            progress.set_position(report.frame_index);
            progress.set_message(detections.get().to_string());
        })
    };
    pipeline.warm_up()?;

    let stop = pipeline.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut sink = RunSink::new(MeasurementWriter::create(&outputs.measurements)?);
    if cfg.save_frames {
        sink = sink.with_frames_dir(outputs.frames_dir.clone());
    }
    let want_video = !args.no_video && source.kind() != MediaKind::Image;
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        if want_video {
            let fps = pothole_depth::output::annotated_fps(source.fps());
            sink = sink.with_video(pothole_depth::video::AnnotatedVideo::new(
                outputs.video.clone(),
                fps,
            ));
        }
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        if want_video {
            log::warn!(
                "annotated video needs the ingest-file-ffmpeg feature; writing CSV and frames only"
            );
        }
    }
    let summary = {
        let _stage = ui.stage("process frames");
        let summary = pipeline.run(&mut source, &mut sink)?;
        progress.finish_and_clear();
        summary
    };
    sink.finish()?;

    summary.session.log();
    println!("scan summary:");
    println!("  input: {}", input);
    println!("  frames read: {}", summary.frames_read);
    println!("  frames processed: {}", summary.frames_processed);
    println!("  detections: {}", summary.session.total_detections);
    println!("  measurements: {}", outputs.measurements.display());
    if summary.video_frames > 0 {
        println!(
            "  annotated video: {} ({} frames)",
            outputs.video.display(),
            summary.video_frames
        );
    }
    if summary.frames_saved > 0 {
        println!(
            "  annotated frames: {} in {}",
            summary.frames_saved,
            outputs.frames_dir.display()
        );
    }
    if summary.stopped_early {
        println!("  stopped early (Ctrl-C)");
    }
    Ok(())
}
