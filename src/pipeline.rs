//! Frame processing: detect, filter, build records, count, annotate.
//!
//! A `Pipeline` owns one `SessionStats`; create a new pipeline for every
//! independent run (the web front end builds one per upload).

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::annotate;
use crate::config::PotholeConfig;
use crate::depth::DepthEstimator;
use crate::detect::{DetectorBackend, MultiScaleDetector};
use crate::filter::DetectionFilter;
use crate::frame::Frame;
use crate::ingest::FileSource;
use crate::measurements::MeasurementWriter;
use crate::record::{DetectionRecord, RecordBuilder, SessionStats, SessionSummary};
use crate::severity::CategoryTable;
#[cfg(feature = "ingest-file-ffmpeg")]
use crate::video::AnnotatedVideo;

const PROGRESS_EVERY: u64 = 30;

/// Outcome of one processed frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp_secs: f64,
    /// Detections reported by the backend before filtering.
    pub raw_detections: usize,
    pub records: Vec<DetectionRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_saved: u64,
    /// Frames written to the annotated video, if one was requested.
    pub video_frames: u64,
    pub measurement_rows: u64,
    pub stopped_early: bool,
    pub session: SessionSummary,
}

/// Where a run writes its outputs.
pub struct RunSink<W: Write> {
    measurements: MeasurementWriter<W>,
    frames_dir: Option<PathBuf>,
    saved_frames: Vec<String>,
    #[cfg(feature = "ingest-file-ffmpeg")]
    video: Option<AnnotatedVideo>,
    video_frames: u64,
}

impl<W: Write> RunSink<W> {
    pub fn new(measurements: MeasurementWriter<W>) -> Self {
        Self {
            measurements,
            frames_dir: None,
            saved_frames: Vec::new(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            video: None,
            video_frames: 0,
        }
    }

    /// Also save annotated frames that contain detections as PNG files.
    pub fn with_frames_dir(mut self, dir: PathBuf) -> Self {
        self.frames_dir = Some(dir);
        self
    }

    /// Also encode every processed frame into an annotated video.
    #[cfg(feature = "ingest-file-ffmpeg")]
    pub fn with_video(mut self, video: AnnotatedVideo) -> Self {
        self.video = Some(video);
        self
    }

    /// File names of the key frames saved so far, inside the frames dir.
    pub fn saved_frames(&self) -> &[String] {
        &self.saved_frames
    }

    pub fn finish(self) -> Result<W> {
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            if let Some(video) = self.video {
                video.finish()?;
            }
        }
        self.measurements.finish()
    }

    fn write_video(&mut self, frame: &Frame) -> Result<()> {
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            if let Some(video) = self.video.as_mut() {
                video
                    .write(frame)
                    .with_context(|| format!("failed to encode frame {}", frame.index))?;
                self.video_frames += 1;
            }
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        let _ = frame;
        Ok(())
    }

    fn save_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(dir) = &self.frames_dir else {
            return Ok(());
        };
        #[cfg(feature = "ingest-image")]
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let name = crate::output::frame_file_name(frame.index, "png");
            crate::ingest::image::save_frame(frame, &dir.join(&name))?;
            self.saved_frames.push(name);
        }
        #[cfg(not(feature = "ingest-image"))]
        {
            log::warn!(
                "not saving frame {} to {}: built without ingest-image",
                frame.index,
                dir.display()
            );
        }
        Ok(())
    }
}

pub struct Pipeline {
    detector: Box<dyn DetectorBackend>,
    filter: DetectionFilter,
    records: RecordBuilder,
    stats: SessionStats,
    frame_skip: u64,
    overlay_info: bool,
    total_frames: Option<u64>,
    stop: Arc<AtomicBool>,
    observer: Option<Box<dyn FnMut(&FrameReport)>>,
}

impl Pipeline {
    pub fn new(config: &PotholeConfig, backend: Box<dyn DetectorBackend>) -> Result<Self> {
        config.validate()?;
        let detector: Box<dyn DetectorBackend> = if config.detector.multi_scale {
            Box::new(MultiScaleDetector::new(
                backend,
                config.detector.scales.clone(),
                config.detector.nms_threshold,
            )?)
        } else {
            backend
        };
        let estimator = DepthEstimator::new(config.depth, config.jitter);
        log::info!(
            "pipeline: backend={} profile={:?} method={:?} jitter={}",
            detector.name(),
            config.profile,
            config.depth.method,
            estimator.jitter_enabled()
        );
        Ok(Self {
            detector,
            filter: config.filter,
            stats: SessionStats::new(&config.categories),
            records: RecordBuilder::new(estimator, config.categories.clone()),
            frame_skip: u64::from(config.frame_skip.max(1)),
            overlay_info: true,
            total_frames: None,
            stop: Arc::new(AtomicBool::new(false)),
            observer: None,
        })
    }

    /// Toggle the frame counters and category legend drawn on each frame.
    pub fn with_overlay_info(mut self, enabled: bool) -> Self {
        self.overlay_info = enabled;
        self
    }

    /// Called by `run` after every processed frame.
    pub fn with_observer(mut self, observer: impl FnMut(&FrameReport) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Flag that ends `run` after the frame in progress.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn categories(&self) -> &CategoryTable {
        self.records.categories()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn summary(&self) -> SessionSummary {
        self.stats.summary(self.records.categories())
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.detector.warm_up()
    }

    /// Run one frame through the pipeline and draw its overlay in place.
    pub fn process_frame(&mut self, frame: &mut Frame) -> Result<FrameReport> {
        let raw = self
            .detector
            .detect(frame)
            .with_context(|| format!("detection failed on frame {}", frame.index))?;
        let raw_detections = raw.len();
        let kept = self.filter.apply(raw);

        let mut records = Vec::with_capacity(kept.len());
        for detection in kept {
            let record = self.records.build(detection, frame.width, frame.height)?;
            self.stats.accumulate(&record);
            annotate::draw_record(frame, &record);
            records.push(record);
        }
        for record in &records {
            annotate::draw_label(frame, record);
        }
        if self.overlay_info {
            let index = frame.index;
            annotate::draw_frame_info(
                frame,
                index,
                self.total_frames,
                records.len(),
                self.stats.total(),
            );
            annotate::draw_legend(frame, self.records.categories(), &self.stats);
        }

        Ok(FrameReport {
            frame_index: frame.index,
            timestamp_secs: frame.timestamp_secs,
            raw_detections,
            records,
        })
    }

    /// Process every `frame_skip`-th frame of `source` until it ends or the
    /// stop flag is raised.
    pub fn run<W: Write>(
        &mut self,
        source: &mut FileSource,
        sink: &mut RunSink<W>,
    ) -> Result<RunSummary> {
        let total = source.total_frames();
        self.total_frames = total;
        let mut frames_read = 0u64;
        let mut frames_processed = 0u64;
        let mut stopped_early = false;

        while let Some(mut frame) = source.next_frame()? {
            if self.stop.load(Ordering::SeqCst) {
                stopped_early = true;
                log::info!("stop requested; ending run before frame {}", frame.index);
                break;
            }
            frames_read += 1;
            if frame.index % self.frame_skip != 0 {
                continue;
            }

            let report = self.process_frame(&mut frame)?;
            frames_processed += 1;
            for record in &report.records {
                sink.measurements
                    .write_record(report.frame_index, report.timestamp_secs, record)?;
            }
            sink.write_video(&frame)?;
            if !report.records.is_empty() {
                sink.save_frame(&frame)?;
            }
            if let Some(observer) = self.observer.as_mut() {
                observer(&report);
            }

            if progress_due(frames_processed) {
                match total {
                    Some(total) if total > 0 => log::info!(
                        "Progress: {:.1}% ({}/{} frames) - Detections: {}",
                        frame.index as f64 / total as f64 * 100.0,
                        frame.index,
                        total,
                        self.stats.total()
                    ),
                    _ => log::info!(
                        "Progress: {} frames - Detections: {}",
                        frame.index,
                        self.stats.total()
                    ),
                }
            }
        }

        let summary = RunSummary {
            frames_read,
            frames_processed,
            frames_saved: sink.saved_frames.len() as u64,
            video_frames: sink.video_frames,
            measurement_rows: sink.measurements.rows(),
            stopped_early,
            session: self.summary(),
        };
        log::info!(
            "run finished: {} frames read, {} processed, {} detections",
            summary.frames_read,
            summary.frames_processed,
            summary.session.total_detections
        );
        Ok(summary)
    }
}

/// Progress is reported every `PROGRESS_EVERY` processed frames, however
/// many frames were skipped in between.
fn progress_due(frames_processed: u64) -> bool {
    frames_processed > 0 && frames_processed % PROGRESS_EVERY == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};
    use crate::ingest::FileConfig;

    fn fixed_backend() -> Box<dyn DetectorBackend> {
        Box::new(StubBackend::fixed(vec![
            Detection::new(BoundingBox::new(10, 10, 110, 60).unwrap(), 0.8).unwrap(),
            // rejected by the filter: too small
            Detection::new(BoundingBox::new(0, 0, 5, 5).unwrap(), 0.9).unwrap(),
        ]))
    }

    fn single_scale_config() -> PotholeConfig {
        let mut cfg = PotholeConfig::default();
        cfg.detector.multi_scale = false;
        cfg
    }

    #[test]
    fn process_frame_builds_and_counts_records() {
        let mut pipeline = Pipeline::new(&single_scale_config(), fixed_backend())
            .unwrap()
            .with_overlay_info(false);
        let mut frame = Frame::filled(320, 240, [100, 100, 100]).unwrap();
        let report = pipeline.process_frame(&mut frame).unwrap();
        assert_eq!(report.raw_detections, 2);
        assert_eq!(report.records.len(), 1);
        assert_eq!(pipeline.stats().total(), 1);
        let color = report.records[0].category.color;
        assert_eq!(frame.pixel(10, 10), Some(color));
    }

    #[test]
    fn run_honours_frame_skip() {
        let mut cfg = single_scale_config();
        cfg.frame_skip = 3;
        let mut pipeline = Pipeline::new(&cfg, fixed_backend()).unwrap();
        let mut source = FileSource::new(FileConfig {
            synthetic_frames: 10,
            width: 320,
            height: 240,
            ..FileConfig::for_path("stub://road")
        })
        .unwrap();
        let mut sink = RunSink::new(MeasurementWriter::new(Vec::new()).unwrap());

        let summary = pipeline.run(&mut source, &mut sink).unwrap();
        assert_eq!(summary.frames_read, 10);
        assert_eq!(summary.frames_processed, 3);
        assert_eq!(summary.measurement_rows, 3);
        assert_eq!(summary.session.total_detections, 3);
        assert!(!summary.stopped_early);

        let csv = String::from_utf8(sink.finish().unwrap()).unwrap();
        let frames: Vec<&str> = csv
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(frames, vec!["3", "6", "9"]);
    }

    #[test]
    fn raised_stop_flag_ends_run() {
        let mut pipeline = Pipeline::new(&single_scale_config(), fixed_backend()).unwrap();
        pipeline.stop_handle().store(true, Ordering::SeqCst);
        let mut source = FileSource::new(FileConfig::for_path("stub://road")).unwrap();
        let mut sink = RunSink::new(MeasurementWriter::new(Vec::new()).unwrap());
        let summary = pipeline.run(&mut source, &mut sink).unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.frames_processed, 0);
    }

    #[test]
    fn progress_counts_processed_frames() {
        // with frame_skip 4, frame 120 is the 30th processed frame
        assert!(!progress_due(0));
        assert!(!progress_due(15));
        assert!(progress_due(30));
        assert!(progress_due(60));
    }

    #[test]
    fn labels_and_counters_are_drawn() {
        let mut pipeline = Pipeline::new(&single_scale_config(), fixed_backend()).unwrap();
        let mut frame = Frame::filled(320, 240, [100, 100, 100]).unwrap();
        pipeline.process_frame(&mut frame).unwrap();
        // first legend swatch and the "Frame:" counter
        assert_ne!(frame.pixel(15, 90), Some([100, 100, 100]));
        assert_eq!(frame.pixel(10, 10), Some([255, 255, 255]));

        let mut plain = Pipeline::new(&single_scale_config(), fixed_backend())
            .unwrap()
            .with_overlay_info(false);
        let mut frame = Frame::filled(320, 240, [100, 100, 100]).unwrap();
        plain.process_frame(&mut frame).unwrap();
        // label strip only: nothing in the legend corner
        assert_eq!(frame.pixel(15, 90), Some([100, 100, 100]));
        assert_eq!(frame.pixel(10, 62), Some([0, 0, 0]));
    }

    #[test]
    fn separate_pipelines_keep_separate_stats() {
        let cfg = single_scale_config();
        let mut a = Pipeline::new(&cfg, fixed_backend()).unwrap();
        let b = Pipeline::new(&cfg, fixed_backend()).unwrap();
        let mut frame = Frame::filled(320, 240, [0, 0, 0]).unwrap();
        a.process_frame(&mut frame).unwrap();
        assert_eq!(a.stats().total(), 1);
        assert_eq!(b.stats().total(), 0);
    }
}
