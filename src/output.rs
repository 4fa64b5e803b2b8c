//! Numbered output paths so repeated runs never overwrite each other.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

/// Container used for annotated video output.
pub const VIDEO_EXT: &str = "avi";

/// Next free run number for `{stem}_{N}.{ext}` in `dir`.
///
/// A legacy `{stem}_output.{ext}` counts as run 0. Returns 1 when nothing
/// matches or the directory does not exist yet.
pub fn next_run_number(dir: &Path, stem: &str, ext: &str) -> Result<u32> {
    if !dir.exists() {
        return Ok(1);
    }
    let pattern = Regex::new(&format!(
        r"^{}_(\d+|output)\.{}$",
        regex::escape(stem),
        regex::escape(ext)
    ))
    .context("building run-number pattern")?;

    let mut highest: Option<u32> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(caps) = pattern.captures(name) else {
            continue;
        };
        let n = match &caps[1] {
            "output" => 0,
            digits => match digits.parse::<u32>() {
                Ok(n) => n,
                Err(_) => continue,
            },
        };
        highest = Some(highest.map_or(n, |h| h.max(n)));
    }
    Ok(highest.map_or(1, |h| h.saturating_add(1)))
}

/// File name of an annotated key frame.
pub fn frame_file_name(frame_index: u64, ext: &str) -> String {
    format!("frame_{:06}.{}", frame_index, ext)
}

/// Annotated video is written at half the source rate, never below 1 fps.
pub fn annotated_fps(source_fps: f64) -> u32 {
    if !source_fps.is_finite() {
        return 1;
    }
    ((source_fps.max(0.0) as u32) / 2).max(1)
}

/// Paths for one processing run.
#[derive(Clone, Debug)]
pub struct RunOutputs {
    pub run: u32,
    pub measurements: PathBuf,
    pub frames_dir: PathBuf,
    pub video: PathBuf,
}

impl RunOutputs {
    /// Create `dir` if needed and reserve `{prefix}_detection_N`, numbered
    /// past both earlier measurement tables and earlier videos.
    pub fn allocate(dir: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        let stem = format!("{}_detection", prefix);
        let run = next_run_number(dir, &stem, "csv")?.max(next_run_number(dir, &stem, VIDEO_EXT)?);
        Ok(Self {
            run,
            measurements: dir.join(format!("{}_{}.csv", stem, run)),
            frames_dir: dir.join(format!("{}_{}_frames", stem, run)),
            video: dir.join(format!("{}_{}.{}", stem, run, VIDEO_EXT)),
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_missing_dir_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_run_number(dir.path(), "pothole_detection", "csv").unwrap(), 1);
        let missing = dir.path().join("nope");
        assert_eq!(next_run_number(&missing, "pothole_detection", "csv").unwrap(), 1);
    }

    #[test]
    fn legacy_output_counts_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pothole_detection_output.mp4"), b"").unwrap();
        assert_eq!(next_run_number(dir.path(), "pothole_detection", "mp4").unwrap(), 1);
    }

    #[test]
    fn picks_max_plus_one_and_ignores_others() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "pothole_detection_1.csv",
            "pothole_detection_7.csv",
            "pothole_detection_3.csv",
            "pothole_detection_9.mp4",
            "pothole_detection_x.csv",
            "other_detection_20.csv",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(next_run_number(dir.path(), "pothole_detection", "csv").unwrap(), 8);
    }

    #[test]
    fn allocate_creates_dir_and_numbers_runs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("runs");
        let first = RunOutputs::allocate(&out, "pothole").unwrap();
        assert!(out.is_dir());
        assert_eq!(first.run, 1);
        assert!(first.measurements.ends_with("pothole_detection_1.csv"));
        fs::write(&first.measurements, b"").unwrap();

        let second = RunOutputs::allocate(&out, "pothole").unwrap();
        assert_eq!(second.run, 2);
        assert!(second
            .frames_dir
            .join(frame_file_name(12, "png"))
            .ends_with("pothole_detection_2_frames/frame_000012.png"));
        assert!(second.video.ends_with("pothole_detection_2.avi"));

        // a leftover video without its table still bumps the number
        fs::write(out.join("pothole_detection_5.avi"), b"").unwrap();
        assert_eq!(RunOutputs::allocate(&out, "pothole").unwrap().run, 6);
    }

    #[test]
    fn annotated_video_runs_at_half_rate() {
        assert_eq!(annotated_fps(30.0), 15);
        assert_eq!(annotated_fps(29.97), 14);
        assert_eq!(annotated_fps(25.0), 12);
        assert_eq!(annotated_fps(1.0), 1);
        assert_eq!(annotated_fps(0.0), 1);
        assert_eq!(annotated_fps(f64::NAN), 1);
    }
}
