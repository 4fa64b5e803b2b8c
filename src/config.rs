use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::depth::{DepthMethod, DepthModel, Jitter};
use crate::detect::DEFAULT_SCALES;
use crate::filter::DetectionFilter;
use crate::severity::{CategoryTable, SeverityCategory};

const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_WEB_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_FRAME_SKIP: u32 = 1;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_CATEGORY_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Six categories, blended depth, multi-scale detection.
    #[default]
    Enhanced,
    /// Four categories, area-only depth, single-scale detection.
    Simple,
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "enhanced" => Ok(Profile::Enhanced),
            "simple" => Ok(Profile::Simple),
            other => Err(anyhow!(
                "unknown profile '{}' (expected 'enhanced' or 'simple')",
                other
            )),
        }
    }
}

impl Profile {
    fn categories(self) -> CategoryTable {
        match self {
            Profile::Enhanced => CategoryTable::enhanced(),
            Profile::Simple => CategoryTable::simple(),
        }
    }

    fn depth_method(self) -> DepthMethod {
        match self {
            Profile::Enhanced => DepthMethod::Blended,
            Profile::Simple => DepthMethod::AreaOnly,
        }
    }

    fn multi_scale(self) -> bool {
        matches!(self, Profile::Enhanced)
    }
}

#[derive(Debug, Deserialize, Default)]
struct PotholeConfigFile {
    profile: Option<Profile>,
    model_path: Option<PathBuf>,
    input: Option<String>,
    output_dir: Option<PathBuf>,
    upload_dir: Option<PathBuf>,
    frame_skip: Option<u32>,
    save_frames: Option<bool>,
    web: Option<WebConfigFile>,
    depth: Option<DepthConfigFile>,
    detector: Option<DetectorConfigFile>,
    filter: Option<FilterConfigFile>,
    categories: Option<Vec<CategoryConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct WebConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DepthConfigFile {
    min_depth: Option<f64>,
    max_depth: Option<f64>,
    scale_factor: Option<f64>,
    method: Option<DepthMethod>,
    jitter: Option<bool>,
    jitter_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    multi_scale: Option<bool>,
    scales: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    enabled: Option<bool>,
    min_confidence: Option<f32>,
    min_box_side: Option<u32>,
    max_box_side: Option<u32>,
    min_aspect: Option<f32>,
    max_aspect: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CategoryConfigFile {
    name: String,
    /// Omitted for the unbounded last bucket.
    max_depth: Option<f64>,
    priority: u32,
    color: Option<[u8; 3]>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PotholeConfig {
    pub profile: Profile,
    pub model_path: Option<PathBuf>,
    pub input: Option<String>,
    pub output_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub frame_skip: u32,
    pub save_frames: bool,
    pub web: WebSettings,
    pub depth: DepthModel,
    pub jitter: Jitter,
    pub detector: DetectorSettings,
    pub filter: DetectionFilter,
    pub categories: CategoryTable,
}

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub addr: String,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub multi_scale: bool,
    pub scales: Vec<f64>,
}

impl Default for PotholeConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Enhanced)
    }
}

impl PotholeConfig {
    /// Load from `POTHOLE_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POTHOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults for a profile, without consulting files or the environment.
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            profile,
            model_path: None,
            input: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            frame_skip: DEFAULT_FRAME_SKIP,
            save_frames: true,
            web: WebSettings {
                addr: DEFAULT_WEB_ADDR.to_string(),
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            depth: DepthModel {
                method: profile.depth_method(),
                ..DepthModel::default()
            },
            jitter: Jitter::Disabled,
            detector: DetectorSettings {
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                nms_threshold: DEFAULT_NMS_THRESHOLD,
                multi_scale: profile.multi_scale(),
                scales: DEFAULT_SCALES.to_vec(),
            },
            filter: DetectionFilter::default(),
            categories: profile.categories(),
        }
    }

    fn from_file(file: PotholeConfigFile) -> Result<Self> {
        let profile = match std::env::var("POTHOLE_PROFILE") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => file.profile.unwrap_or_default(),
        };
        let mut cfg = Self::for_profile(profile);

        cfg.model_path = file.model_path;
        cfg.input = file.input;
        if let Some(dir) = file.output_dir {
            cfg.output_dir = dir;
        }
        if let Some(dir) = file.upload_dir {
            cfg.upload_dir = dir;
        }
        cfg.frame_skip = file.frame_skip.unwrap_or(cfg.frame_skip);
        cfg.save_frames = file.save_frames.unwrap_or(cfg.save_frames);

        if let Some(web) = file.web {
            if let Some(addr) = web.addr {
                cfg.web.addr = addr;
            }
            cfg.web.max_upload_bytes = web.max_upload_bytes.unwrap_or(cfg.web.max_upload_bytes);
        }

        if let Some(depth) = file.depth {
            cfg.depth.min_depth = depth.min_depth.unwrap_or(cfg.depth.min_depth);
            cfg.depth.max_depth = depth.max_depth.unwrap_or(cfg.depth.max_depth);
            cfg.depth.scale_factor = depth.scale_factor.unwrap_or(cfg.depth.scale_factor);
            cfg.depth.method = depth.method.unwrap_or(cfg.depth.method);
            cfg.jitter = match (depth.jitter, depth.jitter_seed) {
                (Some(false), _) => Jitter::Disabled,
                (_, Some(seed)) => Jitter::Seeded(seed),
                (Some(true), None) => Jitter::Entropy,
                (None, None) => Jitter::Disabled,
            };
        }

        if let Some(detector) = file.detector {
            cfg.detector.confidence_threshold = detector
                .confidence_threshold
                .unwrap_or(cfg.detector.confidence_threshold);
            cfg.detector.nms_threshold =
                detector.nms_threshold.unwrap_or(cfg.detector.nms_threshold);
            cfg.detector.multi_scale = detector.multi_scale.unwrap_or(cfg.detector.multi_scale);
            if let Some(scales) = detector.scales {
                cfg.detector.scales = scales;
            }
        }

        if let Some(filter) = file.filter {
            let f = &mut cfg.filter;
            f.enabled = filter.enabled.unwrap_or(f.enabled);
            f.min_confidence = filter.min_confidence.unwrap_or(f.min_confidence);
            f.min_box_side = filter.min_box_side.unwrap_or(f.min_box_side);
            f.max_box_side = filter.max_box_side.unwrap_or(f.max_box_side);
            f.aspect_range = (
                filter.min_aspect.unwrap_or(f.aspect_range.0),
                filter.max_aspect.unwrap_or(f.aspect_range.1),
            );
        }

        if let Some(categories) = file.categories {
            let categories = categories
                .into_iter()
                .map(|c| {
                    SeverityCategory::new(
                        &c.name,
                        c.max_depth.unwrap_or(f64::INFINITY),
                        c.priority,
                        c.color.unwrap_or(DEFAULT_CATEGORY_COLOR),
                        c.description.as_deref().unwrap_or(""),
                    )
                })
                .collect();
            cfg.categories =
                CategoryTable::new(categories).context("invalid category table in config file")?;
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("POTHOLE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(input) = std::env::var("POTHOLE_INPUT") {
            if !input.trim().is_empty() {
                self.input = Some(input);
            }
        }
        if let Ok(dir) = std::env::var("POTHOLE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("POTHOLE_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                self.upload_dir = PathBuf::from(dir);
            }
        }
        if let Ok(addr) = std::env::var("POTHOLE_WEB_ADDR") {
            if !addr.trim().is_empty() {
                self.web.addr = addr;
            }
        }
        if let Ok(skip) = std::env::var("POTHOLE_FRAME_SKIP") {
            self.frame_skip = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("POTHOLE_FRAME_SKIP must be a positive integer"))?;
        }
        if let Ok(conf) = std::env::var("POTHOLE_MIN_CONFIDENCE") {
            self.filter.min_confidence = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("POTHOLE_MIN_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(seed) = std::env::var("POTHOLE_JITTER_SEED") {
            let seed: u64 = seed
                .trim()
                .parse()
                .map_err(|_| anyhow!("POTHOLE_JITTER_SEED must be an unsigned integer"))?;
            self.jitter = Jitter::Seeded(seed);
        }
        Ok(())
    }

    /// Check every tunable; `load` calls this after layering.
    pub fn validate(&self) -> Result<()> {
        self.depth.validate()?;
        self.filter.validate()?;
        if self.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be at least 1"));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("nms_threshold", self.detector.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.detector.scales.is_empty()
            || self
                .detector
                .scales
                .iter()
                .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(anyhow!(
                "detector scales must be non-empty and positive, got {:?}",
                self.detector.scales
            ));
        }
        if self.web.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PotholeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_defaults() {
        let enhanced = PotholeConfig::for_profile(Profile::Enhanced);
        assert_eq!(enhanced.categories.len(), 6);
        assert_eq!(enhanced.depth.method, DepthMethod::Blended);
        assert!(enhanced.detector.multi_scale);
        assert_eq!(enhanced.jitter, Jitter::Disabled);
        enhanced.validate().unwrap();

        let simple = PotholeConfig::for_profile(Profile::Simple);
        assert_eq!(simple.categories.len(), 4);
        assert_eq!(simple.depth.method, DepthMethod::AreaOnly);
        assert!(!simple.detector.multi_scale);
        simple.validate().unwrap();
    }

    #[test]
    fn profile_parsing() {
        assert_eq!("Simple".parse::<Profile>().unwrap(), Profile::Simple);
        assert_eq!(" enhanced ".parse::<Profile>().unwrap(), Profile::Enhanced);
        assert!("fancy".parse::<Profile>().is_err());
    }

    #[test]
    fn validate_rejects_bad_tunables() {
        let mut cfg = PotholeConfig::default();
        cfg.frame_skip = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PotholeConfig::default();
        cfg.depth.min_depth = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PotholeConfig::default();
        cfg.detector.nms_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PotholeConfig::default();
        cfg.detector.scales = vec![1.0, 0.0];
        assert!(cfg.validate().is_err());
    }
}
