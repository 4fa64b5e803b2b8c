//! depth_probe - print depth estimates for reference box sizes
//!
//! Uses the configured depth model and category table with jitter
//! disabled, so the output is reproducible.

use anyhow::Result;
use clap::Parser;

use pothole_depth::{CategoryTable, DepthEstimator, Jitter, PotholeConfig};

const REFERENCE_BOXES: [(u32, u32); 5] = [(100, 50), (200, 100), (400, 200), (50, 25), (600, 300)];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame width in pixels.
    #[arg(long, default_value_t = 1280)]
    frame_width: u32,
    /// Frame height in pixels.
    #[arg(long, default_value_t = 720)]
    frame_height: u32,
    /// Detector confidence used for every box.
    #[arg(long, default_value_t = 0.8)]
    confidence: f32,
    /// Print the breakdown as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(serde::Serialize)]
struct ProbeRow {
    width: u32,
    height: u32,
    area: f64,
    aspect: f64,
    size: f64,
    depth_cm: f64,
    category: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let config = PotholeConfig::load()?;
    let model = config.depth;
    let mut estimator = DepthEstimator::new(model, Jitter::Disabled);

    let mut rows = Vec::with_capacity(REFERENCE_BOXES.len());
    for (w, h) in REFERENCE_BOXES {
        let signals = model.signals(w, h, args.frame_width, args.frame_height, args.confidence)?;
        let depth = estimator.estimate(w, h, args.frame_width, args.frame_height, args.confidence)?;
        let category = config.categories.classify(depth)?;
        rows.push(ProbeRow {
            width: w,
            height: h,
            area: signals.area,
            aspect: signals.aspect,
            size: signals.size,
            depth_cm: depth * 100.0,
            category: category.name.clone(),
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "depth model: min {:.2}m, max {:.2}m, scale {:.2}, {:?} (frame {}x{}, confidence {:.2})",
        model.min_depth,
        model.max_depth,
        model.scale_factor,
        model.method,
        args.frame_width,
        args.frame_height,
        args.confidence
    );
    for row in &rows {
        println!(
            "  {:>4}x{:<4} area {:.4}  aspect {:.4}  size {:.4}  -> {:5.1} cm  {}",
            row.width, row.height, row.area, row.aspect, row.size, row.depth_cm, row.category
        );
    }
    print_categories(&config.categories);
    Ok(())
}

fn print_categories(table: &CategoryTable) {
    println!("categories:");
    for category in table.iter() {
        let bound = if category.is_unbounded() {
            "unbounded".to_string()
        } else {
            format!("<= {:.1} cm", category.max_depth * 100.0)
        };
        println!(
            "  {}. {:<14} {:<12} {}",
            category.priority,
            category.label(),
            bound,
            category.description
        );
    }
}
