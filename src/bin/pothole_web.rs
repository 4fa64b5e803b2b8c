//! pothole_web - upload-and-process web front end
//!
//! This daemon:
//! 1. Loads configuration (POTHOLE_CONFIG + environment)
//! 2. Serves /upload, /download/<name> and /health
//! 3. Processes each upload with its own statistics

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use pothole_depth::api::{ApiConfig, ApiServer, BackendFactory};
use pothole_depth::detect::BackendRegistry;
use pothole_depth::{DetectorBackend, PotholeConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PotholeConfig::load()?;
    let registry = BackendRegistry::from_config(&config)?;
    let backend = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend available"))?;
    log::info!(
        "pothole_web using backend '{}' (registered: {})",
        backend.name(),
        registry.list().join(", ")
    );
    let factory: BackendFactory =
        Arc::new(move || Ok(Box::new(backend.clone()) as Box<dyn DetectorBackend>));

    let api_config = ApiConfig::from_pothole(&config);
    log::info!(
        "uploads -> {}, results -> {}",
        api_config.upload_dir.display(),
        api_config.output_dir.display()
    );
    let api_handle = ApiServer::new(api_config, config)
        .with_backend_factory(factory)
        .spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "pothole_web running on http://{}; waiting for shutdown signal (Ctrl-C)...",
        api_handle.addr
    );
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping web server...");
    api_handle.stop()?;

    Ok(())
}
