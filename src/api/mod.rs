//! Upload-and-process HTTP front end.
//!
//! A single background thread accepts connections on a nonblocking
//! listener and handles them one at a time. Every upload gets a fresh
//! `Pipeline`, so statistics never leak between requests.

use crate::config::PotholeConfig;
use crate::detect::{DetectorBackend, StubBackend};
use crate::ingest::{MediaKind, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::pipeline::Pipeline;
use crate::record::SessionSummary;
use crate::InvalidInput;
use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_HEADER_BYTES: usize = 8192;

/// Builds a detector for one request.
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_pothole(&PotholeConfig::default())
    }
}

impl ApiConfig {
    pub fn from_pothole(cfg: &PotholeConfig) -> Self {
        Self {
            addr: cfg.web.addr.clone(),
            upload_dir: cfg.upload_dir.clone(),
            output_dir: cfg.output_dir.clone(),
            max_upload_bytes: cfg.web.max_upload_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pothole_cfg: PotholeConfig,
    backends: BackendFactory,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pothole_cfg: PotholeConfig) -> Self {
        Self {
            cfg,
            pothole_cfg,
            backends: Arc::new(|| Ok(Box::new(StubBackend::new()) as Box<dyn DetectorBackend>)),
        }
    }

    pub fn with_backend_factory(mut self, backends: BackendFactory) -> Self {
        self.backends = backends;
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        self.pothole_cfg.validate()?;
        for dir in [&self.cfg.upload_dir, &self.cfg.output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid web address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = ServerState {
            cfg: self.cfg,
            pothole_cfg: self.pothole_cfg,
            backends: self.backends,
            filename_re: Regex::new(r"[^A-Za-z0-9._-]+")?,
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &state, shutdown_thread) {
                log::error!("web api stopped: {}", err);
            }
        });
        log::info!("web api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServerState {
    cfg: ApiConfig,
    pothole_cfg: PotholeConfig,
    backends: BackendFactory,
    filename_re: Regex,
}

fn run_api(listener: TcpListener, state: &ServerState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, state) {
                    log::warn!("web api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, state.cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            return write_error(&mut stream, 413, "file too large");
        }
        Err(RequestError::Malformed(reason)) => {
            return write_error(&mut stream, 400, &reason);
        }
        Err(RequestError::Io(err)) => return Err(err),
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("POST", "/upload") => {
            let (status, body) = match handle_upload(&request, state) {
                Ok(body) => (200, body),
                Err(err) => {
                    let status = error_status(&err);
                    log::warn!("upload rejected ({}): {:#}", status, err);
                    (status, error_body(&err.to_string()))
                }
            };
            write_response(&mut stream, status, "application/json", &body)
        }
        ("GET", path) if path.starts_with("/download/") => {
            handle_download(&mut stream, state, &path["/download/".len()..])
        }
        (_, "/health") | (_, "/upload") => write_error(&mut stream, 405, "method not allowed"),
        (_, path) if path.starts_with("/download/") => {
            write_error(&mut stream, 405, "method not allowed")
        }
        _ => write_error(&mut stream, 404, "not found"),
    }
}

/// Upload failure that maps to a specific status code.
#[derive(Debug)]
struct UploadRejected {
    status: u16,
    reason: String,
}

impl std::fmt::Display for UploadRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for UploadRejected {}

fn reject<T>(status: u16, reason: impl Into<String>) -> Result<T> {
    Err(UploadRejected {
        status,
        reason: reason.into(),
    }
    .into())
}

fn error_status(err: &anyhow::Error) -> u16 {
    if let Some(rejected) = err.downcast_ref::<UploadRejected>() {
        rejected.status
    } else if err.chain().any(|cause| cause.is::<InvalidInput>()) {
        400
    } else {
        500
    }
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    message: String,
    results: UploadResults,
}

#[derive(Serialize)]
struct UploadResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    csv_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detections: Option<Vec<DetectionView>>,
    /// Annotated key frames (frames with detections) of a video upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_urls: Option<Vec<String>>,
    statistics: SessionSummary,
}

#[derive(Serialize)]
struct DetectionView {
    depth: String,
    category: String,
    confidence: String,
    size: String,
}

/// Removes the uploaded file when dropped.
struct UploadGuard(PathBuf);

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.0) {
            log::warn!("could not remove upload {}: {}", self.0.display(), err);
        }
    }
}

fn handle_upload(request: &HttpRequest, state: &ServerState) -> Result<Vec<u8>> {
    let raw_name = match request.query.get("filename") {
        Some(name) if !name.trim().is_empty() => name,
        _ => return reject(400, "no file selected"),
    };
    let name = sanitize_filename(&state.filename_re, raw_name);
    let kind = match name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
    {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        _ => {
            return reject(
                415,
                format!(
                    "invalid file type. Allowed: {}",
                    [IMAGE_EXTENSIONS, VIDEO_EXTENSIONS].concat().join(", ")
                ),
            )
        }
    };
    if request.body.is_empty() {
        return reject(400, "empty upload");
    }

    let stored_name = format!("{}_{}_{}", unix_secs(), random_id(), name);
    let upload_path = state.cfg.upload_dir.join(&stored_name);
    std::fs::write(&upload_path, &request.body)
        .with_context(|| format!("failed to store upload {}", upload_path.display()))?;
    let _guard = UploadGuard(upload_path.clone());
    log::info!(
        "upload {} ({} bytes, {:?})",
        stored_name,
        request.body.len(),
        kind
    );

    let backend = (state.backends)()?;
    let pipeline = Pipeline::new(&state.pothole_cfg, backend)?;
    let response = match kind {
        MediaKind::Video => process_video(pipeline, &upload_path, &stored_name, state)?,
        _ => process_image(pipeline, &upload_path, &stored_name, state)?,
    };
    Ok(serde_json::to_vec(&response)?)
}

#[cfg(feature = "ingest-image")]
fn process_image(
    mut pipeline: Pipeline,
    upload_path: &Path,
    stored_name: &str,
    state: &ServerState,
) -> Result<UploadResponse> {
    let mut frame = crate::ingest::image::load_frame(upload_path)
        .map_err(|err| UploadRejected {
            status: 400,
            reason: format!("could not read image: {}", err),
        })?;
    let report = pipeline.process_frame(&mut frame)?;

    let stem = stored_name
        .rsplit_once('.')
        .map_or(stored_name, |(stem, _)| stem);
    let output_name = format!("processed_{}.png", stem);
    crate::ingest::image::save_frame(&frame, &state.cfg.output_dir.join(&output_name))?;

    let detections = report
        .records
        .iter()
        .map(|record| DetectionView {
            depth: format!("{:.1}cm", record.depth_cm()),
            category: record.category.name.clone(),
            confidence: format!("{:.2}", record.detection.confidence),
            size: format!("{}x{}px", record.detection.width(), record.detection.height()),
        })
        .collect();
    Ok(UploadResponse {
        success: true,
        message: "Image processed successfully".to_string(),
        results: UploadResults {
            download_url: Some(format!("/download/{}", output_name)),
            csv_url: None,
            detections: Some(detections),
            frame_urls: None,
            statistics: pipeline.summary(),
        },
    })
}

#[cfg(not(feature = "ingest-image"))]
fn process_image(
    _pipeline: Pipeline,
    _upload_path: &Path,
    _stored_name: &str,
    _state: &ServerState,
) -> Result<UploadResponse> {
    reject(415, "image processing requires the ingest-image feature")
}

fn process_video(
    mut pipeline: Pipeline,
    upload_path: &Path,
    stored_name: &str,
    state: &ServerState,
) -> Result<UploadResponse> {
    let path = upload_path
        .to_str()
        .ok_or_else(|| anyhow!("upload path is not valid UTF-8"))?;
    let mut source = match crate::ingest::FileSource::new(crate::ingest::FileConfig::for_path(path))
    {
        Ok(source) => source,
        Err(err) => return reject(415, format!("cannot decode video: {}", err)),
    };
    source.connect()?;

    let csv_name = format!("processed_{}.csv", stored_name);
    let frames_dir_name = format!("processed_{}_frames", stored_name);
    let writer = crate::measurements::MeasurementWriter::create(&state.cfg.output_dir.join(&csv_name))?;
    let mut sink = crate::pipeline::RunSink::new(writer)
        .with_frames_dir(state.cfg.output_dir.join(&frames_dir_name));

    #[cfg(feature = "ingest-file-ffmpeg")]
    let video_name = {
        let stem = stored_name
            .rsplit_once('.')
            .map_or(stored_name, |(stem, _)| stem);
        let name = format!("processed_{}.{}", stem, crate::output::VIDEO_EXT);
        let fps = crate::output::annotated_fps(source.fps());
        sink = sink.with_video(crate::video::AnnotatedVideo::new(
            state.cfg.output_dir.join(&name),
            fps,
        ));
        name
    };

    let summary = pipeline.run(&mut source, &mut sink)?;
    let frame_urls: Vec<String> = sink
        .saved_frames()
        .iter()
        .map(|frame| format!("/download/{}/{}", frames_dir_name, frame))
        .collect();
    sink.finish()?;

    #[cfg(feature = "ingest-file-ffmpeg")]
    let download_url = (summary.video_frames > 0).then(|| format!("/download/{}", video_name));
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    let download_url = None;

    Ok(UploadResponse {
        success: true,
        message: format!(
            "Video processed successfully ({} of {} frames)",
            summary.frames_processed, summary.frames_read
        ),
        results: UploadResults {
            download_url,
            csv_url: Some(format!("/download/{}", csv_name)),
            detections: None,
            frame_urls: Some(frame_urls),
            statistics: summary.session,
        },
    })
}

fn handle_download(stream: &mut TcpStream, state: &ServerState, name: &str) -> Result<()> {
    if !is_safe_download(name) {
        return write_error(stream, 400, "invalid file name");
    }
    let path = state.cfg.output_dir.join(name);
    if !path.is_file() {
        return write_error(stream, 404, "file not found");
    }
    let body = std::fs::read(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    write_response(stream, 200, content_type(name), &body)
}

/// An output file, or a file one directory down (video key frames). No
/// component may be empty, hidden, or contain `..` or a backslash.
fn is_safe_download(name: &str) -> bool {
    let parts: Vec<&str> = name.split('/').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && !part.starts_with('.')
                && !part.contains(['\\', ':'])
                && !part.contains("..")
        })
}

fn content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("csv") => "text/csv",
        Some("avi") => "video/x-msvideo",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Reduce an uploaded name to a safe basename.
fn sanitize_filename(re: &Regex, raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned = re.replace_all(base.trim(), "_");
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn random_id() -> String {
    let mut id = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut id);
    hex::encode(id)
}

enum RequestError {
    TooLarge,
    Malformed(String),
    Io(anyhow::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.into())
    }
}

fn read_request(stream: &mut TcpStream, max_body: u64) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("incomplete request".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("request headers too large".to_string()));
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".to_string()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".to_string()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (raw_path.to_string(), HashMap::new()),
    };

    let mut body = data[header_end + 4..].to_vec();
    if method == "POST" {
        let length: u64 = headers
            .get("content-length")
            .ok_or_else(|| RequestError::Malformed("missing Content-Length".to_string()))?
            .parse()
            .map_err(|_| RequestError::Malformed("invalid Content-Length".to_string()))?;
        if length > max_body {
            return Err(RequestError::TooLarge);
        }
        let remaining = (length as usize).saturating_sub(body.len());
        if remaining > 0 {
            let start = body.len();
            body.resize(length as usize, 0);
            stream.read_exact(&mut body[start..])?;
        }
        body.truncate(length as usize);
    }

    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(k)?, percent_decode(v)?))
        })
        .collect()
}

fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = value.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn error_body(message: &str) -> Vec<u8> {
    serde_json::json!({ "error": message }).to_string().into_bytes()
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    write_response(stream, status, "application/json", &error_body(message))
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        415 => "HTTP/1.1 415 Unsupported Media Type",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        let re = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
        assert_eq!(sanitize_filename(&re, "../../etc/passwd.png"), "passwd.png");
        assert_eq!(sanitize_filename(&re, "my road (1).jpg"), "my_road_1_.jpg");
        assert_eq!(sanitize_filename(&re, "C:\\x\\clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename(&re, "..."), "upload");
    }

    #[test]
    fn query_is_percent_decoded() {
        let q = parse_query("filename=road%20one.png&x=1+2");
        assert_eq!(q.get("filename").map(String::as_str), Some("road one.png"));
        assert_eq!(q.get("x").map(String::as_str), Some("1 2"));
        assert!(percent_decode("%zz").is_none());
    }

    #[test]
    fn download_names_allow_one_frames_directory() {
        assert!(is_safe_download("processed_1_road.png"));
        assert!(is_safe_download("processed_1_clip.mp4_frames/frame_000004.png"));
        assert!(!is_safe_download(""));
        assert!(!is_safe_download("a/b/c.png"));
        assert!(!is_safe_download("../secret"));
        assert!(!is_safe_download("frames/../../secret"));
        assert!(!is_safe_download("frames/.hidden"));
        assert!(!is_safe_download("frames//x.png"));
        assert!(!is_safe_download("frames\\x.png"));
        assert!(!is_safe_download("C:x.png"));
    }

    #[test]
    fn status_mapping() {
        let rejected: anyhow::Error = UploadRejected {
            status: 415,
            reason: "nope".to_string(),
        }
        .into();
        assert_eq!(error_status(&rejected), 415);
        let invalid: anyhow::Error = InvalidInput::new("bad box").into();
        assert_eq!(error_status(&invalid), 400);
        assert_eq!(error_status(&anyhow!("disk full")), 500);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("a.PNG"), "image/png");
        assert_eq!(content_type("a.csv"), "text/csv");
        assert_eq!(content_type("a"), "application/octet-stream");
    }
}
