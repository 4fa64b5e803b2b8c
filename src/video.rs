//! Annotated video output using FFmpeg.
//!
//! Frames are converted from RGB24 to YUV420P and encoded as MPEG-4 part 2
//! (the XviD-compatible codec) into the container picked from the file
//! extension. The encoder is opened lazily on the first frame so callers do
//! not need to know the frame size up front.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use crate::frame::Frame;

const BIT_RATE: usize = 4_000_000;

/// Lazily opened annotated-video sink.
pub struct AnnotatedVideo {
    path: PathBuf,
    fps: u32,
    encoder: Option<VideoEncoder>,
    frames: u64,
}

impl AnnotatedVideo {
    pub fn new(path: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            path: path.into(),
            fps: fps.max(1),
            encoder: None,
            frames: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.encoder.is_none() {
            self.encoder = Some(VideoEncoder::open(
                &self.path,
                frame.width,
                frame.height,
                self.fps,
            )?);
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write(frame)?;
            self.frames += 1;
        }
        Ok(())
    }

    /// Flush the encoder and write the container trailer. Returns the number
    /// of frames written; no file is created when nothing was written.
    pub fn finish(self) -> Result<u64> {
        if let Some(encoder) = self.encoder {
            encoder.finish()?;
            log::info!(
                "annotated video: {} frames at {} fps -> {}",
                self.frames,
                self.fps,
                self.path.display()
            );
        }
        Ok(self.frames)
    }
}

struct VideoEncoder {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl VideoEncoder {
    fn open(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        // yuv420p needs even dimensions
        let (enc_w, enc_h) = (width & !1, height & !1);
        if enc_w == 0 || enc_h == 0 {
            return Err(anyhow!("frame {}x{} is too small to encode", width, height));
        }

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create video '{}'", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg build has no MPEG-4 encoder"))?;
        let mut stream = output.add_stream(codec).context("add video stream")?;
        let stream_index = stream.index();

        let encoder_time_base = ffmpeg::Rational(1, fps as i32);
        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create ffmpeg video encoder")?;
        context.set_width(enc_w);
        context.set_height(enc_h);
        context.set_format(ffmpeg::format::Pixel::YUV420P);
        context.set_time_base(encoder_time_base);
        context.set_frame_rate(Some(ffmpeg::Rational(fps as i32, 1)));
        context.set_bit_rate(BIT_RATE);
        if global_header {
            context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context.open_as(codec).context("open MPEG-4 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        output.write_header().context("write video header")?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            enc_w,
            enc_h,
            ffmpeg::format::Pixel::YUV420P,
            enc_w,
            enc_h,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "video encoder: {}x{} @ {} fps -> {}",
            enc_w,
            enc_h,
            fps,
            path.display()
        );
        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width: enc_w,
            height: enc_h,
            next_pts: 0,
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.width & !1 != self.width || frame.height & !1 != self.height {
            return Err(anyhow!(
                "frame size changed mid-video: {}x{} (encoding {}x{})",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let mut rgb = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        let row_bytes = self.width as usize * 3;
        let src_stride = frame.width as usize * 3;
        let pixels = frame.pixels();
        let data = rgb.data_mut(0);
        for y in 0..self.height as usize {
            let src = &pixels[y * src_stride..y * src_stride + row_bytes];
            data[y * stride..y * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler.run(&rgb, &mut yuv).context("convert frame to yuv420p")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .context("send frame to ffmpeg encoder")?;
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush ffmpeg encoder")?;
        self.drain()?;
        self.output.write_trailer().context("write video trailer")?;
        Ok(())
    }
}
