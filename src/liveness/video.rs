//! Video liveness
//!
//! Only the pixel at the frame midpoint is inspected. RGB-family layouts are
//! read directly; planar and semi-planar YUV layouts are converted with the
//! Rec.601 matrix. A frame is live when its brightest channel clears the
//! black level.

use std::sync::Arc;

use super::signal::VerificationSignal;
use super::LivenessThresholds;

const KR: f64 = 0.299;
const KG: f64 = 0.587;
const KB: f64 = 0.114;

/// Pixel layout of a decoded video buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoFormat {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    Argb,
    Abgr,
    /// Y plane, U plane, V plane
    I420,
    /// Y plane, V plane, U plane
    Yv12,
    /// Y plane, interleaved UV plane
    Nv12,
    /// Y plane, interleaved VU plane
    Nv21,
}

impl VideoFormat {
    /// Bytes per pixel and the (r, g, b) byte offsets inside one pixel
    fn rgb_layout(&self) -> Option<(usize, [usize; 3])> {
        match self {
            VideoFormat::Rgb => Some((3, [0, 1, 2])),
            VideoFormat::Bgr => Some((3, [2, 1, 0])),
            VideoFormat::Rgba => Some((4, [0, 1, 2])),
            VideoFormat::Bgra => Some((4, [2, 1, 0])),
            VideoFormat::Argb => Some((4, [1, 2, 3])),
            VideoFormat::Abgr => Some((4, [3, 2, 1])),
            _ => None,
        }
    }
}

/// A decoded frame as delivered to a video sink
#[derive(Clone, Debug)]
pub struct VideoBuffer {
    pub width: usize,
    pub height: usize,
    pub format: VideoFormat,
    pub data: Vec<u8>,
}

impl VideoBuffer {
    pub fn new(width: usize, height: usize, format: VideoFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// Solid I420 frame
    pub fn solid_i420(width: usize, height: usize, y: u8, u: u8, v: u8) -> Self {
        let luma = width * height;
        let chroma = width.div_ceil(2) * height.div_ceil(2);
        let mut data = vec![y; luma];
        data.extend(std::iter::repeat(u).take(chroma));
        data.extend(std::iter::repeat(v).take(chroma));
        Self::new(width, height, VideoFormat::I420, data)
    }

    /// RGB value of the pixel at (x, y), or None if the buffer is too short
    pub fn rgb_at(&self, x: usize, y: usize) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }

        if let Some((stride, [r, g, b])) = self.format.rgb_layout() {
            let base = (y * self.width + x) * stride;
            let pixel = self.data.get(base..base + stride)?;
            return Some((pixel[r], pixel[g], pixel[b]));
        }

        let (luma, u, v) = self.yuv_at(x, y)?;
        Some(rec601_to_rgb(luma, u, v))
    }

    fn yuv_at(&self, x: usize, y: usize) -> Option<(u8, u8, u8)> {
        let luma_len = self.width * self.height;
        let chroma_width = self.width.div_ceil(2);
        let chroma_len = chroma_width * self.height.div_ceil(2);
        let uv_index = (y / 2) * chroma_width + x / 2;
        let luma = *self.data.get(y * self.width + x)?;

        let (u, v) = match self.format {
            VideoFormat::I420 => (
                *self.data.get(luma_len + uv_index)?,
                *self.data.get(luma_len + chroma_len + uv_index)?,
            ),
            VideoFormat::Yv12 => (
                *self.data.get(luma_len + chroma_len + uv_index)?,
                *self.data.get(luma_len + uv_index)?,
            ),
            VideoFormat::Nv12 => (
                *self.data.get(luma_len + uv_index * 2)?,
                *self.data.get(luma_len + uv_index * 2 + 1)?,
            ),
            VideoFormat::Nv21 => (
                *self.data.get(luma_len + uv_index * 2 + 1)?,
                *self.data.get(luma_len + uv_index * 2)?,
            ),
            _ => return None,
        };
        Some((luma, u, v))
    }
}

/// Rec.601 full-swing conversion, each channel clamped to 0..=255
pub fn rec601_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = f64::from(y);
    let u = f64::from(u) - 128.0;
    let v = f64::from(v) - 128.0;

    let r = y + 2.0 * v * (1.0 - KR);
    let g = y - 2.0 * u * (1.0 - KB) * KB / KG - 2.0 * v * (1.0 - KR) * KR / KG;
    let b = y + 2.0 * u * (1.0 - KB);

    (clamp_channel(r), clamp_channel(g), clamp_channel(b))
}

fn clamp_channel(value: f64) -> u8 {
    // truncate toward zero before clamping
    (value as i32).clamp(0, 255) as u8
}

/// Returns true when the midpoint pixel's brightest channel exceeds `black_level`
pub fn is_live_frame(buffer: &VideoBuffer, black_level: u8) -> bool {
    match buffer.rgb_at(buffer.width / 2, buffer.height / 2) {
        Some((r, g, b)) => r.max(g).max(b) > black_level,
        None => false,
    }
}

/// Sink-side probe that flips a signal on the first non-black frame
#[derive(Clone)]
pub struct VideoLivenessProbe {
    signal: Arc<VerificationSignal>,
    black_level: u8,
}

impl VideoLivenessProbe {
    pub fn new(signal: Arc<VerificationSignal>, thresholds: &LivenessThresholds) -> Self {
        Self {
            signal,
            black_level: thresholds.video_black_level,
        }
    }

    pub fn observe(&self, buffer: &VideoBuffer) {
        if self.signal.is_set() {
            return;
        }
        if is_live_frame(buffer, self.black_level) {
            self.signal.set();
        }
    }
}
