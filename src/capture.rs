//! Frame acquisition: the capture contract the processor drives, plus the
//! camera-backed and synthetic implementations.

use log::{info, warn};
use nokhwa::pixel_format::LumaFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Buffer, Camera};
use thiserror::Error;

use crate::buffer::Frame;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera init: {0}")]
    Init(String),
    #[error("camera stream: {0}")]
    Stream(String),
    #[error("camera frame: {0}")]
    Frame(String),
}

/// One frame source. `start` after `stop` must succeed, which the processor
/// relies on to flush buffered frames around calibration.
pub trait Capture {
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Wait for the next frame. `false` means timeout or end of stream; with
    /// `timeout_s <= 0` and `block` set the wait is unbounded.
    fn advance(&mut self, block: bool, timeout_s: f32) -> Result<bool, CaptureError>;

    /// Write the current frame as 8-bit greyscale, resizing `into` to the
    /// source resolution. `false` when no frame has been advanced to yet.
    fn retrieve(&mut self, into: &mut Frame) -> Result<bool, CaptureError>;

    fn is_capturing(&self) -> bool;
}

/// Copy the luma channel out of a packed YUYV buffer, honoring the source
/// stride; any line padding is skipped at the end of each row.
pub fn yuyv_to_grey(src: &[u8], width: u32, height: u32, bytes_per_line: u32, into: &mut Frame) {
    into.resize(width, height);
    let dst = into.data_mut();
    let mut di = 0usize;
    for row in 0..height as usize {
        let mut si = row * bytes_per_line as usize;
        let mut column = 0usize;
        while column + 1 < width as usize {
            dst[di] = src[si];
            dst[di + 1] = src[si + 2];
            di += 2;
            si += 4;
            column += 2;
        }
    }
}

/// One supported frame-interval range of a capture format, in seconds as a
/// numerator/denominator pair.
pub enum FrameIntervalSupport {
    Discrete(u32, u32),
    Continuous { min: (u32, u32), max: (u32, u32) },
    Stepwise,
}

/// Best rational approximation of `value` with the denominator bounded,
/// found by walking the continued-fraction convergents.
pub fn rational_approximation(value: f64, max_denominator: u64) -> (u64, u64) {
    if max_denominator <= 1 {
        return (value as u64, 1);
    }

    let mut f = value.abs();
    let mut h = [0u64, 1, 0];
    let mut k = [1u64, 0, 0];
    let mut n: u64 = 1;
    while f != f.floor() {
        n <<= 1;
        f *= 2.0;
    }
    let mut d = f as u64;

    // continued fraction, checking the denominator bound each step
    for i in 0..64 {
        let a = if n != 0 { d / n } else { 0 };
        if i != 0 && a == 0 {
            break;
        }

        let x = d;
        d = n;
        n = x % n;

        let mut x = a;
        let mut last_step = false;
        if k[1] * a + k[0] >= max_denominator {
            x = (max_denominator - k[0]) / k[1];
            if x * 2 >= a || k[1] >= max_denominator {
                last_step = true;
            } else {
                break;
            }
        }

        h[2] = x * h[1] + h[0];
        h[0] = h[1];
        h[1] = h[2];
        k[2] = x * k[1] + k[0];
        k[0] = k[1];
        k[1] = k[2];
        if last_step {
            break;
        }
    }
    (h[1], k[1])
}

/// Pick the supported frame interval closest to `1/fps`. Discrete intervals
/// compete on error; continuous ranges clamp, or approximate the target with
/// a denominator of at most 1000.
pub fn closest_frame_interval(
    supported: &[FrameIntervalSupport],
    fps: f32,
) -> Option<(u32, u32)> {
    let target = 1.0f32 / fps;
    let mut selected: Option<(u32, u32)> = None;
    let mut selected_error = f32::MAX;

    for entry in supported {
        match entry {
            FrameIntervalSupport::Discrete(numerator, denominator) => {
                let interval = *numerator as f32 / *denominator as f32;
                let error = (interval - target).abs();
                if error < selected_error {
                    selected = Some((*numerator, *denominator));
                    selected_error = error;
                }
            }
            FrameIntervalSupport::Continuous { min, max } => {
                let interval_min = min.0 as f32 / min.1 as f32;
                let interval_max = max.0 as f32 / max.1 as f32;
                let candidate = if target < interval_min {
                    *min
                } else if target > interval_max {
                    *max
                } else {
                    let (numerator, denominator) = rational_approximation(target as f64, 1000);
                    (numerator as u32, denominator as u32)
                };
                let error = (candidate.0 as f32 / candidate.1 as f32 - target).abs();
                if error < selected_error {
                    selected = Some(candidate);
                    selected_error = error;
                }
            }
            FrameIntervalSupport::Stepwise => {
                warn!("stepwise frame intervals are unsupported, skipping entry");
            }
        }
    }
    selected
}

/// Camera-backed capture requesting packed YUYV and extracting the luma
/// channel itself; other source formats are decoded to greyscale by the
/// camera crate.
pub struct CameraCapture {
    camera: Camera,
    pending: Option<Buffer>,
    capturing: bool,
}

impl CameraCapture {
    pub fn open(index: u32, width: u32, height: u32, fps: f32) -> Result<Self, CaptureError> {
        let format = CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::YUYV,
            fps.max(1.0) as u32,
        );
        let requested = RequestedFormat::new::<LumaFormat>(RequestedFormatType::Closest(format));
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| CaptureError::Init(format!("create camera: {e}")))?;
        let actual = camera.resolution();

        // refine the frame rate among the intervals the driver offers for
        // the negotiated resolution
        let supported: Vec<FrameIntervalSupport> = camera
            .compatible_camera_formats()
            .map(|formats| {
                formats
                    .iter()
                    .filter(|f| f.resolution() == actual)
                    .map(|f| FrameIntervalSupport::Discrete(1, f.frame_rate()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some((numerator, denominator)) = closest_frame_interval(&supported, fps) {
            let rate = (denominator as f32 / numerator as f32).round() as u32;
            if rate != camera.frame_rate() {
                if let Err(e) = camera.set_frame_rate(rate) {
                    warn!("could not select {rate} fps: {e}");
                }
            }
        }

        info!(
            "camera {index} delivers {}x{} @ {} fps",
            actual.width(),
            actual.height(),
            camera.frame_rate()
        );
        Ok(CameraCapture {
            camera,
            pending: None,
            capturing: false,
        })
    }
}

impl Capture for CameraCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.capturing {
            return Ok(());
        }
        self.camera
            .open_stream()
            .map_err(|e| CaptureError::Stream(format!("open stream: {e}")))?;
        self.capturing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Ok(());
        }
        self.pending = None;
        self.camera
            .stop_stream()
            .map_err(|e| CaptureError::Stream(format!("stop stream: {e}")))?;
        self.capturing = false;
        Ok(())
    }

    fn advance(&mut self, _block: bool, _timeout_s: f32) -> Result<bool, CaptureError> {
        if !self.capturing {
            return Ok(false);
        }
        // the camera crate exposes no timed wait; frame() blocks until the
        // device delivers
        match self.camera.frame() {
            Ok(buffer) => {
                self.pending = Some(buffer);
                Ok(true)
            }
            Err(e) => Err(CaptureError::Frame(format!("fetch frame: {e}"))),
        }
    }

    fn retrieve(&mut self, into: &mut Frame) -> Result<bool, CaptureError> {
        let Some(buffer) = self.pending.as_ref() else {
            warn!("no frame buffer available");
            return Ok(false);
        };
        let resolution = buffer.resolution();
        if buffer.source_frame_format() == FrameFormat::YUYV {
            yuyv_to_grey(
                buffer.buffer(),
                resolution.width(),
                resolution.height(),
                resolution.width() * 2,
                into,
            );
        } else {
            let decoded = buffer
                .decode_image::<LumaFormat>()
                .map_err(|e| CaptureError::Frame(format!("decode luma: {e}")))?;
            into.assign(resolution.width(), resolution.height(), decoded.as_raw());
        }
        Ok(true)
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }
}

/// Synthetic capture: a bright blob orbiting the frame center, for demos and
/// pipeline tests without camera hardware.
pub struct TestPatternCapture {
    width: u32,
    height: u32,
    capturing: bool,
    advanced: bool,
    ticks: u64,
}

impl TestPatternCapture {
    pub fn new(width: u32, height: u32) -> Self {
        TestPatternCapture {
            width: width.max(16),
            height: height.max(16),
            capturing: false,
            advanced: false,
            ticks: 0,
        }
    }
}

impl Capture for TestPatternCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.capturing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.capturing = false;
        self.advanced = false;
        Ok(())
    }

    fn advance(&mut self, _block: bool, _timeout_s: f32) -> Result<bool, CaptureError> {
        if !self.capturing {
            return Ok(false);
        }
        self.ticks += 1;
        self.advanced = true;
        Ok(true)
    }

    fn retrieve(&mut self, into: &mut Frame) -> Result<bool, CaptureError> {
        if !self.advanced {
            return Ok(false);
        }
        into.resize(self.width, self.height);
        into.fill(0);

        let angle = self.ticks as f32 * 0.1;
        let cx = self.width as f32 * (0.5 + 0.25 * angle.cos());
        let cy = self.height as f32 * (0.5 + 0.25 * angle.sin());
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let x = (cx as i32 + dx).clamp(0, self.width as i32 - 1) as u32;
                let y = (cy as i32 + dy).clamp(0, self.height as i32 - 1) as u32;
                into.set(x, y, 0xff);
            }
        }
        Ok(true)
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_luma_is_copied_pairwise() {
        // two rows of four pixels, 4 bytes padding per line
        let width = 4u32;
        let bytes_per_line = width * 2 + 4;
        let mut src = Vec::new();
        for row in 0..2u8 {
            for pair in 0..2u8 {
                let base = row * 40 + pair * 10;
                src.extend_from_slice(&[base, 0x80, base + 5, 0x80]);
            }
            src.extend_from_slice(&[0xee; 4]);
        }

        let mut frame = Frame::new();
        yuyv_to_grey(&src, width, 2, bytes_per_line, &mut frame);
        assert_eq!(frame.data(), &[0, 5, 10, 15, 40, 45, 50, 55]);
    }

    #[test]
    fn discrete_interval_minimizes_error() {
        let supported = [
            FrameIntervalSupport::Discrete(1, 15),
            FrameIntervalSupport::Discrete(1, 30),
            FrameIntervalSupport::Discrete(1, 60),
        ];
        assert_eq!(closest_frame_interval(&supported, 25.0), Some((1, 30)));
        assert_eq!(closest_frame_interval(&supported, 60.0), Some((1, 60)));
    }

    #[test]
    fn continuous_interval_clamps_and_approximates() {
        let range = [FrameIntervalSupport::Continuous {
            min: (1, 60),
            max: (1, 5),
        }];
        // inside the range: 1/30 is representable exactly
        assert_eq!(closest_frame_interval(&range, 30.0), Some((1, 30)));
        // faster than the range allows: clamp to the shortest interval
        assert_eq!(closest_frame_interval(&range, 120.0), Some((1, 60)));
        // slower: clamp to the longest
        assert_eq!(closest_frame_interval(&range, 2.0), Some((1, 5)));
    }

    #[test]
    fn rational_approximation_respects_denominator_bound() {
        let (numerator, denominator) = rational_approximation(1.0 / 30.0, 1000);
        assert_eq!((numerator, denominator), (1, 30));

        let (numerator, denominator) = rational_approximation(std::f64::consts::PI, 1000);
        assert!(denominator <= 1000);
        let value = numerator as f64 / denominator as f64;
        assert!((value - std::f64::consts::PI).abs() < 1e-5);
    }

    #[test]
    fn stepwise_entries_are_skipped() {
        let supported = [
            FrameIntervalSupport::Stepwise,
            FrameIntervalSupport::Discrete(1, 10),
        ];
        assert_eq!(closest_frame_interval(&supported, 10.0), Some((1, 10)));
        assert_eq!(closest_frame_interval(&[FrameIntervalSupport::Stepwise], 10.0), None);
    }

    #[test]
    fn test_pattern_capture_round_trips() {
        let mut capture = TestPatternCapture::new(64, 64);
        let mut frame = Frame::new();
        assert!(!capture.is_capturing());
        assert!(!capture.advance(true, 1.0).unwrap());

        capture.start().unwrap();
        assert!(capture.advance(true, 1.0).unwrap());
        assert!(capture.retrieve(&mut frame).unwrap());
        assert_eq!(frame.data().len(), 64 * 64);
        assert!(frame.data().iter().any(|&p| p == 0xff));

        capture.stop().unwrap();
        assert!(!capture.is_capturing());
        capture.start().unwrap();
        assert!(capture.advance(true, 1.0).unwrap());
    }
}
