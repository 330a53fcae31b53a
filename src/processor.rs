//! Per-tick orchestration of the capture → detect → unproject → filter →
//! emit pipeline, and the calibration state machine.

use log::{debug, error, info, warn};

use crate::buffer::{Frame, PointArray};
use crate::capture::Capture;
use crate::detector::PointDetector;
use crate::filter::{FilterChain, PointFilter};
use crate::sinks::{FrameSink, PointSink};
use crate::unprojector::Unprojector;

pub const DEFAULT_ADVANCE_TIMEOUT_S: f32 = 1.0;

/// Observers of the calibration state machine; they receive a borrow during
/// dispatch and never retain it.
pub trait CalibrationListener {
    fn calibration_begin(&mut self);
    fn calibration_end(&mut self, success: bool);
}

/// Owns the whole pipeline state; everything is mutated from the single
/// control flow driving `tick`.
pub struct Processor {
    capture: Box<dyn Capture>,
    detector: PointDetector,
    unprojector: Unprojector,
    filter: FilterChain,
    frame_sinks: Vec<Box<dyn FrameSink>>,
    point_sinks: Vec<Box<dyn PointSink>>,
    listeners: Vec<Box<dyn CalibrationListener>>,
    frame: Frame,
    points: PointArray,
    calibrating: bool,
    calibration_succeeded: bool,
    frame_output_enabled: bool,
    point_output_enabled: bool,
    advance_timeout_s: f32,
}

impl Processor {
    pub fn new(capture: Box<dyn Capture>, detector: PointDetector, unprojector: Unprojector) -> Self {
        Processor {
            capture,
            detector,
            unprojector,
            filter: FilterChain::new(),
            frame_sinks: Vec::new(),
            point_sinks: Vec::new(),
            listeners: Vec::new(),
            frame: Frame::new(),
            points: PointArray::new(),
            calibrating: false,
            calibration_succeeded: false,
            frame_output_enabled: true,
            point_output_enabled: true,
            advance_timeout_s: DEFAULT_ADVANCE_TIMEOUT_S,
        }
    }

    pub fn set_filter(&mut self, filter: FilterChain) {
        self.filter = filter;
    }

    pub fn add_frame_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.frame_sinks.push(sink);
    }

    pub fn add_point_sink(&mut self, sink: Box<dyn PointSink>) {
        self.point_sinks.push(sink);
    }

    pub fn add_calibration_listener(&mut self, listener: Box<dyn CalibrationListener>) {
        self.listeners.push(listener);
    }

    pub fn set_frame_output_enabled(&mut self, enabled: bool) {
        self.frame_output_enabled = enabled;
    }

    pub fn set_point_output_enabled(&mut self, enabled: bool) {
        self.point_output_enabled = enabled;
    }

    pub fn set_advance_timeout(&mut self, timeout_s: f32) {
        self.advance_timeout_s = timeout_s;
    }

    pub fn unprojector(&self) -> &Unprojector {
        &self.unprojector
    }

    pub fn unprojector_mut(&mut self) -> &mut Unprojector {
        &mut self.unprojector
    }

    pub fn is_processing(&self) -> bool {
        self.capture.is_capturing()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    pub fn calibration_succeeded(&self) -> bool {
        self.calibration_succeeded
    }

    pub fn start(&mut self) {
        if self.is_processing() {
            return;
        }
        if let Err(e) = self.capture.start() {
            error!("could not start capture: {e}");
        }
    }

    pub fn stop(&mut self) {
        if !self.is_processing() {
            return;
        }
        if self.calibrating {
            self.finish_calibration(false);
        }
        if let Err(e) = self.capture.stop() {
            error!("could not stop capture: {e}");
        }
    }

    /// Enter calibration. The capture is flushed so the first calibration
    /// tick sees a frame taken after the pattern went up.
    pub fn start_calibration(&mut self) -> bool {
        if !self.is_processing() || self.calibrating {
            return false;
        }
        info!("calibration started");
        self.calibrating = true;
        self.calibration_succeeded = false;
        for listener in &mut self.listeners {
            listener.calibration_begin();
        }
        self.flush_capture();
        true
    }

    /// One pipeline iteration: advance and retrieve a frame, fan it out,
    /// then either calibrate or run the detection chain. Capture failures
    /// skip the tick and leave all state unchanged.
    pub fn tick(&mut self) {
        if !self.is_processing() {
            return;
        }

        match self.capture.advance(true, self.advance_timeout_s) {
            Ok(true) => {}
            Ok(false) => {
                debug!("no frame within {} s, skipping tick", self.advance_timeout_s);
                return;
            }
            Err(e) => {
                error!("capture advance failed: {e}");
                return;
            }
        }
        match self.capture.retrieve(&mut self.frame) {
            Ok(true) => {}
            Ok(false) => {
                warn!("capture had no frame to retrieve, skipping tick");
                return;
            }
            Err(e) => {
                error!("capture retrieve failed: {e}");
                return;
            }
        }

        if self.frame_output_enabled {
            for sink in &mut self.frame_sinks {
                sink.emit_frame(&self.frame);
            }
        }

        if self.calibrating {
            let result = self.unprojector.calibrate(&self.frame);
            if result {
                info!("calibration succeeded");
            } else {
                warn!("calibration failed, keeping previous homography");
            }
            self.finish_calibration(result);
            self.flush_capture();
        } else {
            self.detector.detect_into(&self.frame, &mut self.points);
            self.unprojector.unproject_points(&mut self.points);
            self.filter.filter_points(&mut self.points);
            if self.point_output_enabled {
                for sink in &mut self.point_sinks {
                    sink.emit_points(&self.points);
                }
            }
        }
    }

    fn finish_calibration(&mut self, result: bool) {
        self.calibration_succeeded = result;
        self.calibrating = false;
        for listener in &mut self.listeners {
            listener.calibration_end(result);
        }
    }

    /// Drop frames buffered by the device by cycling the capture stream.
    fn flush_capture(&mut self) {
        if let Err(e) = self.capture.stop() {
            error!("could not stop capture for flush: {e}");
        }
        if let Err(e) = self.capture.start() {
            error!("could not restart capture after flush: {e}");
        }
    }
}
