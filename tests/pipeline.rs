//! End-to-end coverage: the pipeline fanning out over real sockets, and the
//! calibration flow driven through the control socket.

use std::io::{Read, Write};

use pointir::buffer::{Frame, Point, PointArray};
use pointir::calibration_store::CalibrationStore;
use pointir::capture::{Capture, CaptureError, TestPatternCapture};
use pointir::controller::{ControlAction, Controller, SocketController};
use pointir::detector::PointDetector;
use pointir::processor::Processor;
use pointir::sinks::{PointSink, SocketFrameSink, SocketPointSink};
use pointir::stream_server::connect;
use pointir::unprojector::Unprojector;

/// Serves the rendered calibration pattern forever.
struct PatternCapture {
    pattern: Frame,
    capturing: bool,
    advanced: bool,
}

impl PatternCapture {
    fn new(width: u32, height: u32) -> Self {
        let mut pattern = Frame::new();
        Unprojector::new().generate_calibration_image(&mut pattern, width, height);
        PatternCapture {
            pattern,
            capturing: false,
            advanced: false,
        }
    }
}

impl Capture for PatternCapture {
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
        self.advanced = self.capturing;
        Ok(self.advanced)
    }

    fn retrieve(&mut self, into: &mut Frame) -> Result<bool, CaptureError> {
        if !self.advanced {
            return Ok(false);
        }
        into.assign(self.pattern.width(), self.pattern.height(), self.pattern.data());
        Ok(true)
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }
}

#[test]
fn frames_and_points_reach_subscribers_in_tick_order() {
    let dir = tempfile::tempdir().unwrap();
    let frame_path = dir.path().join("video.socket");
    let point_path = dir.path().join("points.socket");

    let mut processor = Processor::new(
        Box::new(TestPatternCapture::new(64, 64)),
        PointDetector::new(),
        Unprojector::new(),
    );
    processor.add_frame_sink(Box::new(SocketFrameSink::bind(frame_path.clone()).unwrap()));
    processor.add_point_sink(Box::new(SocketPointSink::bind(point_path.clone()).unwrap()));

    let mut frame_client = connect(&frame_path).unwrap();
    let mut point_client = connect(&point_path).unwrap();

    processor.start();
    processor.tick();
    processor.tick();

    let mut packet = vec![0u8; 8 + 64 * 64];
    for _ in 0..2 {
        let n = frame_client.read(&mut packet).unwrap();
        assert_eq!(n, 8 + 64 * 64);
        assert_eq!(u32::from_le_bytes(packet[0..4].try_into().unwrap()), 64);
        assert_eq!(u32::from_le_bytes(packet[4..8].try_into().unwrap()), 64);
    }

    let mut packet = [0u8; 256];
    for _ in 0..2 {
        let n = point_client.read(&mut packet).unwrap();
        let count = u32::from_le_bytes(packet[0..4].try_into().unwrap());
        assert_eq!(n, 4 + count as usize * 8);
        assert_eq!(count, 1);
    }
}

#[test]
fn point_packet_wire_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.socket");
    let mut sink = SocketPointSink::bind(path.clone()).unwrap();
    let mut client = connect(&path).unwrap();

    let points: PointArray = vec![Point::new(0.25, 0.5), Point::new(0.75, 0.5)];
    sink.emit_points(&points);

    let mut packet = [0u8; 64];
    let n = client.read(&mut packet).unwrap();
    assert_eq!(n, 20);
    assert_eq!(u32::from_le_bytes(packet[0..4].try_into().unwrap()), 2);
    assert_eq!(f32::from_le_bytes(packet[4..8].try_into().unwrap()), 0.25);
    assert_eq!(f32::from_le_bytes(packet[8..12].try_into().unwrap()), 0.5);
    assert_eq!(f32::from_le_bytes(packet[12..16].try_into().unwrap()), 0.75);
    assert_eq!(f32::from_le_bytes(packet[16..20].try_into().unwrap()), 0.5);
}

#[test]
fn calibration_driven_over_the_control_socket() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path().to_path_buf());
    let mut controller = SocketController::bind(dir.path().join("ctl.socket")).unwrap();

    let mut processor = Processor::new(
        Box::new(PatternCapture::new(640, 480)),
        PointDetector::new(),
        Unprojector::new(),
    );
    processor.start();

    let mut client = connect(controller.path()).unwrap();
    let mut buf = [0u8; 256];

    client.write_all(b"calibrate").unwrap();
    assert_eq!(
        controller.dispatch(&mut processor, &store),
        ControlAction::Continue
    );
    assert!(processor.is_calibrating());

    processor.tick();
    controller.dispatch(&mut processor, &store);
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"1");
    assert!(processor.calibration_succeeded());
    assert!(!processor.is_calibrating());

    client.write_all(b"saveCalibrationData").unwrap();
    controller.dispatch(&mut processor, &store);
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ok");
    assert!(store.calibration_path().exists());

    client.write_all(b"shutdown").unwrap();
    assert_eq!(
        controller.dispatch(&mut processor, &store),
        ControlAction::Shutdown
    );
}

#[test]
fn reloaded_calibration_matches_the_saved_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path().to_path_buf());

    let mut pattern = Frame::new();
    let mut unprojector = Unprojector::new();
    unprojector.generate_calibration_image(&mut pattern, 640, 480);
    assert!(unprojector.calibrate(&pattern));
    store.save(&unprojector).unwrap();

    let mut restored = Unprojector::new();
    assert!(store.load(&mut restored));
    for (x, y) in [(12.0, 400.0), (320.0, 240.0), (639.0, 0.0)] {
        let mut a = Point::new(x, y);
        let mut b = Point::new(x, y);
        unprojector.unproject_point(&mut a);
        restored.unproject_point(&mut b);
        assert_eq!(a, b);
    }
}
