//! Named constructors for the pluggable pipeline pieces. The registries are
//! the only place concrete variants are enumerated; everything else is
//! polymorphic over the component traits.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::warn;

use crate::capture::{CameraCapture, Capture, TestPatternCapture};
use crate::controller::{Controller, SocketController};
use crate::daemon_config::DaemonConfig;
use crate::detector::PointDetector;
use crate::processor::Processor;
use crate::sinks::{FrameSink, PointSink, SocketFrameSink, SocketPointSink, TrackingSink};
use crate::tracker::{HungarianTracker, SimpleTracker, Tracker};
use crate::unprojector::Unprojector;

type CaptureCtor = fn(&DaemonConfig) -> Result<Box<dyn Capture>>;
type DetectorCtor = fn(&DaemonConfig) -> Result<PointDetector>;
type UnprojectorCtor = fn(&DaemonConfig) -> Result<Unprojector>;
type TrackerCtor = fn(&DaemonConfig) -> Box<dyn Tracker>;
type FrameSinkCtor = fn(&DaemonConfig) -> Result<Box<dyn FrameSink>>;
type PointSinkCtor = fn(&Registries, &DaemonConfig) -> Result<Box<dyn PointSink>>;
type ControllerCtor = fn(&DaemonConfig) -> Result<Box<dyn Controller>>;

pub struct Registries {
    captures: IndexMap<&'static str, CaptureCtor>,
    detectors: IndexMap<&'static str, DetectorCtor>,
    unprojectors: IndexMap<&'static str, UnprojectorCtor>,
    trackers: IndexMap<&'static str, TrackerCtor>,
    frame_sinks: IndexMap<&'static str, FrameSinkCtor>,
    point_sinks: IndexMap<&'static str, PointSinkCtor>,
    controllers: IndexMap<&'static str, ControllerCtor>,
    default_tracker: &'static str,
}

impl Default for Registries {
    fn default() -> Self {
        Registries::new()
    }
}

impl Registries {
    pub fn new() -> Self {
        let mut captures: IndexMap<&'static str, CaptureCtor> = IndexMap::new();
        captures.insert("camera", |config| {
            let index = config.device_index()?;
            Ok(Box::new(CameraCapture::open(
                index,
                config.width,
                config.height,
                config.fps,
            )?))
        });
        captures.insert("test", |config| {
            Ok(Box::new(TestPatternCapture::new(config.width, config.height)))
        });

        let mut detectors: IndexMap<&'static str, DetectorCtor> = IndexMap::new();
        detectors.insert("contour", |config| {
            let mut detector = PointDetector::new();
            detector.set_intensity_threshold(config.intensity_threshold);
            detector.set_bounding_filter_enabled(config.bounding_filter);
            detector.set_bounding_sizes(config.min_bounding_size, config.max_bounding_size);
            Ok(detector)
        });

        let mut unprojectors: IndexMap<&'static str, UnprojectorCtor> = IndexMap::new();
        unprojectors.insert("auto", |_| Ok(Unprojector::new()));

        let mut trackers: IndexMap<&'static str, TrackerCtor> = IndexMap::new();
        trackers.insert("simple", |config| {
            Box::new(SimpleTracker::with_max_id(config.max_contact_id))
        });
        trackers.insert("hungarian", |config| {
            Box::new(HungarianTracker::with_max_id(config.max_contact_id))
        });

        let mut frame_sinks: IndexMap<&'static str, FrameSinkCtor> = IndexMap::new();
        frame_sinks.insert("socket", |config| {
            Ok(Box::new(SocketFrameSink::bind(config.frame_socket_path())?))
        });

        let mut point_sinks: IndexMap<&'static str, PointSinkCtor> = IndexMap::new();
        point_sinks.insert("socket", |_, config| {
            Ok(Box::new(SocketPointSink::bind(config.point_socket_path())?))
        });
        point_sinks.insert("track", |registries, config| {
            Ok(Box::new(TrackingSink::new(
                registries.make_tracker(&config.tracker, config),
            )))
        });

        let mut controllers: IndexMap<&'static str, ControllerCtor> = IndexMap::new();
        controllers.insert("socket", |config| {
            Ok(Box::new(SocketController::bind(config.control_socket_path())?))
        });

        Registries {
            captures,
            detectors,
            unprojectors,
            trackers,
            frame_sinks,
            point_sinks,
            controllers,
            default_tracker: "simple",
        }
    }

    pub fn make_capture(&self, name: &str, config: &DaemonConfig) -> Result<Box<dyn Capture>> {
        let ctor = self
            .captures
            .get(name)
            .with_context(|| format!("unknown capture \"{name}\", expected one of {:?}", self.capture_names()))?;
        ctor(config)
    }

    pub fn make_detector(&self, name: &str, config: &DaemonConfig) -> Result<PointDetector> {
        let ctor = self.detectors.get(name).with_context(|| {
            format!(
                "unknown detector \"{name}\", expected one of {:?}",
                self.detectors.keys().collect::<Vec<_>>()
            )
        })?;
        ctor(config)
    }

    pub fn make_unprojector(&self, name: &str, config: &DaemonConfig) -> Result<Unprojector> {
        let ctor = self.unprojectors.get(name).with_context(|| {
            format!(
                "unknown unprojector \"{name}\", expected one of {:?}",
                self.unprojectors.keys().collect::<Vec<_>>()
            )
        })?;
        ctor(config)
    }

    /// Unknown tracker names warn and fall back to the default.
    pub fn make_tracker(&self, name: &str, config: &DaemonConfig) -> Box<dyn Tracker> {
        match self.trackers.get(name) {
            Some(ctor) => ctor(config),
            None => {
                warn!(
                    "unknown tracker \"{name}\", using \"{}\"",
                    self.default_tracker
                );
                self.trackers[self.default_tracker](config)
            }
        }
    }

    pub fn make_controller(&self, name: &str, config: &DaemonConfig) -> Result<Box<dyn Controller>> {
        let ctor = self.controllers.get(name).with_context(|| {
            format!(
                "unknown controller \"{name}\", expected one of {:?}",
                self.controllers.keys().collect::<Vec<_>>()
            )
        })?;
        ctor(config)
    }

    /// Attach the frame and/or point sinks registered under `name`; a name
    /// found in neither registry is a configuration error.
    pub fn add_outputs(
        &self,
        processor: &mut Processor,
        name: &str,
        config: &DaemonConfig,
    ) -> Result<()> {
        let mut found = false;
        if let Some(ctor) = self.point_sinks.get(name) {
            processor.add_point_sink(ctor(self, config)?);
            found = true;
        }
        if let Some(ctor) = self.frame_sinks.get(name) {
            processor.add_frame_sink(ctor(config)?);
            found = true;
        }
        if !found {
            bail!(
                "unknown output \"{name}\", expected one of {:?}",
                self.output_names()
            );
        }
        Ok(())
    }

    pub fn capture_names(&self) -> Vec<&'static str> {
        self.captures.keys().copied().collect()
    }

    pub fn output_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.point_sinks.keys().copied().collect();
        for name in self.frame_sinks.keys() {
            if !names.contains(name) {
                names.push(name);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            capture: String::from("test"),
            data_directory: dir.to_path_buf(),
            socket_directory: dir.to_path_buf(),
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn known_names_construct() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registries = Registries::new();

        assert!(registries.make_capture("test", &config).is_ok());
        assert!(registries.make_detector("contour", &config).is_ok());
        assert!(registries.make_unprojector("auto", &config).is_ok());
        assert!(registries.make_controller("socket", &config).is_ok());

        let mut processor = Processor::new(
            registries.make_capture("test", &config).unwrap(),
            registries.make_detector("contour", &config).unwrap(),
            registries.make_unprojector("auto", &config).unwrap(),
        );
        registries
            .add_outputs(&mut processor, "socket", &config)
            .unwrap();
        registries
            .add_outputs(&mut processor, "track", &config)
            .unwrap();
    }

    #[test]
    fn unknown_names_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registries = Registries::new();

        assert!(registries.make_capture("nope", &config).is_err());
        assert!(registries.make_detector("nope", &config).is_err());
        assert!(registries.make_controller("nope", &config).is_err());

        let mut processor = Processor::new(
            registries.make_capture("test", &config).unwrap(),
            PointDetector::new(),
            Unprojector::new(),
        );
        assert!(registries
            .add_outputs(&mut processor, "nope", &config)
            .is_err());
    }

    #[test]
    fn unknown_tracker_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registries = Registries::new();
        // must not panic, and must produce a working tracker
        let mut tracker = registries.make_tracker("nope", &config);
        let out = tracker.assign_ids(&[crate::buffer::Point::new(0.5, 0.5)]);
        assert_eq!(out.current_ids, vec![0]);
    }
}
