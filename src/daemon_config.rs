//! The one configuration struct everything is constructed from; assembled
//! by the CLI, with defaults matching an unattended daemon start.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detector::{
    DEFAULT_INTENSITY_THRESHOLD, DEFAULT_MAX_BOUNDING_SIZE, DEFAULT_MIN_BOUNDING_SIZE,
};
use crate::filter::DEFAULT_OFFSCREEN_TOLERANCE;
use crate::processor::DEFAULT_ADVANCE_TIMEOUT_S;

const FRAME_SOCKET_NAME: &str = "PointIR.video.socket";
const POINT_SOCKET_NAME: &str = "PointIR.points.socket";
const CONTROL_SOCKET_NAME: &str = "PointIR.ctl.socket";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Camera device path (`/dev/videoN`) or bare index
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub capture: String,
    pub outputs: Vec<String>,
    pub controllers: Vec<String>,
    pub tracker: String,
    pub intensity_threshold: u8,
    pub bounding_filter: bool,
    pub min_bounding_size: f32,
    pub max_bounding_size: f32,
    /// Cap on simultaneously reported contacts; `None` reports all
    pub point_limit: Option<usize>,
    pub offscreen_tolerance: f32,
    pub max_contact_id: i32,
    pub advance_timeout_s: f32,
    /// Where the calibration blob and calibration images live
    pub data_directory: PathBuf,
    /// Where the stream and control sockets live
    pub socket_directory: PathBuf,
    pub calibration_begin_hook: Option<String>,
    pub calibration_end_hook: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            device: String::from("/dev/video0"),
            width: 320,
            height: 240,
            fps: 30.0,
            capture: String::from("camera"),
            outputs: vec![String::from("socket")],
            controllers: vec![String::from("socket")],
            tracker: String::from("simple"),
            intensity_threshold: DEFAULT_INTENSITY_THRESHOLD,
            bounding_filter: true,
            min_bounding_size: DEFAULT_MIN_BOUNDING_SIZE,
            max_bounding_size: DEFAULT_MAX_BOUNDING_SIZE,
            point_limit: None,
            offscreen_tolerance: DEFAULT_OFFSCREEN_TOLERANCE,
            max_contact_id: i32::MAX,
            advance_timeout_s: DEFAULT_ADVANCE_TIMEOUT_S,
            data_directory: PathBuf::from("/tmp"),
            socket_directory: PathBuf::from("/tmp"),
            calibration_begin_hook: None,
            calibration_end_hook: None,
        }
    }
}

impl DaemonConfig {
    pub fn frame_socket_path(&self) -> PathBuf {
        self.socket_directory.join(FRAME_SOCKET_NAME)
    }

    pub fn point_socket_path(&self) -> PathBuf {
        self.socket_directory.join(POINT_SOCKET_NAME)
    }

    pub fn control_socket_path(&self) -> PathBuf {
        self.socket_directory.join(CONTROL_SOCKET_NAME)
    }

    /// `/dev/video2` and `2` both name camera index 2.
    pub fn device_index(&self) -> Result<u32> {
        let digits: String = self
            .device
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits
            .parse()
            .map_err(|_| anyhow!("cannot derive a camera index from \"{}\"", self.device))
    }
}
