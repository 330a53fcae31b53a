use clap::{command, Parser};

// Some defaults; all of them can be overridden via CLI args
const DEVICE: &str = "/dev/video0";
const DATA_DIRECTORY: &str = "/tmp";
const SOCKET_DIRECTORY: &str = "/tmp";

#[derive(Parser, Debug)]
#[command(version, about = "PointIR daemon: detects bright spots in a video stream and publishes them as touch contacts", long_about = None)]
pub struct Cli {
    /// Camera device
    #[arg(short = 'd', long = "device", default_value_t = String::from(DEVICE))]
    pub device: String,

    /// Width of the captured video stream
    #[arg(long = "width", default_value_t = 320)]
    pub width: u32,

    /// Height of the captured video stream
    #[arg(long = "height", default_value_t = 240)]
    pub height: u32,

    /// Frame rate of the captured video stream
    #[arg(long = "fps", default_value_t = 30.0)]
    pub fps: f32,

    /// Which capture implementation to use
    #[arg(long = "capture", default_value_t = String::from("camera"))]
    pub capture: String,

    /// Output(s) to attach; repeatable
    #[arg(short = 'o', long = "output")]
    pub outputs: Vec<String>,

    /// Controller(s) to attach; repeatable
    #[arg(long = "controller")]
    pub controllers: Vec<String>,

    /// Tracker used by tracking outputs
    #[arg(long = "tracker", default_value_t = String::from("simple"))]
    pub tracker: String,

    /// Greyscale threshold separating touches from background
    #[arg(long = "intensityThreshold", default_value_t = 127)]
    pub intensity_threshold: u8,

    /// Report at most this many contacts per frame
    #[arg(long = "pointLimit")]
    pub point_limit: Option<usize>,

    /// Shell command to run when calibration begins
    #[arg(long = "calibBeginHook")]
    pub calib_begin_hook: Option<String>,

    /// Shell command to run when calibration ends; receives 1 or 0
    #[arg(long = "calibEndHook")]
    pub calib_end_hook: Option<String>,

    /// Where calibration data and calibration images are stored
    #[arg(long = "dataDir", default_value_t = String::from(DATA_DIRECTORY))]
    pub data_directory: String,

    /// Where the stream and control sockets are created
    #[arg(long = "socketDir", default_value_t = String::from(SOCKET_DIRECTORY))]
    pub socket_directory: String,

    #[arg(long = "loglevel", default_value_t = String::from("info"))]
    pub log_level: String,
}
