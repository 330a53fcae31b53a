//! Persistence of the calibration blob and the rendered calibration image.

use std::fs;
use std::io;
use std::path::PathBuf;

use log::{info, warn};
use thiserror::Error;

use crate::buffer::Frame;
use crate::unprojector::Unprojector;

const CALIBRATION_FILE_NAME: &str = "PointIR.calib";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("png encode: {0}")]
    Image(#[from] image::ImageError),
    #[error("calibration image dimensions {0}x{1} are invalid")]
    BadDimensions(u32, u32),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ImageOutcome {
    Written(PathBuf),
    /// An image of that size already exists and was left alone.
    Skipped(PathBuf),
}

/// Reads and writes `PointIR.calib` and `PointIR.<W>x<H>.png` in one
/// configured directory.
pub struct CalibrationStore {
    directory: PathBuf,
}

impl CalibrationStore {
    pub fn new(directory: PathBuf) -> Self {
        CalibrationStore { directory }
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.directory.join(CALIBRATION_FILE_NAME)
    }

    pub fn image_path(&self, width: u32, height: u32) -> PathBuf {
        self.directory.join(format!("PointIR.{width}x{height}.png"))
    }

    /// Load the stored calibration into the unprojector. A missing file is
    /// not an error; the unprojector keeps its identity.
    pub fn load(&self, unprojector: &mut Unprojector) -> bool {
        let path = self.calibration_path();
        let blob = match fs::read(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no calibration data at \"{}\"", path.display());
                return false;
            }
            Err(e) => {
                warn!("could not read \"{}\": {e}", path.display());
                return false;
            }
        };
        if unprojector.deserialize(&blob) {
            info!("loaded calibration data from \"{}\"", path.display());
            true
        } else {
            warn!(
                "calibration data in \"{}\" has the wrong size, ignoring it",
                path.display()
            );
            false
        }
    }

    /// Write the calibration blob, going through a temporary file so a crash
    /// mid-write cannot leave a truncated blob behind.
    pub fn save(&self, unprojector: &Unprojector) -> Result<(), StoreError> {
        let path = self.calibration_path();
        let staging = path.with_extension("calib.tmp");
        fs::write(&staging, unprojector.serialize())?;
        fs::rename(&staging, &path)?;
        info!("saved calibration data to \"{}\"", path.display());
        Ok(())
    }

    /// Render the calibration pattern to an 8-bit greyscale PNG. An already
    /// existing file is never overwritten.
    pub fn generate_image(
        &self,
        unprojector: &Unprojector,
        width: u32,
        height: u32,
    ) -> Result<ImageOutcome, StoreError> {
        let path = self.image_path(width, height);
        if path.exists() {
            info!("calibration image \"{}\" already exists", path.display());
            return Ok(ImageOutcome::Skipped(path));
        }

        let mut frame = Frame::new();
        unprojector.generate_calibration_image(&mut frame, width, height);
        let png = image::GrayImage::from_raw(width, height, frame.data().to_vec())
            .ok_or(StoreError::BadDimensions(width, height))?;
        png.save(&path)?;
        info!("saved calibration image to \"{}\"", path.display());
        Ok(ImageOutcome::Written(path))
    }
}
