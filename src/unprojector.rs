//! Homography-based unprojection from camera pixels to normalized surface
//! coordinates, calibrated from a projected chessboard pattern.

use log::{info, warn};
use nalgebra::Matrix3;

use crate::buffer::{Frame, Point, PointArray};
use crate::chessboard::find_chessboard_corners;
use crate::homography::{estimate_homography, warp_perspective, Homography};

const CHESSBOARD_FIELDS_X: u32 = 10;
const CHESSBOARD_FIELDS_Y: u32 = 7;
const CHESSBOARD_CORNERS_X: u32 = CHESSBOARD_FIELDS_X - 1;
const CHESSBOARD_CORNERS_Y: u32 = CHESSBOARD_FIELDS_Y - 1;
const CHESSBOARD_BORDER: f32 = 0.01;
const MIRROR_MARK_BORDER: f32 = 0.03;

/// Greyscale value above which the mirror-marker sample counts as white,
/// i.e. the black mark is not where the unmirrored pattern puts it.
const MIRROR_MARK_WHITE: u8 = 0x3f;

/// Serialized calibration: u32 width, u32 height, 9 × f64 matrix elements.
const CALIBRATION_BLOB_LEN: usize = 4 + 4 + 9 * 8;

/// Maps camera pixels to surface coordinates through a 3×3 perspective
/// transform solved from a detected calibration pattern.
///
/// The stored homography acts on pixel coordinates of the calibrated
/// resolution; the normalized variant (pixels to the unit square) is derived
/// on demand. An uncalibrated unprojector is the identity.
pub struct Unprojector {
    width: u32,
    height: u32,
    perspective: Homography,
}

impl Default for Unprojector {
    fn default() -> Self {
        Unprojector::new()
    }
}

impl Unprojector {
    pub fn new() -> Self {
        Unprojector {
            width: 0,
            height: 0,
            perspective: Homography::identity(),
        }
    }

    /// The pixel-to-unit-square matrix `diag(1/w, 1/h, 1) · H`.
    fn normalized(&self) -> Homography {
        if self.width == 0 || self.height == 0 {
            return self.perspective;
        }
        self.perspective
            .scaled(1.0 / self.width as f64, 1.0 / self.height as f64)
    }

    /// Render the calibration pattern: a 10×7 field chessboard inset by a 1 %
    /// border on white, with a black mirror mark in the bottom-right cell.
    pub fn generate_calibration_image(&self, into: &mut Frame, width: u32, height: u32) {
        into.resize(width, height);
        into.fill(0xff);

        let board_x = (width as f32 * CHESSBOARD_BORDER) as u32;
        let board_y = (height as f32 * CHESSBOARD_BORDER) as u32;
        let board_width = (width as f32 * (1.0 - 2.0 * CHESSBOARD_BORDER)) as u32;
        let board_height = (height as f32 * (1.0 - 2.0 * CHESSBOARD_BORDER)) as u32;

        draw_chessboard(
            into,
            board_x,
            board_y,
            board_width,
            board_height,
            CHESSBOARD_FIELDS_X,
            CHESSBOARD_FIELDS_Y,
        );

        // the mirror mark fills the bottom-right field, inset a further 3 %
        let mark_width =
            (board_width as f32 / CHESSBOARD_FIELDS_X as f32 - MIRROR_MARK_BORDER * width as f32) as u32;
        let mark_height = (board_height as f32 / CHESSBOARD_FIELDS_Y as f32
            - MIRROR_MARK_BORDER * height as f32) as u32;
        let mark_x = board_x + board_width - mark_width;
        let mark_y = board_y + board_height - mark_height;
        draw_quad(into, mark_x, mark_y, mark_width, mark_height, 0x00);
    }

    /// Solve the homography from a captured calibration frame.
    ///
    /// Returns `false` and leaves the current calibration untouched when the
    /// interior corner grid cannot be found or the solve fails.
    pub fn calibrate(&mut self, frame: &Frame) -> bool {
        let width = frame.width();
        let height = frame.height();
        if width == 0 || height == 0 {
            return false;
        }

        // ideal corner positions, in the same object space the pattern was
        // rendered in
        let offset_x = width as f32 * CHESSBOARD_BORDER;
        let offset_y = height as f32 * CHESSBOARD_BORDER;
        let board_width = width as f32 * (1.0 - 2.0 * CHESSBOARD_BORDER);
        let board_height = height as f32 * (1.0 - 2.0 * CHESSBOARD_BORDER);

        let mut object_points = Vec::with_capacity((CHESSBOARD_CORNERS_X * CHESSBOARD_CORNERS_Y) as usize);
        for h in 1..=CHESSBOARD_CORNERS_Y {
            for w in 1..=CHESSBOARD_CORNERS_X {
                object_points.push(Point::new(
                    offset_x + board_width * w as f32 / CHESSBOARD_FIELDS_X as f32,
                    offset_y + board_height * h as f32 / CHESSBOARD_FIELDS_Y as f32,
                ));
            }
        }

        let image_points = match find_chessboard_corners(
            frame,
            CHESSBOARD_CORNERS_X as usize,
            CHESSBOARD_CORNERS_Y as usize,
        ) {
            Some(points) => points,
            None => return false,
        };

        let mut perspective = match estimate_homography(&image_points, &object_points) {
            Some(h) => h,
            None => return false,
        };

        let inverse = match perspective.inverse() {
            Some(inv) => inv,
            None => return false,
        };

        // sample where the mirror mark should be; a white reading means the
        // capture is flipped
        let mark_object = Point::new(
            offset_x + board_width * (1.0 - 1.0 / (3.0 * CHESSBOARD_FIELDS_X as f32)),
            offset_y + board_height * (1.0 - 1.0 / (3.0 * CHESSBOARD_FIELDS_Y as f32)),
        );
        let mark_image = inverse.transform(mark_object);
        let mut mirrored = false;
        if mark_image.x < 0.0
            || mark_image.x as i32 >= width as i32
            || mark_image.y < 0.0
            || mark_image.y as i32 >= height as i32
        {
            warn!("mirror marker outside of captured image, assuming no mirror");
        } else {
            mirrored = frame.at(mark_image.x as u32, mark_image.y as u32) > MIRROR_MARK_WHITE;
        }
        if mirrored {
            info!("mirrored capture detected, flipping calibration");
            let flip = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, height as f64, 0.0, 0.0, 1.0);
            perspective = perspective.pre_composed(flip);
        }

        self.perspective = perspective;
        self.width = width;
        self.height = height;
        true
    }

    /// Warp a frame into its rectified form at the same resolution.
    pub fn unproject_frame(&self, frame: &mut Frame) {
        if frame.is_empty() {
            return;
        }
        let pixel_h = self
            .normalized()
            .scaled(frame.width() as f64, frame.height() as f64);
        match pixel_h.inverse() {
            Some(inv) => warp_perspective(frame, &inv),
            None => warn!("perspective matrix is singular, skipping frame warp"),
        }
    }

    /// Map one pixel-space point to normalized surface coordinates.
    pub fn unproject_point(&self, point: &mut Point) {
        *point = self.normalized().transform(*point);
    }

    /// Map every point of a detection result to normalized coordinates.
    pub fn unproject_points(&self, points: &mut PointArray) {
        let normalized = self.normalized();
        for point in points.iter_mut() {
            *point = normalized.transform(*point);
        }
    }

    /// Pack the calibration into its on-disk blob.
    pub fn serialize(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(CALIBRATION_BLOB_LEN);
        blob.extend_from_slice(&self.width.to_le_bytes());
        blob.extend_from_slice(&self.height.to_le_bytes());
        for element in self.perspective.to_row_array() {
            blob.extend_from_slice(&element.to_le_bytes());
        }
        blob
    }

    /// Restore a calibration blob; rejects anything but the exact layout.
    pub fn deserialize(&mut self, blob: &[u8]) -> bool {
        if blob.len() != CALIBRATION_BLOB_LEN {
            return false;
        }
        let width = u32::from_le_bytes(blob[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(blob[4..8].try_into().unwrap());
        let mut elements = [0.0f64; 9];
        for (i, element) in elements.iter_mut().enumerate() {
            let offset = 8 + i * 8;
            *element = f64::from_le_bytes(blob[offset..offset + 8].try_into().unwrap());
        }
        self.width = width;
        self.height = height;
        self.perspective = Homography::from_row_slice(&elements);
        true
    }

    pub fn calibrated_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn draw_chessboard(
    frame: &mut Frame,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    fields_x: u32,
    fields_y: u32,
) {
    let pixels_per_field_x = width as f32 / fields_x as f32;
    let pixels_per_field_y = height as f32 / fields_y as f32;
    for h in 0..height {
        for w in 0..width {
            let field_x = (w as f32 / pixels_per_field_x) as u32;
            let field_y = (h as f32 / pixels_per_field_y) as u32;
            let is_white = (field_x + field_y) & 1 == 1;
            frame.set(x + w, y + h, if is_white { 0xff } else { 0x00 });
        }
    }
}

fn draw_quad(frame: &mut Frame, x: u32, y: u32, width: u32, height: u32, tone: u8) {
    for h in 0..height {
        for w in 0..width {
            frame.set(x + w, y + h, tone);
        }
    }
}
