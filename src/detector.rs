//! Bright-blob detection: threshold the frame, walk the outline of every
//! connected component and emit one centroid per blob.

use crate::buffer::{Frame, Point, PointArray};

pub const DEFAULT_INTENSITY_THRESHOLD: u8 = 127;
pub const DEFAULT_MIN_BOUNDING_SIZE: f32 = 0.0002;
pub const DEFAULT_MAX_BOUNDING_SIZE: f32 = 0.125;

/// 8-neighborhood, clockwise starting east.
const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

pub struct PointDetector {
    intensity_threshold: u8,
    bounding_filter_enabled: bool,
    min_bounding_size: f32,
    max_bounding_size: f32,
    mask: Vec<u8>,
    labeled: Vec<bool>,
    fill_queue: Vec<(i32, i32)>,
}

impl Default for PointDetector {
    fn default() -> Self {
        PointDetector::new()
    }
}

impl PointDetector {
    pub fn new() -> Self {
        PointDetector {
            intensity_threshold: DEFAULT_INTENSITY_THRESHOLD,
            bounding_filter_enabled: false,
            min_bounding_size: DEFAULT_MIN_BOUNDING_SIZE,
            max_bounding_size: DEFAULT_MAX_BOUNDING_SIZE,
            mask: Vec::new(),
            labeled: Vec::new(),
            fill_queue: Vec::new(),
        }
    }

    pub fn set_intensity_threshold(&mut self, threshold: u8) {
        self.intensity_threshold = threshold;
    }

    pub fn intensity_threshold(&self) -> u8 {
        self.intensity_threshold
    }

    pub fn set_bounding_filter_enabled(&mut self, enabled: bool) {
        self.bounding_filter_enabled = enabled;
    }

    pub fn set_bounding_sizes(&mut self, min_size: f32, max_size: f32) {
        self.min_bounding_size = min_size;
        self.max_bounding_size = max_size;
    }

    /// Detect blobs in `frame` and append one centroid per accepted blob.
    /// Coordinates are in source-pixel space; an empty mask yields an empty
    /// result.
    pub fn detect_into(&mut self, frame: &Frame, points: &mut PointArray) {
        points.clear();
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        if width == 0 || height == 0 {
            return;
        }

        self.mask.clear();
        self.mask.reserve(width * height);
        for &pixel in frame.data() {
            self.mask
                .push(if pixel >= self.intensity_threshold { 1 } else { 0 });
        }
        self.labeled.clear();
        self.labeled.resize(width * height, false);

        // pixel sizes the bounding gate accepts, each at least one pixel
        let average_size = (frame.width() + frame.height()) as f32 / 2.0;
        let min_size = (self.min_bounding_size * average_size).max(1.0);
        let max_size = (self.max_bounding_size * average_size).max(1.0);

        for y in 0..height {
            for x in 0..width {
                let index = y * width + x;
                if self.mask[index] == 0 || self.labeled[index] {
                    continue;
                }

                self.flood_label(x as i32, y as i32, width, height);
                let outline = trace_outline(&self.mask, width, height, x as i32, y as i32);

                let mut sum_x = 0.0f32;
                let mut sum_y = 0.0f32;
                let mut min_x = f32::MAX;
                let mut min_y = f32::MAX;
                let mut max_x = f32::MIN;
                let mut max_y = f32::MIN;
                for &(vx, vy) in &outline {
                    let fx = vx as f32;
                    let fy = vy as f32;
                    sum_x += fx;
                    sum_y += fy;
                    min_x = min_x.min(fx);
                    min_y = min_y.min(fy);
                    max_x = max_x.max(fx);
                    max_y = max_y.max(fy);
                }

                if self.bounding_filter_enabled {
                    let box_x = max_x - min_x + 1.0;
                    let box_y = max_y - min_y + 1.0;
                    if box_x > max_size || box_y > max_size || box_x < min_size || box_y < min_size
                    {
                        continue;
                    }
                }

                let count = outline.len() as f32;
                points.push(Point::new(sum_x / count, sum_y / count));
            }
        }
    }

    fn flood_label(&mut self, sx: i32, sy: i32, width: usize, height: usize) {
        self.fill_queue.clear();
        self.fill_queue.push((sx, sy));
        self.labeled[sy as usize * width + sx as usize] = true;
        while let Some((x, y)) = self.fill_queue.pop() {
            for (dx, dy) in DIRS {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                    continue;
                }
                let index = ny as usize * width + nx as usize;
                if self.mask[index] != 0 && !self.labeled[index] {
                    self.labeled[index] = true;
                    self.fill_queue.push((nx, ny));
                }
            }
        }
    }
}

#[inline]
fn foreground(mask: &[u8], width: usize, height: usize, x: i32, y: i32) -> bool {
    x >= 0 && y >= 0 && x < width as i32 && y < height as i32 && mask[y as usize * width + x as usize] != 0
}

fn scan_clockwise(
    mask: &[u8],
    width: usize,
    height: usize,
    from: (i32, i32),
    backtrack: usize,
) -> Option<((i32, i32), usize)> {
    for k in 1..=8 {
        let dir = (backtrack + k) % 8;
        let next = (from.0 + DIRS[dir].0, from.1 + DIRS[dir].1);
        if foreground(mask, width, height, next.0, next.1) {
            return Some((next, dir));
        }
    }
    None
}

/// Moore-neighbor boundary walk around the component whose raster-first pixel
/// is `(sx, sy)`. Returns every boundary pixel in walk order; thin appendages
/// are visited twice, matching the outline-vertex convention the centroid is
/// defined over.
fn trace_outline(mask: &[u8], width: usize, height: usize, sx: i32, sy: i32) -> Vec<(i32, i32)> {
    let start = (sx, sy);
    // the raster-first pixel has no foreground neighbor above or to the left,
    // so entering "from the west" gives a well-defined first sweep
    let Some((first, first_dir)) = scan_clockwise(mask, width, height, start, 4) else {
        return vec![start];
    };
    let initial = (first, (first_dir + 4) % 8);

    let mut outline = vec![start];
    let mut state = initial;
    let step_limit = 4 * width * height;
    for _ in 0..step_limit {
        let (current, backtrack) = state;
        if current != start {
            outline.push(current);
        }
        let Some((next, dir)) = scan_clockwise(mask, width, height, current, backtrack) else {
            break;
        };
        state = (next, (dir + 4) % 8);
        if state == initial {
            break;
        }
    }
    outline
}
