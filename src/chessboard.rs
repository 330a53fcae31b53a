//! Chessboard interior-corner detection for calibration captures.
//!
//! Corners are located with the ChESS response (16-sample ring, radius 5)
//! followed by non-maximum suppression and 5×5 center-of-mass refinement,
//! then assembled into a row-major grid of the requested size.

use crate::buffer::{Frame, Point};

/// 16 ring offsets, clockwise from the top; the FAST-16 pattern at radius 5.
const CORNER_RING: [(i32, i32); 16] = [
    (0, -5),
    (2, -5),
    (3, -3),
    (5, -2),
    (5, 0),
    (5, 2),
    (3, 3),
    (2, 5),
    (0, 5),
    (-2, 5),
    (-3, 3),
    (-5, 2),
    (-5, 0),
    (-5, -2),
    (-3, -3),
    (-2, -5),
];

const RING_RADIUS: i32 = 5;
const NMS_RADIUS: i32 = 2;
const REFINE_RADIUS: i32 = 2;

/// Fraction of the strongest response a peak must reach to count as a corner.
const THRESHOLD_REL: f32 = 0.2;

#[derive(Clone, Copy, Debug)]
struct CornerCandidate {
    x: f32,
    y: f32,
    strength: f32,
}

#[inline]
fn response_at(data: &[u8], w: usize, x: i32, y: i32) -> f32 {
    let mut s = [0i32; 16];
    for (k, (dx, dy)) in CORNER_RING.iter().enumerate() {
        let xx = (x + dx) as usize;
        let yy = (y + dy) as usize;
        s[k] = data[yy * w + xx] as i32;
    }

    // sum response: opposite quadrant pairs agree at a checker corner
    let mut sr = 0i32;
    for k in 0..4 {
        let a = s[k] + s[k + 8];
        let b = s[k + 4] + s[k + 12];
        sr += (a - b).abs();
    }

    // diff response: penalizes edges, where opposite samples disagree
    let mut dr = 0i32;
    for k in 0..8 {
        dr += (s[k] - s[k + 8]).abs();
    }

    // mean response: penalizes plain bright or dark patches
    let sum_ring: i32 = s.iter().sum();
    let mu_n = sum_ring as f32 / 16.0;
    let c = data[y as usize * w + x as usize] as f32;
    let n = data[(y - 1) as usize * w + x as usize] as f32;
    let s0 = data[(y + 1) as usize * w + x as usize] as f32;
    let e = data[y as usize * w + (x + 1) as usize] as f32;
    let w0 = data[y as usize * w + (x - 1) as usize] as f32;
    let mu_l = (c + n + s0 + e + w0) / 5.0;
    let mr = (mu_n - mu_l).abs();

    sr as f32 - dr as f32 - 16.0 * mr
}

fn compute_response(frame: &Frame) -> Vec<f32> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let r = RING_RADIUS as usize;
    let mut resp = vec![0.0f32; w * h];
    if w <= 2 * r || h <= 2 * r {
        return resp;
    }
    let data = frame.data();
    for y in r..h - r {
        for x in r..w - r {
            resp[y * w + x] = response_at(data, w, x as i32, y as i32);
        }
    }
    resp
}

fn is_local_max(resp: &[f32], w: usize, h: usize, x: usize, y: usize, v: f32) -> bool {
    for dy in -NMS_RADIUS..=NMS_RADIUS {
        for dx in -NMS_RADIUS..=NMS_RADIUS {
            if dx == 0 && dy == 0 {
                continue;
            }
            let xx = x as i32 + dx;
            let yy = y as i32 + dy;
            if xx < 0 || yy < 0 || xx >= w as i32 || yy >= h as i32 {
                continue;
            }
            let neighbor = resp[yy as usize * w + xx as usize];
            // ties go to the first pixel in scan order, so a flat plateau
            // yields exactly one peak
            if neighbor > v || (neighbor == v && (dy < 0 || (dy == 0 && dx < 0))) {
                return false;
            }
        }
    }
    true
}

/// 5×5 center-of-mass refinement around an integer peak, weighting only
/// non-negative responses so the sidelobes do not bias the estimate.
fn refine_peak(resp: &[f32], w: usize, h: usize, x: usize, y: usize) -> (f32, f32) {
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sw = 0.0;
    for dy in -REFINE_RADIUS..=REFINE_RADIUS {
        for dx in -REFINE_RADIUS..=REFINE_RADIUS {
            let xx = (x as i32 + dx).clamp(0, w as i32 - 1) as usize;
            let yy = (y as i32 + dy).clamp(0, h as i32 - 1) as usize;
            let weight = resp[yy * w + xx].max(0.0);
            sx += xx as f32 * weight;
            sy += yy as f32 * weight;
            sw += weight;
        }
    }
    if sw > 0.0 {
        (sx / sw, sy / sw)
    } else {
        (x as f32, y as f32)
    }
}

fn find_corner_candidates(frame: &Frame) -> Vec<CornerCandidate> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let resp = compute_response(frame);

    let mut max_r = f32::NEG_INFINITY;
    for &v in &resp {
        if v > max_r {
            max_r = v;
        }
    }
    if !max_r.is_finite() || max_r <= 0.0 {
        return Vec::new();
    }
    let thr = THRESHOLD_REL * max_r;

    let border = (RING_RADIUS + NMS_RADIUS + REFINE_RADIUS) as usize;
    if w <= 2 * border || h <= 2 * border {
        return Vec::new();
    }

    let mut corners = Vec::new();
    for y in border..h - border {
        for x in border..w - border {
            let v = resp[y * w + x];
            if v < thr || !is_local_max(&resp, w, h, x, y, v) {
                continue;
            }
            let (sx, sy) = refine_peak(&resp, w, h, x, y);
            corners.push(CornerCandidate {
                x: sx,
                y: sy,
                strength: v,
            });
        }
    }
    corners
}

/// Principal axis of a point cloud, as a unit vector.
fn principal_axis(points: &[CornerCandidate]) -> (f32, f32) {
    let n = points.len() as f32;
    let mut mx = 0.0;
    let mut my = 0.0;
    for p in points {
        mx += p.x;
        my += p.y;
    }
    mx /= n;
    my /= n;

    let mut cxx = 0.0;
    let mut cyy = 0.0;
    let mut cxy = 0.0;
    for p in points {
        let dx = p.x - mx;
        let dy = p.y - my;
        cxx += dx * dx;
        cyy += dy * dy;
        cxy += dx * dy;
    }

    let theta = 0.5 * (2.0 * cxy).atan2(cxx - cyy);
    (theta.cos(), theta.sin())
}

/// Assemble detected corners into a `cols`×`rows` grid in row-major order.
///
/// The strongest `cols*rows` candidates are projected onto the cloud's
/// principal axes; rows are split along the minor axis and must not overlap,
/// which rejects captures where the board is rotated out of the expected
/// orientation or partially occluded.
fn order_grid(mut corners: Vec<CornerCandidate>, cols: usize, rows: usize) -> Option<Vec<Point>> {
    let expected = cols * rows;
    if corners.len() < expected {
        return None;
    }
    corners.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    corners.truncate(expected);

    let (ux, uy) = principal_axis(&corners);
    // minor axis, oriented so that row order matches image top-to-bottom
    let (mut vx, mut vy) = (-uy, ux);
    if vy < 0.0 {
        vx = -vx;
        vy = -vy;
    }
    // major axis oriented left-to-right
    let (ux, uy) = if ux < 0.0 { (-ux, -uy) } else { (ux, uy) };

    corners.sort_by(|a, b| (a.x * vx + a.y * vy).total_cmp(&(b.x * vx + b.y * vy)));

    let mut grid = Vec::with_capacity(expected);
    for r in 0..rows {
        let mut row: Vec<&CornerCandidate> = corners[r * cols..(r + 1) * cols].iter().collect();

        // adjacent row bands may not overlap along the minor axis
        if r + 1 < rows {
            let band_max = row
                .iter()
                .map(|p| p.x * vx + p.y * vy)
                .fold(f32::NEG_INFINITY, f32::max);
            let next_min = corners[(r + 1) * cols..(r + 2) * cols]
                .iter()
                .map(|p| p.x * vx + p.y * vy)
                .fold(f32::INFINITY, f32::min);
            if band_max >= next_min {
                return None;
            }
        }

        row.sort_by(|a, b| (a.x * ux + a.y * uy).total_cmp(&(b.x * ux + b.y * uy)));
        grid.extend(row.into_iter().map(|p| Point::new(p.x, p.y)));
    }
    Some(grid)
}

/// Find the interior corners of a `cols`×`rows` chessboard pattern, returned
/// row-major (top-to-bottom, left-to-right). `None` when the grid cannot be
/// established.
pub fn find_chessboard_corners(frame: &Frame, cols: usize, rows: usize) -> Option<Vec<Point>> {
    if frame.is_empty() {
        return None;
    }
    order_grid(find_corner_candidates(frame), cols, rows)
}
