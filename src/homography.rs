use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::buffer::{Frame, Point};

/// A 3×3 projective transform over pixel coordinates, stored row-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    h: Matrix3<f64>,
}

impl Default for Homography {
    fn default() -> Self {
        Homography::identity()
    }
}

impl Homography {
    pub fn identity() -> Self {
        Homography {
            h: Matrix3::identity(),
        }
    }

    pub fn new(h: Matrix3<f64>) -> Self {
        Homography { h }
    }

    pub fn from_row_slice(elements: &[f64; 9]) -> Self {
        Homography {
            h: Matrix3::from_row_slice(elements),
        }
    }

    pub fn to_row_array(&self) -> [f64; 9] {
        [
            self.h[(0, 0)],
            self.h[(0, 1)],
            self.h[(0, 2)],
            self.h[(1, 0)],
            self.h[(1, 1)],
            self.h[(1, 2)],
            self.h[(2, 0)],
            self.h[(2, 1)],
            self.h[(2, 2)],
        ]
    }

    /// Left-multiply by a diagonal scale `diag(sx, sy, 1)`.
    pub fn scaled(&self, sx: f64, sy: f64) -> Homography {
        let scale = Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0);
        Homography { h: scale * self.h }
    }

    /// Left-multiply by an arbitrary matrix, e.g. the mirror flip.
    pub fn pre_composed(&self, m: Matrix3<f64>) -> Homography {
        Homography { h: m * self.h }
    }

    pub fn inverse(&self) -> Option<Homography> {
        self.h.try_inverse().map(Homography::new)
    }

    /// Apply the projective transform to one point.
    ///
    /// A vanishing homogeneous coordinate collapses the point to the origin
    /// instead of producing infinities.
    pub fn transform(&self, p: Point) -> Point {
        let x = p.x as f64;
        let y = p.y as f64;
        let w = x * self.h[(2, 0)] + y * self.h[(2, 1)] + self.h[(2, 2)];
        if w.abs() > f64::EPSILON {
            let w = 1.0 / w;
            Point::new(
                ((x * self.h[(0, 0)] + y * self.h[(0, 1)] + self.h[(0, 2)]) * w) as f32,
                ((x * self.h[(1, 0)] + y * self.h[(1, 1)] + self.h[(1, 2)]) * w) as f32,
            )
        } else {
            Point::new(0.0, 0.0)
        }
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point]) -> (Vec<(f64, f64)>, Matrix3<f64>) {
    // Hartley normalization: translate to centroid, scale so mean distance = sqrt(2)
    let n = pts.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in pts {
        cx += p.x as f64;
        cy += p.y as f64;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for p in pts {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let mut out = Vec::with_capacity(pts.len());
    for p in pts {
        let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
        out.push((v[0], v[1]));
    }
    (out, t)
}

/// Estimate H such that `dst ~ H * src`, from at least four correspondences.
pub fn estimate_homography(src: &[Point], dst: &[Point]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    // Build A (2N x 9) for the direct linear transform
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let (x, y) = s[k];
        let (u, v) = d[k];

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Solve Ah = 0 -> h is the right singular vector with smallest singular value
    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let last = vt.nrows().checked_sub(1)?;
    let h = vt.row(last);

    let hn = Matrix3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    // Denormalize: H = Td^{-1} * Hn * Ts, then fix scale so h33 = 1
    let h_den = td.try_inverse()? * hn * ts;
    let scale = h_den[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h_den / scale))
}

#[inline]
fn sample_gray(frame: &Frame, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= frame.width() as i32 || y >= frame.height() as i32 {
        return 0;
    }
    frame.at(x as u32, y as u32)
}

#[inline]
fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> u8 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = sample_gray(frame, x0, y0) as f32;
    let p10 = sample_gray(frame, x0 + 1, y0) as f32;
    let p01 = sample_gray(frame, x0, y0 + 1) as f32;
    let p11 = sample_gray(frame, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    (a + fy * (b - a)).clamp(0.0, 255.0) as u8
}

/// Warp a frame in place: each destination pixel is mapped through
/// `h_src_from_dst` back into the source and sampled bilinearly. The output
/// keeps the source resolution.
pub fn warp_perspective(frame: &mut Frame, h_src_from_dst: &Homography) {
    let width = frame.width();
    let height = frame.height();
    let mut out = vec![0u8; width as usize * height as usize];

    for y in 0..height {
        for x in 0..width {
            let src = h_src_from_dst.transform(Point::new(x as f32, y as f32));
            out[y as usize * width as usize + x as usize] = sample_bilinear(frame, src.x, src.y);
        }
    }

    frame.data_mut().copy_from_slice(&out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point, b: Point, tol: f32) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    #[test]
    fn identity_leaves_points_untouched() {
        let h = Homography::identity();
        let p = Point::new(0.25, 0.75);
        assert_eq!(h.transform(p), p);
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = Homography::new(Matrix3::new(
            1.2, 0.1, 5.0, //
            -0.05, 0.9, 3.0, //
            0.001, 0.0005, 1.0,
        ));
        let inv = h.inverse().expect("invertible");

        for p in [
            Point::new(0.0, 0.0),
            Point::new(50.0, -20.0),
            Point::new(320.0, 200.0),
        ] {
            assert_close(inv.transform(h.transform(p)), p, 1e-3);
        }
    }

    #[test]
    fn dlt_recovers_known_homography() {
        let ground_truth = Homography::new(Matrix3::new(
            0.8, 0.05, 120.0, //
            -0.02, 1.1, 80.0, //
            0.0009, -0.0004, 1.0,
        ));

        let src: Vec<Point> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Point::new(x as f32 * 40.0, y as f32 * 50.0)))
            .collect();
        let dst: Vec<Point> = src.iter().map(|&p| ground_truth.transform(p)).collect();

        let estimated = estimate_homography(&src, &dst).expect("estimate");
        for p in [
            Point::new(0.0, 0.0),
            Point::new(60.0, 40.0),
            Point::new(80.0, 100.0),
        ] {
            assert_close(estimated.transform(p), ground_truth.transform(p), 1e-3);
        }
    }

    #[test]
    fn mismatched_input_lengths_fail() {
        let src = vec![Point::new(0.0, 0.0); 4];
        let dst = vec![Point::new(1.0, 1.0); 3];
        assert!(estimate_homography(&src, &dst).is_none());
    }

    #[test]
    fn vanishing_denominator_collapses_to_origin() {
        // Bottom row chosen so w' = 0 for the probe point
        let h = Homography::new(Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            -1.0, 0.0, 1.0,
        ));
        assert_eq!(h.transform(Point::new(1.0, 0.5)), Point::new(0.0, 0.0));
    }

    #[test]
    fn identity_warp_preserves_pixels() {
        let mut frame = Frame::new();
        frame.resize(16, 8);
        frame.set(5, 3, 200);
        frame.set(0, 0, 17);
        let before = frame.data().to_vec();
        warp_perspective(&mut frame, &Homography::identity());
        assert_eq!(frame.data(), &before[..]);
    }
}
