//! Point filters applied between unprojection and output.

use crate::buffer::PointArray;

pub const DEFAULT_OFFSCREEN_TOLERANCE: f32 = 0.1;

pub trait PointFilter {
    fn filter_points(&self, points: &mut PointArray);
}

/// Applies its filters in insertion order.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn PointFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        FilterChain::default()
    }

    pub fn append(&mut self, filter: Box<dyn PointFilter>) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl PointFilter for FilterChain {
    fn filter_points(&self, points: &mut PointArray) {
        for filter in &self.filters {
            filter.filter_points(points);
        }
    }
}

/// Drops points outside the unit square, with some tolerance for detection
/// jitter at the surface edges. Erasure is unordered (swap with last, pop).
pub struct OffscreenFilter {
    tolerance: f32,
}

impl Default for OffscreenFilter {
    fn default() -> Self {
        OffscreenFilter::new(DEFAULT_OFFSCREEN_TOLERANCE)
    }
}

impl OffscreenFilter {
    pub fn new(tolerance: f32) -> Self {
        OffscreenFilter { tolerance }
    }
}

impl PointFilter for OffscreenFilter {
    fn filter_points(&self, points: &mut PointArray) {
        let min_margin = 0.0 - self.tolerance;
        let max_margin = 1.0 + self.tolerance;
        let mut i = 0;
        while i < points.len() {
            let p = points[i];
            if p.x < min_margin || p.x >= max_margin || p.y < min_margin || p.y >= max_margin {
                points.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }
}

/// Caps the number of reported contacts.
pub struct LimitNumberFilter {
    limit: usize,
}

impl LimitNumberFilter {
    pub fn new(limit: usize) -> Self {
        LimitNumberFilter { limit }
    }
}

impl PointFilter for LimitNumberFilter {
    fn filter_points(&self, points: &mut PointArray) {
        if points.len() > self.limit {
            points.truncate(self.limit);
        }
    }
}
