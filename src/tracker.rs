//! Frame-to-frame contact tracking: assign stable integer IDs to the points
//! of consecutive detection results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::buffer::{Point, PointArray};

/// The optimal-assignment tracker is bounded to this many simultaneous
/// contacts; anything beyond is reported unmatched.
pub const MAX_TRACKED_POINTS: usize = 32;

/// A contact with its stable identifier, as published by tracking consumers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    pub id: i32,
    pub x: f32,
    pub y: f32,
}

/// Result of one `assign_ids` call. Index maps hold `-1` where no
/// correspondence exists.
#[derive(Debug, Default, Clone)]
pub struct TrackerOutput {
    pub current_ids: Vec<i32>,
    pub previous_to_current: Vec<i32>,
    pub current_to_previous: Vec<i32>,
}

pub trait Tracker {
    /// Match `current_points` against the previously seen frame, assign IDs
    /// and remember the frame for the next call.
    fn assign_ids(&mut self, current_points: &[Point]) -> &TrackerOutput;
}

/// Low-water ID allocator: hands out the smallest non-negative integer not
/// currently in use, up to `max_id`; `-1` when exhausted.
struct IdAllocator {
    used: BTreeSet<i32>,
    max_id: i32,
}

impl IdAllocator {
    fn new(max_id: i32) -> Self {
        IdAllocator {
            used: BTreeSet::new(),
            max_id,
        }
    }

    fn acquire(&mut self) -> i32 {
        let mut free = 0;
        for &id in &self.used {
            if free != id {
                break;
            }
            free += 1;
        }
        if free <= self.max_id {
            self.used.insert(free);
            free
        } else {
            -1
        }
    }

    fn release(&mut self, id: i32) {
        self.used.remove(&id);
    }

    #[cfg(test)]
    fn in_use(&self) -> Vec<i32> {
        self.used.iter().copied().collect()
    }
}

/// Shared ID bookkeeping once `current_to_previous` is settled: matched
/// points inherit their predecessor's ID, unmatched points draw a fresh one,
/// and IDs whose previous owner has no successor are released.
fn assign_and_release(
    previous_ids: &[i32],
    previous_len: usize,
    current_len: usize,
    allocator: &mut IdAllocator,
    output: &mut TrackerOutput,
) {
    output.current_ids.clear();
    for current_idx in 0..current_len {
        let matched = output.current_to_previous[current_idx];
        if matched < 0 || matched as usize >= previous_ids.len() {
            output.current_ids.push(allocator.acquire());
        } else {
            output.current_ids.push(previous_ids[matched as usize]);
        }
    }

    output.previous_to_current.clear();
    output.previous_to_current.resize(previous_len, -1);
    for previous_idx in 0..previous_len {
        for (current_idx, &matched) in output.current_to_previous.iter().enumerate() {
            if matched == previous_idx as i32 {
                output.previous_to_current[previous_idx] = current_idx as i32;
                break;
            }
        }
        if output.previous_to_current[previous_idx] < 0 {
            allocator.release(previous_ids[previous_idx]);
        }
    }
}

/// Greedy nearest-neighbor tracker.
///
/// Every current point remembers its nearest previous point; when two current
/// points claim the same predecessor, the farther one is demoted to "no
/// match" and draws a fresh ID.
pub struct SimpleTracker {
    previous_points: PointArray,
    previous_ids: Vec<i32>,
    allocator: IdAllocator,
    distances: Vec<f32>,
    output: TrackerOutput,
}

impl Default for SimpleTracker {
    fn default() -> Self {
        SimpleTracker::new()
    }
}

impl SimpleTracker {
    pub fn new() -> Self {
        SimpleTracker::with_max_id(i32::MAX)
    }

    pub fn with_max_id(max_id: i32) -> Self {
        SimpleTracker {
            previous_points: PointArray::new(),
            previous_ids: Vec::new(),
            allocator: IdAllocator::new(max_id),
            distances: Vec::new(),
            output: TrackerOutput::default(),
        }
    }
}

impl Tracker for SimpleTracker {
    fn assign_ids(&mut self, current_points: &[Point]) -> &TrackerOutput {
        let current_len = current_points.len();
        let previous_len = self.previous_points.len();

        // distance matrix plus the best previous match per current point
        self.distances.clear();
        self.distances.resize(current_len * previous_len.max(1), 0.0);
        self.output.current_to_previous.clear();
        for (current_idx, current) in current_points.iter().enumerate() {
            let mut best = -1i32;
            for (previous_idx, previous) in self.previous_points.iter().enumerate() {
                let distance = current.squared_distance(previous);
                self.distances[current_idx * previous_len.max(1) + previous_idx] = distance;
                if best < 0
                    || distance < self.distances[current_idx * previous_len.max(1) + best as usize]
                {
                    best = previous_idx as i32;
                }
            }
            self.output.current_to_previous.push(best);
        }

        // two current points sharing a best match: the farther one is new
        for a in 0..current_len {
            for b in a + 1..current_len {
                let match_a = self.output.current_to_previous[a];
                let match_b = self.output.current_to_previous[b];
                if match_a < 0 || match_b < 0 || match_a != match_b {
                    continue;
                }
                let stride = previous_len.max(1);
                if self.distances[a * stride + match_a as usize]
                    <= self.distances[b * stride + match_b as usize]
                {
                    self.output.current_to_previous[b] = -1;
                } else {
                    self.output.current_to_previous[a] = -1;
                }
            }
        }

        assign_and_release(
            &self.previous_ids,
            previous_len,
            current_len,
            &mut self.allocator,
            &mut self.output,
        );

        self.previous_points.clear();
        self.previous_points.extend_from_slice(current_points);
        self.previous_ids.clear();
        self.previous_ids.extend_from_slice(&self.output.current_ids);

        &self.output
    }
}

#[inline]
fn clamp15(value: f32) -> i64 {
    (value as i64).clamp(-32767, 32767)
}

/// Squared distance after quantizing each coordinate difference to 15-bit
/// signed range; normalized coordinates scale to the full range.
#[inline]
fn quantized_dist2(a: &Point, b: &Point) -> i64 {
    let dx = clamp15((a.x - b.x) * 32767.0);
    let dy = clamp15((a.y - b.y) * 32767.0);
    dx * dx + dy * dy
}

/// Optimal-assignment tracker: the correspondence minimizes the total
/// quantized squared distance over at most 32×32 points.
pub struct HungarianTracker {
    previous_points: PointArray,
    previous_ids: Vec<i32>,
    allocator: IdAllocator,
    output: TrackerOutput,
}

impl Default for HungarianTracker {
    fn default() -> Self {
        HungarianTracker::new()
    }
}

impl HungarianTracker {
    pub fn new() -> Self {
        HungarianTracker::with_max_id(MAX_TRACKED_POINTS as i32 - 1)
    }

    pub fn with_max_id(max_id: i32) -> Self {
        let max_id = max_id.min(MAX_TRACKED_POINTS as i32 - 1);
        HungarianTracker {
            previous_points: PointArray::new(),
            previous_ids: Vec::new(),
            allocator: IdAllocator::new(max_id),
            output: TrackerOutput::default(),
        }
    }
}

impl Tracker for HungarianTracker {
    fn assign_ids(&mut self, current_points: &[Point]) -> &TrackerOutput {
        let current_len = current_points.len();
        let previous_len = self.previous_points.len();
        let rows = current_len.min(MAX_TRACKED_POINTS);
        let cols = previous_len.min(MAX_TRACKED_POINTS);

        self.output.current_to_previous.clear();
        self.output.current_to_previous.resize(current_len, -1);

        if rows > 0 && cols > 0 {
            let current = &current_points[..rows];
            let previous = &self.previous_points[..cols];
            let pairs = if rows <= cols {
                minimum_cost_pairs(rows, cols, |i, j| {
                    quantized_dist2(&current[i], &previous[j])
                })
            } else {
                minimum_cost_pairs(cols, rows, |j, i| {
                    quantized_dist2(&current[i], &previous[j])
                })
                .into_iter()
                .map(|(j, i)| (i, j))
                .collect()
            };
            for (current_idx, previous_idx) in pairs {
                self.output.current_to_previous[current_idx] = previous_idx as i32;
            }
        }

        assign_and_release(
            &self.previous_ids,
            previous_len,
            current_len,
            &mut self.allocator,
            &mut self.output,
        );

        self.previous_points.clear();
        self.previous_points.extend_from_slice(current_points);
        self.previous_ids.clear();
        self.previous_ids.extend_from_slice(&self.output.current_ids);

        &self.output
    }
}

/// Hungarian method with potentials: match every row of an `n`×`m` cost
/// matrix (`n <= m`) so the summed cost is minimal. Returns `(row, col)`
/// pairs.
fn minimum_cost_pairs<F>(n: usize, m: usize, cost: F) -> Vec<(usize, usize)>
where
    F: Fn(usize, usize) -> i64,
{
    debug_assert!(n <= m);
    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; m + 1];
    let mut assigned_row = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        assigned_row[0] = i;
        let mut j0 = 0usize;
        let mut min_v = vec![i64::MAX; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = assigned_row[j0];
            let mut delta = i64::MAX;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_v[j] {
                    min_v[j] = reduced;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[assigned_row[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }
            j0 = j1;
            if assigned_row[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            assigned_row[j0] = assigned_row[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs = Vec::with_capacity(n);
    for j in 1..=m {
        if assigned_row[j] != 0 {
            pairs.push((assigned_row[j] - 1, j - 1));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(coords: &[(f32, f32)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn fresh_points_get_ascending_ids() {
        let mut tracker = SimpleTracker::new();
        let out = tracker.assign_ids(&points(&[(0.1, 0.1), (0.9, 0.9)]));
        assert_eq!(out.current_ids, vec![0, 1]);
        assert_eq!(out.previous_to_current, Vec::<i32>::new());
    }

    #[test]
    fn ids_follow_moving_points() {
        let mut tracker = SimpleTracker::new();
        tracker.assign_ids(&points(&[(0.1, 0.1), (0.9, 0.9)]));
        let out = tracker.assign_ids(&points(&[(0.11, 0.1), (0.9, 0.91)]));
        assert_eq!(out.current_ids, vec![0, 1]);
        assert_eq!(out.previous_to_current, vec![0, 1]);
        assert_eq!(out.current_to_previous, vec![0, 1]);
    }

    #[test]
    fn identical_frames_keep_identical_ids() {
        let frame = points(&[(0.2, 0.3), (0.7, 0.1), (0.5, 0.9)]);
        let mut tracker = SimpleTracker::new();
        let first = tracker.assign_ids(&frame).current_ids.clone();
        let second = tracker.assign_ids(&frame).current_ids.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn far_jump_still_matches_the_only_candidate() {
        let mut tracker = SimpleTracker::new();
        tracker.assign_ids(&points(&[(0.1, 0.1)]));
        let out = tracker.assign_ids(&points(&[(0.9, 0.9)]));
        assert_eq!(out.current_ids, vec![0]);
        assert_ne!(out.current_ids[0], -1);
    }

    #[test]
    fn collision_demotes_the_farther_point() {
        let mut tracker = SimpleTracker::new();
        tracker.assign_ids(&points(&[(0.5, 0.5)]));
        let out = tracker.assign_ids(&points(&[(0.52, 0.5), (0.6, 0.5)]));
        // both nearest to the single previous point; the closer one keeps
        // its ID and the other is new
        assert_eq!(out.current_ids, vec![0, 1]);
        assert_eq!(out.current_to_previous, vec![0, -1]);
    }

    #[test]
    fn ids_are_unique() {
        let mut tracker = SimpleTracker::new();
        tracker.assign_ids(&points(&[(0.1, 0.1), (0.2, 0.2), (0.3, 0.3)]));
        let out = tracker.assign_ids(&points(&[(0.15, 0.15), (0.25, 0.25), (0.8, 0.8)]));
        let mut non_negative: Vec<i32> = out
            .current_ids
            .iter()
            .copied()
            .filter(|&id| id >= 0)
            .collect();
        non_negative.sort_unstable();
        non_negative.dedup();
        assert_eq!(non_negative.len(), out.current_ids.len());
    }

    #[test]
    fn released_ids_are_reused_lowest_first() {
        let mut tracker = SimpleTracker::new();
        tracker.assign_ids(&points(&[(0.1, 0.1), (0.5, 0.5), (0.9, 0.9)]));
        // only the last point remains; IDs 0 and 1 are released
        let out = tracker.assign_ids(&points(&[(0.9, 0.9)]));
        assert_eq!(out.current_ids, vec![2]);
        let out = tracker.assign_ids(&points(&[(0.9, 0.9), (0.1, 0.1)]));
        assert_eq!(out.current_ids, vec![2, 0]);
    }

    #[test]
    fn allocator_in_use_matches_assigned_ids() {
        let mut tracker = SimpleTracker::new();
        tracker.assign_ids(&points(&[(0.1, 0.1), (0.4, 0.4), (0.8, 0.8)]));
        let out = tracker.assign_ids(&points(&[(0.4, 0.4), (0.85, 0.8)]));
        let mut expected: Vec<i32> = out
            .current_ids
            .iter()
            .copied()
            .filter(|&id| id >= 0)
            .collect();
        expected.sort_unstable();
        assert_eq!(tracker.allocator.in_use(), expected);
    }

    #[test]
    fn exhausted_allocator_yields_minus_one() {
        let mut tracker = SimpleTracker::with_max_id(1);
        let out = tracker.assign_ids(&points(&[(0.1, 0.1), (0.5, 0.5), (0.9, 0.9)]));
        assert_eq!(out.current_ids, vec![0, 1, -1]);
    }

    #[test]
    fn hungarian_finds_the_globally_cheaper_pairing() {
        let mut tracker = HungarianTracker::new();
        tracker.assign_ids(&points(&[(0.0, 0.0), (0.1, 0.0)]));
        // greedy would give both points to the second predecessor; the
        // optimal assignment keeps the diagonal pairing
        let out = tracker.assign_ids(&points(&[(0.06, 0.0), (0.16, 0.0)]));
        assert_eq!(out.current_to_previous, vec![0, 1]);
        assert_eq!(out.current_ids, vec![0, 1]);
    }

    #[test]
    fn hungarian_identity_is_stable() {
        let frame = points(&[(0.25, 0.5), (0.75, 0.5), (0.5, 0.25)]);
        let mut tracker = HungarianTracker::new();
        let first = tracker.assign_ids(&frame).current_ids.clone();
        let second = tracker.assign_ids(&frame).current_ids.clone();
        assert_eq!(first, second);
        assert_eq!(first, vec![0, 1, 2]);
    }

    #[test]
    fn hungarian_caps_simultaneous_contacts() {
        let mut frame = Vec::new();
        for i in 0..(MAX_TRACKED_POINTS + 1) {
            frame.push(Point::new(i as f32 / 40.0, 0.5));
        }
        let mut tracker = HungarianTracker::new();
        let out = tracker.assign_ids(&frame);
        let assigned = out.current_ids.iter().filter(|&&id| id >= 0).count();
        assert_eq!(assigned, MAX_TRACKED_POINTS);
        assert_eq!(out.current_ids[MAX_TRACKED_POINTS], -1);
    }

    #[test]
    fn quantization_clamps_to_15_bits() {
        let a = Point::new(10.0, 0.0);
        let b = Point::new(-10.0, 0.0);
        assert_eq!(quantized_dist2(&a, &b), 32767 * 32767);
    }
}
